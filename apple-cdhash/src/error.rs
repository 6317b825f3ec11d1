// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {crate::embedded_signature::DigestType, thiserror::Error};

/// Unified error type for cdhash computation.
#[derive(Debug, Error)]
pub enum AppleCdhashError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument")]
    CliBadArgument,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary parsing error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("YAML serialization error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("not a 64-bit Mach-O binary")]
    NotMachO,

    #[error("Mach-O load commands are malformed: {0}")]
    LoadCommandsMalformed(&'static str),

    #[error("binary does not have code signature data")]
    BinaryNoCodeSignature,

    #[error("code signature data out of bounds (offset {offset}, size {size})")]
    SignatureOutOfBounds { offset: u32, size: u32 },

    #[error("blob data is malformed: {0}")]
    BlobMalformed(&'static str),

    #[error("unrecognized code signature magic: {0:#010x}")]
    UnknownSignatureMagic(u32),

    #[error("SuperBlob data is malformed: {0}")]
    SuperblobMalformed(&'static str),

    #[error("code directory at offset {offset} is malformed: {reason}")]
    CodeDirectoryMalformed { offset: usize, reason: &'static str },

    #[error("embedded signature does not contain a code directory")]
    NoCodeDirectory,

    #[error("unsupported digest algorithm: {0}")]
    DigestUnsupportedAlgorithm(DigestType),

    #[error("universal binary slice {index} out of bounds")]
    UniversalSliceOutOfBounds { index: usize },

    #[error("universal binary has no slice at index {index} ({count} slices)")]
    UniversalIndexOutOfRange { index: usize, count: usize },
}
