// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Embedded signature data structures (blobs, super blobs, slots, digests).
//!
//! The data that an `LC_CODE_SIGNATURE` load command points at is a *blob*:
//! a big-endian `u32` magic followed by a big-endian `u32` length that
//! includes the 8 byte header itself.
//!
//! In the wild this blob is almost always a `SuperBlob` with
//! [CodeSigningMagic::EmbeddedSignature] magic. That is followed by a `u32`
//! count of `BlobIndex` records, each a `(type, offset)` pair. The *type* is
//! a [CodeSigningSlot] and the offset is relative to the start of the super
//! blob. Code directories live in the [CodeSigningSlot::CodeDirectory] slot
//! and, when a binary carries digests of multiple algorithms, in the
//! alternate code directory slots.
//!
//! The kernel also accepts a bare code directory blob in place of the super
//! blob. [CodeSignature] models both forms.
//!
//! Every offset and length in here comes from the binary being examined.
//! Nothing is dereferenced without first being checked against the slice it
//! indexes into. The layout definitions follow XNU's `cs_blobs.h`.

use {
    crate::{
        cdhash::CdHash,
        code_directory::{select_code_directory, CodeDirectoryRecord},
        error::AppleCdhashError,
        macho::SignatureRegion,
    },
    log::debug,
    scroll::Pread,
    std::fmt::{Display, Formatter},
};

/// Size of the magic and length fields common to all blobs.
pub const BLOB_HEADER_SIZE: usize = 8;

/// Size of a super blob header: magic, length and blob count.
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// Size of a single `BlobIndex` record.
pub const BLOB_INDEX_SIZE: usize = 8;

/// Super blobs declaring this many blobs or more are rejected.
pub const SUPERBLOB_MAX_COUNT: u32 = 0x10000;

/// Defines header magic for various payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeSigningMagic {
    /// Code requirement blob.
    Requirement,
    /// Code requirements blob.
    RequirementSet,
    /// CodeDirectory blob.
    CodeDirectory,
    /// Embedded signature.
    ///
    /// This is often the magic of the SuperBlob.
    EmbeddedSignature,
    /// Old embedded signature.
    EmbeddedSignatureOld,
    /// Entitlements blob.
    Entitlements,
    /// DER encoded entitlements blob.
    EntitlementsDer,
    /// Multi-arch collection of embedded signatures.
    DetachedSignature,
    /// Generic blob wrapper.
    ///
    /// The CMS signature is stored in this type.
    BlobWrapper,
    /// Unknown magic.
    Unknown(u32),
}

impl From<u32> for CodeSigningMagic {
    fn from(v: u32) -> Self {
        match v {
            0xfade0c00 => Self::Requirement,
            0xfade0c01 => Self::RequirementSet,
            0xfade0c02 => Self::CodeDirectory,
            0xfade0cc0 => Self::EmbeddedSignature,
            0xfade0b02 => Self::EmbeddedSignatureOld,
            0xfade7171 => Self::Entitlements,
            0xfade7172 => Self::EntitlementsDer,
            0xfade0cc1 => Self::DetachedSignature,
            0xfade0b01 => Self::BlobWrapper,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningMagic> for u32 {
    fn from(magic: CodeSigningMagic) -> u32 {
        match magic {
            CodeSigningMagic::Requirement => 0xfade0c00,
            CodeSigningMagic::RequirementSet => 0xfade0c01,
            CodeSigningMagic::CodeDirectory => 0xfade0c02,
            CodeSigningMagic::EmbeddedSignature => 0xfade0cc0,
            CodeSigningMagic::EmbeddedSignatureOld => 0xfade0b02,
            CodeSigningMagic::Entitlements => 0xfade7171,
            CodeSigningMagic::EntitlementsDer => 0xfade7172,
            CodeSigningMagic::DetachedSignature => 0xfade0cc1,
            CodeSigningMagic::BlobWrapper => 0xfade0b01,
            CodeSigningMagic::Unknown(v) => v,
        }
    }
}

/// A well-known slot within code signing data.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSigningSlot {
    CodeDirectory,
    Info,
    RequirementSet,
    ResourceDir,
    Application,
    Entitlements,
    RepSpecific,
    EntitlementsDer,
    AlternateCodeDirectory0,
    AlternateCodeDirectory1,
    AlternateCodeDirectory2,
    AlternateCodeDirectory3,
    AlternateCodeDirectory4,
    Signature,
    Identification,
    Ticket,
    Unknown(u32),
}

impl CodeSigningSlot {
    fn name(&self) -> &'static str {
        match self {
            Self::CodeDirectory => "CodeDirectory",
            Self::Info => "Info",
            Self::RequirementSet => "RequirementSet",
            Self::ResourceDir => "Resources",
            Self::Application => "Application",
            Self::Entitlements => "Entitlements",
            Self::RepSpecific => "Rep Specific",
            Self::EntitlementsDer => "DER Entitlements",
            Self::AlternateCodeDirectory0 => "CodeDirectory Alternate #0",
            Self::AlternateCodeDirectory1 => "CodeDirectory Alternate #1",
            Self::AlternateCodeDirectory2 => "CodeDirectory Alternate #2",
            Self::AlternateCodeDirectory3 => "CodeDirectory Alternate #3",
            Self::AlternateCodeDirectory4 => "CodeDirectory Alternate #4",
            Self::Signature => "CMS Signature",
            Self::Identification => "Identification",
            Self::Ticket => "Ticket",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Whether this slot holds a code directory.
    ///
    /// This is the primary code directory slot plus the range of alternate
    /// code directory slots (`CSSLOT_ALTERNATE_CODEDIRECTORIES` up to
    /// `CSSLOT_ALTERNATE_CODEDIRECTORY_LIMIT`).
    pub fn is_code_directory(&self) -> bool {
        matches!(
            self,
            Self::CodeDirectory
                | Self::AlternateCodeDirectory0
                | Self::AlternateCodeDirectory1
                | Self::AlternateCodeDirectory2
                | Self::AlternateCodeDirectory3
                | Self::AlternateCodeDirectory4
        )
    }
}

impl std::fmt::Debug for CodeSigningSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{} ({})", self.name(), u32::from(*self)))
    }
}

impl From<u32> for CodeSigningSlot {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::CodeDirectory,
            1 => Self::Info,
            2 => Self::RequirementSet,
            3 => Self::ResourceDir,
            4 => Self::Application,
            5 => Self::Entitlements,
            6 => Self::RepSpecific,
            7 => Self::EntitlementsDer,
            0x1000 => Self::AlternateCodeDirectory0,
            0x1001 => Self::AlternateCodeDirectory1,
            0x1002 => Self::AlternateCodeDirectory2,
            0x1003 => Self::AlternateCodeDirectory3,
            0x1004 => Self::AlternateCodeDirectory4,
            0x10000 => Self::Signature,
            0x10001 => Self::Identification,
            0x10002 => Self::Ticket,
            _ => Self::Unknown(v),
        }
    }
}

impl From<CodeSigningSlot> for u32 {
    fn from(v: CodeSigningSlot) -> Self {
        match v {
            CodeSigningSlot::CodeDirectory => 0,
            CodeSigningSlot::Info => 1,
            CodeSigningSlot::RequirementSet => 2,
            CodeSigningSlot::ResourceDir => 3,
            CodeSigningSlot::Application => 4,
            CodeSigningSlot::Entitlements => 5,
            CodeSigningSlot::RepSpecific => 6,
            CodeSigningSlot::EntitlementsDer => 7,
            CodeSigningSlot::AlternateCodeDirectory0 => 0x1000,
            CodeSigningSlot::AlternateCodeDirectory1 => 0x1001,
            CodeSigningSlot::AlternateCodeDirectory2 => 0x1002,
            CodeSigningSlot::AlternateCodeDirectory3 => 0x1003,
            CodeSigningSlot::AlternateCodeDirectory4 => 0x1004,
            CodeSigningSlot::Signature => 0x10000,
            CodeSigningSlot::Identification => 0x10001,
            CodeSigningSlot::Ticket => 0x10002,
            CodeSigningSlot::Unknown(v) => v,
        }
    }
}

/// Represents a digest type encountered in code signature data structures.
///
/// Variants are declared from weakest to strongest for the algorithms the
/// kernel knows how to rank. See [DigestType::rank].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestType {
    None,
    Sha1,
    Sha256,
    Sha256Truncated,
    Sha384,
    Sha512,
    Unknown(u8),
}

impl From<u8> for DigestType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Sha1,
            2 => Self::Sha256,
            3 => Self::Sha256Truncated,
            4 => Self::Sha384,
            5 => Self::Sha512,
            _ => Self::Unknown(v),
        }
    }
}

impl From<DigestType> for u8 {
    fn from(v: DigestType) -> u8 {
        match v {
            DigestType::None => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
            DigestType::Sha256Truncated => 3,
            DigestType::Sha384 => 4,
            DigestType::Sha512 => 5,
            DigestType::Unknown(v) => v,
        }
    }
}

impl Display for DigestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestType::None => f.write_str("none"),
            DigestType::Sha1 => f.write_str("sha1"),
            DigestType::Sha256 => f.write_str("sha256"),
            DigestType::Sha256Truncated => f.write_str("sha256-truncated"),
            DigestType::Sha384 => f.write_str("sha384"),
            DigestType::Sha512 => f.write_str("sha512"),
            DigestType::Unknown(v) => f.write_fmt(format_args!("unknown: {}", v)),
        }
    }
}

impl DigestType {
    /// The preference of this digest type when choosing between code directories.
    ///
    /// Mirrors the ranking XNU applies in `ubc_subr.c`: SHA-1 < truncated
    /// SHA-256 < SHA-256 < SHA-384. Anything else ranks 0.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256Truncated => 2,
            Self::Sha256 => 3,
            Self::Sha384 => 4,
            Self::None | Self::Sha512 | Self::Unknown(_) => 0,
        }
    }

    /// Obtain a hasher for this digest type.
    pub fn as_hasher(&self) -> Result<ring::digest::Context, AppleCdhashError> {
        match self {
            Self::Sha1 => Ok(ring::digest::Context::new(
                &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            )),
            Self::Sha256 | Self::Sha256Truncated => {
                Ok(ring::digest::Context::new(&ring::digest::SHA256))
            }
            Self::Sha384 => Ok(ring::digest::Context::new(&ring::digest::SHA384)),
            Self::Sha512 => Ok(ring::digest::Context::new(&ring::digest::SHA512)),
            Self::None | Self::Unknown(_) => {
                Err(AppleCdhashError::DigestUnsupportedAlgorithm(*self))
            }
        }
    }

    /// Digest data given the configured hasher.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>, AppleCdhashError> {
        let mut hasher = self.as_hasher()?;

        hasher.update(data);
        let mut hash = hasher.finish().as_ref().to_vec();

        if matches!(self, Self::Sha256Truncated) {
            hash.truncate(20);
        }

        Ok(hash)
    }

    /// Compute the cdhash of code directory bytes with this digest type.
    ///
    /// Only SHA-1 and SHA-256 (including its truncated variant) are
    /// supported. Other types are an error even if [DigestType::digest_data]
    /// could produce a digest for them.
    pub fn cdhash(&self, data: &[u8]) -> Result<CdHash, AppleCdhashError> {
        let algorithm = match self {
            Self::Sha1 => &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 | Self::Sha256Truncated => &ring::digest::SHA256,
            _ => {
                debug!("cannot compute cdhash with digest type {}", self);
                return Err(AppleCdhashError::DigestUnsupportedAlgorithm(*self));
            }
        };

        Ok(CdHash::from_digest(ring::digest::digest(algorithm, data).as_ref()))
    }
}

/// Read a big-endian `u32` at the given offset.
///
/// All multi-byte fields in code signature data are big-endian.
pub(crate) fn read_u32_be(data: &[u8], offset: usize) -> Result<u32, scroll::Error> {
    data.pread_with(offset, scroll::BE)
}

/// The magic and length header at the start of every blob.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlobHeader {
    pub magic: CodeSigningMagic,
    /// Length of the blob, including this header.
    pub length: u32,
}

/// Read the header from a Blob.
///
/// Blobs begin with a u32 magic and u32 length, inclusive.
pub fn read_blob_header(data: &[u8]) -> Result<BlobHeader, AppleCdhashError> {
    let truncated = |_| AppleCdhashError::BlobMalformed("truncated blob header");

    Ok(BlobHeader {
        magic: read_u32_be(data, 0).map_err(truncated)?.into(),
        length: read_u32_be(data, 4).map_err(truncated)?,
    })
}

/// An entry in a super blob's index.
#[derive(Clone, Copy, Debug)]
pub struct BlobIndex {
    pub slot: CodeSigningSlot,
    /// Offset of the blob relative to the start of the super blob.
    pub offset: u32,
}

/// Represents Apple's embedded signature super blob.
///
/// Instances are validated on construction: the declared length fits the
/// available data, the blob count is sane and the whole index table lies
/// within the declared length. The blobs the index points at are not
/// validated until they are looked at.
#[derive(Clone, Copy)]
pub struct SuperBlob<'a> {
    /// Length of this super blob.
    pub length: u32,
    /// Number of blobs in this super blob.
    pub count: u32,

    /// Raw data backing this super blob, truncated to its declared length.
    data: &'a [u8],
}

impl<'a> std::fmt::Debug for SuperBlob<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SuperBlob")
            .field("length", &self.length)
            .field("count", &self.count)
            .finish()
    }
}

impl<'a> SuperBlob<'a> {
    /// Attempt to parse an embedded signature super blob from data.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, AppleCdhashError> {
        if data.len() < SUPERBLOB_HEADER_SIZE {
            return Err(AppleCdhashError::SuperblobMalformed("truncated header"));
        }

        let header = read_blob_header(data)?;

        if header.magic != CodeSigningMagic::EmbeddedSignature {
            return Err(AppleCdhashError::SuperblobMalformed("bad magic"));
        }

        let data = data
            .get(..header.length as usize)
            .ok_or(AppleCdhashError::SuperblobMalformed(
                "length exceeds available data",
            ))?;

        let count = read_u32_be(data, 8)
            .map_err(|_| AppleCdhashError::SuperblobMalformed("truncated header"))?;

        if count >= SUPERBLOB_MAX_COUNT {
            debug!("super blob declares {} blobs; rejecting", count);
            return Err(AppleCdhashError::SuperblobMalformed("too many blobs"));
        }

        // count is bounded above, so this can't overflow.
        let index_end = SUPERBLOB_HEADER_SIZE + count as usize * BLOB_INDEX_SIZE;

        if index_end > data.len() {
            debug!(
                "super blob index table ends at {} but blob is {} bytes",
                index_end,
                data.len()
            );
            return Err(AppleCdhashError::SuperblobMalformed(
                "index table exceeds blob length",
            ));
        }

        Ok(Self {
            length: header.length,
            count,
            data,
        })
    }

    /// Read the index record at position `index`.
    pub fn blob_index(&self, index: usize) -> Result<BlobIndex, AppleCdhashError> {
        if index >= self.count as usize {
            return Err(AppleCdhashError::SuperblobMalformed("blob index out of range"));
        }

        let offset = SUPERBLOB_HEADER_SIZE + index * BLOB_INDEX_SIZE;
        let truncated = |_| AppleCdhashError::SuperblobMalformed("truncated index table");

        Ok(BlobIndex {
            slot: read_u32_be(self.data, offset).map_err(truncated)?.into(),
            offset: read_u32_be(self.data, offset + 4).map_err(truncated)?,
        })
    }

    /// Resolve the code directory referenced by index record `index`.
    ///
    /// Returns `Ok(None)` if the slot does not hold a code directory. An
    /// offset beyond the super blob is an error regardless of slot, as is a
    /// code directory slot whose blob fails validation.
    pub fn code_directory_at(
        &self,
        index: usize,
    ) -> Result<Option<CodeDirectoryRecord<'a>>, AppleCdhashError> {
        let entry = self.blob_index(index)?;
        let offset = entry.offset as usize;

        let blob_data = self.data.get(offset..).ok_or_else(|| {
            debug!(
                "blob {} ({:?}) offset {} is past end of {} byte super blob",
                index, entry.slot, offset, self.length
            );
            AppleCdhashError::SuperblobMalformed("blob offset out of bounds")
        })?;

        if !entry.slot.is_code_directory() {
            return Ok(None);
        }

        let record = CodeDirectoryRecord::from_bytes(blob_data, entry.slot, offset)?;

        debug!(
            "found code directory in slot {:?} at offset {} (digest type {})",
            record.slot, record.offset, record.digest_type
        );

        Ok(Some(record))
    }

    /// Iterate over the code directories in this super blob, in index order.
    ///
    /// Iteration stops after the first error.
    pub fn code_directories(&self) -> CodeDirectoryIter<'a> {
        CodeDirectoryIter {
            source: CodeDirectorySource::SuperBlob(*self),
            position: 0,
            done: false,
        }
    }
}

#[derive(Clone, Copy)]
enum CodeDirectorySource<'a> {
    SuperBlob(SuperBlob<'a>),
    Single(CodeDirectoryRecord<'a>),
}

/// Iterator over the code directories in signature data.
pub struct CodeDirectoryIter<'a> {
    source: CodeDirectorySource<'a>,
    position: usize,
    done: bool,
}

impl<'a> Iterator for CodeDirectoryIter<'a> {
    type Item = Result<CodeDirectoryRecord<'a>, AppleCdhashError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.source {
            CodeDirectorySource::Single(record) => {
                self.done = true;
                Some(Ok(record))
            }
            CodeDirectorySource::SuperBlob(superblob) => {
                while self.position < superblob.count as usize {
                    let index = self.position;
                    self.position += 1;

                    match superblob.code_directory_at(index) {
                        Ok(Some(record)) => return Some(Ok(record)),
                        Ok(None) => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }

                self.done = true;
                None
            }
        }
    }
}

/// Code signature data referenced by a Mach-O binary.
///
/// This is either a super blob holding one or more code directories or a
/// bare code directory.
#[derive(Clone, Copy, Debug)]
pub enum CodeSignature<'a> {
    SuperBlob(SuperBlob<'a>),
    CodeDirectory(CodeDirectoryRecord<'a>),
}

impl<'a> CodeSignature<'a> {
    /// Parse the code signature in a Mach-O signature region.
    pub fn from_region(region: &SignatureRegion<'a>) -> Result<Self, AppleCdhashError> {
        Self::from_bytes(region.data)
    }

    /// Parse code signature data.
    ///
    /// `data` is everything from the start of the signature to the end of the
    /// region the load command describes. The blob's self-reported length
    /// can't be greater than that.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, AppleCdhashError> {
        let header = read_blob_header(data)?;

        let data = data.get(..header.length as usize).ok_or_else(|| {
            debug!(
                "signature blob claims {} bytes but only {} available",
                header.length,
                data.len()
            );
            AppleCdhashError::BlobMalformed("blob length exceeds signature data")
        })?;

        match header.magic {
            CodeSigningMagic::EmbeddedSignature => {
                Ok(Self::SuperBlob(SuperBlob::from_bytes(data)?))
            }
            CodeSigningMagic::CodeDirectory => Ok(Self::CodeDirectory(
                CodeDirectoryRecord::from_bytes(data, CodeSigningSlot::CodeDirectory, 0)?,
            )),
            magic => {
                debug!("unrecognized code signature magic {:?}", magic);
                Err(AppleCdhashError::UnknownSignatureMagic(u32::from(magic)))
            }
        }
    }

    /// The magic of the outermost blob.
    pub fn magic(&self) -> CodeSigningMagic {
        match self {
            Self::SuperBlob(_) => CodeSigningMagic::EmbeddedSignature,
            Self::CodeDirectory(_) => CodeSigningMagic::CodeDirectory,
        }
    }

    /// Iterate over all code directories in the signature.
    pub fn code_directories(&self) -> CodeDirectoryIter<'a> {
        match self {
            Self::SuperBlob(superblob) => superblob.code_directories(),
            Self::CodeDirectory(record) => CodeDirectoryIter {
                source: CodeDirectorySource::Single(*record),
                position: 0,
                done: false,
            },
        }
    }

    /// Resolve the code directory whose digest is the cdhash.
    ///
    /// For a super blob this is the code directory with the strongest
    /// digest type. A bare code directory is used as-is.
    pub fn selected_code_directory(&self) -> Result<CodeDirectoryRecord<'a>, AppleCdhashError> {
        match self {
            Self::SuperBlob(superblob) => select_code_directory(superblob.code_directories()),
            Self::CodeDirectory(record) => Ok(*record),
        }
    }

    /// Compute the cdhash of this signature.
    pub fn cdhash(&self) -> Result<CdHash, AppleCdhashError> {
        self.selected_code_directory()?.cdhash()
    }
}
