// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory blobs.
//!
//! A code directory is the blob whose digest is the cdhash. Only the fields
//! needed to validate it and pick a digest algorithm are interpreted here:
//! the magic, the length and the `hashType` byte.

use {
    crate::{
        cdhash::CdHash,
        embedded_signature::{
            read_blob_header, read_u32_be, CodeSigningMagic, CodeSigningSlot, DigestType,
        },
        error::AppleCdhashError,
    },
    log::debug,
    scroll::Pread,
};

/// Smallest number of bytes a code directory must occupy.
///
/// This is the size of XNU's `CS_CodeDirectory` through `execSegFlags`
/// (version `0x20400`).
pub const CODE_DIRECTORY_HEADER_SIZE: usize = 88;

/// Offset of the `hashType` byte within a code directory.
pub const CODE_DIRECTORY_HASH_TYPE_OFFSET: usize = 37;

/// A validated reference to a code directory blob.
///
/// Holds the bytes from the start of the code directory to the end of its
/// enclosing blob. The declared length was checked against that on
/// construction.
#[derive(Clone, Copy)]
pub struct CodeDirectoryRecord<'a> {
    /// Slot this code directory was found in.
    pub slot: CodeSigningSlot,
    /// Offset of this code directory within its enclosing blob.
    pub offset: usize,
    /// Declared length of the code directory.
    pub length: u32,
    /// Digest algorithm of the code directory.
    pub digest_type: DigestType,

    data: &'a [u8],
}

impl<'a> std::fmt::Debug for CodeDirectoryRecord<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CodeDirectoryRecord")
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("digest_type", &self.digest_type)
            .finish()
    }
}

impl<'a> CodeDirectoryRecord<'a> {
    /// Validate a code directory.
    ///
    /// `data` begins at the code directory and extends to the end of the
    /// enclosing blob. It must hold at least [CODE_DIRECTORY_HEADER_SIZE]
    /// bytes and the declared length must fit within it. The declared length
    /// itself may be shorter than the header.
    pub fn from_bytes(
        data: &'a [u8],
        slot: CodeSigningSlot,
        offset: usize,
    ) -> Result<Self, AppleCdhashError> {
        let malformed = |reason: &'static str| {
            debug!(
                "rejecting code directory in slot {:?} at offset {}: {}",
                slot, offset, reason
            );
            AppleCdhashError::CodeDirectoryMalformed { offset, reason }
        };

        if data.len() < CODE_DIRECTORY_HEADER_SIZE {
            return Err(malformed("truncated header"));
        }

        let header = read_blob_header(data)?;

        if header.magic != CodeSigningMagic::CodeDirectory {
            return Err(malformed("bad magic"));
        }

        if header.length as usize > data.len() {
            return Err(malformed("length exceeds available data"));
        }

        let digest_type = DigestType::from(
            data.pread::<u8>(CODE_DIRECTORY_HASH_TYPE_OFFSET)
                .map_err(|_| malformed("truncated header"))?,
        );

        Ok(Self {
            slot,
            offset,
            length: header.length,
            digest_type,
            data,
        })
    }

    /// The preference of this code directory's digest type.
    pub fn rank(&self) -> u8 {
        self.digest_type.rank()
    }

    /// The bytes covered by the code directory's declared length.
    pub fn blob_data(&self) -> Result<&'a [u8], AppleCdhashError> {
        let malformed = |reason: &'static str| AppleCdhashError::CodeDirectoryMalformed {
            offset: self.offset,
            reason,
        };

        let length = read_u32_be(self.data, 4).map_err(|_| malformed("truncated header"))?;

        self.data
            .get(..length as usize)
            .ok_or_else(|| malformed("length exceeds available data"))
    }

    /// Compute the cdhash of this code directory.
    pub fn cdhash(&self) -> Result<CdHash, AppleCdhashError> {
        self.digest_type.cdhash(self.blob_data()?)
    }
}

/// Choose the code directory the cdhash is computed from.
///
/// Candidates are considered in order. A candidate replaces the current
/// choice only if it ranks strictly higher, so the first of equally ranked
/// candidates wins. The search starts from rank 0, so candidates with an
/// unranked digest type are never chosen.
///
/// Any error among the candidates is returned immediately.
pub fn select_code_directory<'a>(
    candidates: impl IntoIterator<Item = Result<CodeDirectoryRecord<'a>, AppleCdhashError>>,
) -> Result<CodeDirectoryRecord<'a>, AppleCdhashError> {
    let mut best: Option<CodeDirectoryRecord<'a>> = None;
    let mut best_rank = 0;

    for candidate in candidates {
        let candidate = candidate?;
        let rank = candidate.rank();

        debug!(
            "considering code directory in slot {:?} with digest type {} (rank {})",
            candidate.slot, candidate.digest_type, rank
        );

        if rank > best_rank {
            best = Some(candidate);
            best_rank = rank;
        }
    }

    let best = best.ok_or(AppleCdhashError::NoCodeDirectory)?;

    debug!(
        "selected code directory in slot {:?} with digest type {}",
        best.slot, best.digest_type
    );

    Ok(best)
}
