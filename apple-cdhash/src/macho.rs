// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mach-O primitives related to code signing.
//!
//! Only 64-bit Mach-O images are supported. The header and load command
//! list are validated before anything in them is trusted. Once
//! [MachOImage::parse] succeeds, the load command list is known to tile the
//! declared `sizeofcmds` exactly, so walking it can't leave the image.

use {
    crate::error::AppleCdhashError,
    goblin::mach::{
        header::{Header64, MH_MAGIC_64, SIZEOF_HEADER_64},
        load_command::{LinkeditDataCommand, LoadCommandHeader, LC_CODE_SIGNATURE},
    },
    log::debug,
    scroll::Pread,
};

/// Images smaller than this are never considered Mach-O binaries.
pub const MINIMUM_MACHO_SIZE: usize = 0x1000;

/// Load commands at least this large are rejected.
pub const LOAD_COMMAND_SIZE_LIMIT: u32 = 0x8000_0000;

/// Size of the `cmd` and `cmdsize` fields common to all load commands.
const SIZEOF_LOAD_COMMAND: usize = 8;

/// Whether data looks like a 64-bit Mach-O binary.
///
/// This only looks at the size and the magic.
pub fn is_macho64(data: &[u8]) -> bool {
    data.len() >= MINIMUM_MACHO_SIZE
        && matches!(data.pread_with::<u32>(0, scroll::LE), Ok(MH_MAGIC_64))
}

/// A 64-bit Mach-O image whose load commands have been validated.
#[derive(Clone, Copy)]
pub struct MachOImage<'a> {
    data: &'a [u8],
    header: Header64,
}

impl<'a> std::fmt::Debug for MachOImage<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachOImage")
            .field("size", &self.data.len())
            .field("header", &self.header)
            .finish()
    }
}

impl<'a> MachOImage<'a> {
    /// Parse and validate a 64-bit Mach-O image.
    pub fn parse(data: &'a [u8]) -> Result<Self, AppleCdhashError> {
        if !is_macho64(data) {
            debug!("data is not a 64-bit Mach-O ({} bytes)", data.len());
            return Err(AppleCdhashError::NotMachO);
        }

        let header = data
            .pread_with::<Header64>(0, scroll::LE)
            .map_err(|_| AppleCdhashError::NotMachO)?;

        let image = Self { data, header };
        image.validate_load_commands()?;

        Ok(image)
    }

    /// Offset of the end of the load commands list.
    fn load_commands_end(&self) -> usize {
        SIZEOF_HEADER_64 + self.header.sizeofcmds as usize
    }

    fn validate_load_commands(&self) -> Result<(), AppleCdhashError> {
        let malformed = |reason: &'static str| {
            debug!("rejecting Mach-O: {}", reason);
            AppleCdhashError::LoadCommandsMalformed(reason)
        };

        if self.header.sizeofcmds as usize > self.data.len() - SIZEOF_HEADER_64 {
            return Err(malformed("load commands exceed file size"));
        }

        let end = self.load_commands_end();
        let mut offset = SIZEOF_HEADER_64;

        while offset < end {
            if end - offset < SIZEOF_LOAD_COMMAND {
                return Err(malformed("truncated load command"));
            }

            let lc = self
                .data
                .pread_with::<LoadCommandHeader>(offset, scroll::LE)
                .map_err(|_| malformed("truncated load command"))?;

            if lc.cmdsize >= LOAD_COMMAND_SIZE_LIMIT {
                return Err(malformed("load command too large"));
            }

            if (lc.cmdsize as usize) < SIZEOF_LOAD_COMMAND {
                return Err(malformed("load command too small"));
            }

            offset = match offset.checked_add(lc.cmdsize as usize) {
                Some(next) if next <= end => next,
                _ => return Err(malformed("load command extends past end of load commands")),
            };
        }

        Ok(())
    }

    /// The Mach-O header.
    pub fn header(&self) -> &Header64 {
        &self.header
    }

    /// The raw image data.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Iterate over load commands in the order they appear in the image.
    pub fn load_commands(&self) -> LoadCommandIter<'a> {
        LoadCommandIter {
            data: self.data,
            offset: SIZEOF_HEADER_64,
            end: self.load_commands_end(),
        }
    }

    /// Find the first `LC_CODE_SIGNATURE` load command.
    pub fn code_signature_load_command(
        &self,
    ) -> Result<Option<LinkeditDataCommand>, AppleCdhashError> {
        for (offset, lc) in self.load_commands() {
            if lc.cmd == LC_CODE_SIGNATURE {
                let command = self
                    .data
                    .pread_with::<LinkeditDataCommand>(offset, scroll::LE)
                    .map_err(|_| {
                        AppleCdhashError::LoadCommandsMalformed("truncated code signature command")
                    })?;

                return Ok(Some(command));
            }
        }

        Ok(None)
    }

    /// Resolve the region of the image holding code signature data.
    ///
    /// The region must start after the Mach-O header, be non-empty and end
    /// within the image.
    pub fn code_signature_region(&self) -> Result<SignatureRegion<'a>, AppleCdhashError> {
        let command = self.code_signature_load_command()?.ok_or_else(|| {
            debug!("no LC_CODE_SIGNATURE load command");
            AppleCdhashError::BinaryNoCodeSignature
        })?;

        let out_of_bounds = || {
            debug!(
                "code signature region out of bounds: offset {} size {} image {}",
                command.dataoff,
                command.datasize,
                self.data.len()
            );
            AppleCdhashError::SignatureOutOfBounds {
                offset: command.dataoff,
                size: command.datasize,
            }
        };

        let start = command.dataoff as usize;
        let end = start
            .checked_add(command.datasize as usize)
            .ok_or_else(out_of_bounds)?;

        if start <= SIZEOF_HEADER_64 || start >= end || end > self.data.len() {
            return Err(out_of_bounds());
        }

        let data = self.data.get(start..end).ok_or_else(out_of_bounds)?;

        debug!("code signature data at offset {} ({} bytes)", start, data.len());

        Ok(SignatureRegion {
            offset: start,
            data,
        })
    }
}

/// Iterator over the load commands of a [MachOImage].
///
/// Yields the offset of each load command and its header.
pub struct LoadCommandIter<'a> {
    data: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> Iterator for LoadCommandIter<'a> {
    type Item = (usize, LoadCommandHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let offset = self.offset;

        match self.data.pread_with::<LoadCommandHeader>(offset, scroll::LE) {
            Ok(lc) if lc.cmdsize as usize >= SIZEOF_LOAD_COMMAND => {
                self.offset = offset.saturating_add(lc.cmdsize as usize);
                Some((offset, lc))
            }
            _ => {
                self.offset = self.end;
                None
            }
        }
    }
}

/// The bytes of a Mach-O image referenced by `LC_CODE_SIGNATURE`.
#[derive(Clone, Copy, Debug)]
pub struct SignatureRegion<'a> {
    /// Offset of the region within the image.
    pub offset: usize,
    /// The region's data.
    pub data: &'a [u8],
}
