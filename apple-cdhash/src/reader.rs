// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading binaries and describing their code signature data.

use {
    crate::{
        code_directory::CodeDirectoryRecord,
        embedded_signature::CodeSignature,
        error::AppleCdhashError,
        macho::{is_macho64, MachOImage},
    },
    goblin::mach::{cputype::get_arch_name_from_types, fat::FAT_MAGIC, header::Header64, MultiArch},
    log::{debug, warn},
    scroll::Pread,
    serde::Serialize,
    std::path::Path,
};

/// Whether data looks like a universal (fat) Mach-O binary.
pub fn is_universal(data: &[u8]) -> bool {
    matches!(data.pread_with::<u32>(0, scroll::BE), Ok(FAT_MAGIC))
}

/// A single Mach-O binary within a file.
#[derive(Clone, Copy, Debug)]
pub struct MachOSlice<'a> {
    /// Index of this slice within a universal binary. 0 for thin binaries.
    pub index: usize,
    /// Name of the architecture, if known.
    pub arch: Option<&'static str>,
    /// Offset of this slice within the file.
    pub offset: usize,
    /// The slice's data.
    pub data: &'a [u8],
}

fn thin_arch(data: &[u8]) -> Option<&'static str> {
    if !is_macho64(data) {
        return None;
    }

    let header = data.pread_with::<Header64>(0, scroll::LE).ok()?;

    get_arch_name_from_types(header.cputype, header.cpusubtype)
}

/// Split data into the Mach-O binaries it contains.
///
/// A universal binary yields one slice per architecture. Anything else is
/// returned as a single slice covering all of `data`, whether or not it is a
/// Mach-O.
pub fn macho_slices(data: &[u8]) -> Result<Vec<MachOSlice<'_>>, AppleCdhashError> {
    if !is_universal(data) {
        return Ok(vec![MachOSlice {
            index: 0,
            arch: thin_arch(data),
            offset: 0,
            data,
        }]);
    }

    let multiarch = MultiArch::new(data)?;
    debug!("universal binary with {} architectures", multiarch.narches);

    let mut slices = vec![];

    for (index, arch) in multiarch.iter_arches().enumerate() {
        let arch = arch?;

        let start = arch.offset as usize;
        let slice_data = start
            .checked_add(arch.size as usize)
            .and_then(|end| data.get(start..end))
            .ok_or_else(|| {
                debug!(
                    "universal slice {} at offset {} size {} exceeds {} byte file",
                    index,
                    arch.offset,
                    arch.size,
                    data.len()
                );
                AppleCdhashError::UniversalSliceOutOfBounds { index }
            })?;

        slices.push(MachOSlice {
            index,
            arch: get_arch_name_from_types(arch.cputype, arch.cpusubtype),
            offset: start,
            data: slice_data,
        });
    }

    Ok(slices)
}

#[derive(Clone, Debug, Serialize)]
pub struct CodeDirectoryDescription {
    pub slot: String,
    pub offset: usize,
    pub length: u32,
    pub digest_type: String,
    pub rank: u8,
    /// Full digest of the code directory with its own digest type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub selected: bool,
}

impl<'a> From<&CodeDirectoryRecord<'a>> for CodeDirectoryDescription {
    fn from(record: &CodeDirectoryRecord<'a>) -> Self {
        let digest = record
            .blob_data()
            .and_then(|data| record.digest_type.digest_data(data))
            .ok()
            .map(hex::encode);

        Self {
            slot: format!("{:?}", record.slot),
            offset: record.offset,
            length: record.length,
            digest_type: record.digest_type.to_string(),
            rank: record.rank(),
            digest,
            selected: false,
        }
    }
}

/// Describes how the cdhash of a single Mach-O binary was derived.
///
/// Fields are filled in as far as processing got. If something failed, the
/// reason is in `error`.
#[derive(Clone, Debug, Serialize)]
pub struct SliceDescription {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    pub offset: usize,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_magic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub code_directories: Vec<CodeDirectoryDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdhash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SliceDescription {
    pub fn from_slice(slice: &MachOSlice) -> Self {
        let mut res = Self {
            index: slice.index,
            arch: slice.arch.map(|x| x.to_string()),
            offset: slice.offset,
            size: slice.data.len(),
            signature_offset: None,
            signature_size: None,
            signature_magic: None,
            blob_count: None,
            code_directories: vec![],
            cdhash: None,
            error: None,
        };

        if let Err(e) = res.populate(slice.data) {
            warn!("slice {}: {}", slice.index, e);
            res.error = Some(e.to_string());
        }

        res
    }

    fn populate(&mut self, data: &[u8]) -> Result<(), AppleCdhashError> {
        let image = MachOImage::parse(data)?;
        let region = image.code_signature_region()?;

        self.signature_offset = Some(region.offset);
        self.signature_size = Some(region.data.len());

        let signature = CodeSignature::from_region(&region)?;
        self.signature_magic = Some(format!("{:?}", signature.magic()));

        if let CodeSignature::SuperBlob(superblob) = &signature {
            self.blob_count = Some(superblob.count);
        }

        let mut records = vec![];
        for record in signature.code_directories() {
            let record = record?;
            self.code_directories
                .push(CodeDirectoryDescription::from(&record));
            records.push(record);
        }

        let selected = signature.selected_code_directory()?;

        for (description, record) in self.code_directories.iter_mut().zip(records.iter()) {
            description.selected = record.slot == selected.slot && record.offset == selected.offset;
        }

        self.cdhash = Some(selected.cdhash()?.as_hex());

        Ok(())
    }
}

/// Describe every Mach-O binary in data.
pub fn describe_data(data: &[u8]) -> Result<Vec<SliceDescription>, AppleCdhashError> {
    Ok(macho_slices(data)?
        .iter()
        .map(SliceDescription::from_slice)
        .collect::<Vec<_>>())
}

/// Describe every Mach-O binary in the file at `path`.
pub fn describe_path(path: impl AsRef<Path>) -> Result<Vec<SliceDescription>, AppleCdhashError> {
    let path = path.as_ref();
    debug!("reading {}", path.display());

    let data = std::fs::read(path)?;

    describe_data(&data)
}
