// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builders for synthetic Mach-O images and code signature data.

use {
    crate::embedded_signature::{
        CodeSigningMagic, DigestType, BLOB_INDEX_SIZE, SUPERBLOB_HEADER_SIZE,
    },
    goblin::mach::{
        cputype::CPU_TYPE_ARM64,
        header::{MH_EXECUTE, MH_MAGIC_64},
        load_command::{LC_CODE_SIGNATURE, LC_UUID},
    },
    scroll::IOwrite,
    std::io::{Cursor, Write},
};

/// Offset at which [assemble] places signature data.
pub const SIGNATURE_OFFSET: u32 = 0x1000;

/// Produce a load command with the given payload.
pub fn load_command(cmd: u32, payload: &[u8]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    cursor.iowrite_with(cmd, scroll::LE).unwrap();
    cursor
        .iowrite_with(8 + payload.len() as u32, scroll::LE)
        .unwrap();
    cursor.write_all(payload).unwrap();

    cursor.into_inner()
}

/// Produce an `LC_CODE_SIGNATURE` load command.
pub fn code_signature_command(dataoff: u32, datasize: u32) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&dataoff.to_le_bytes());
    payload.extend_from_slice(&datasize.to_le_bytes());

    load_command(LC_CODE_SIGNATURE, &payload)
}

/// Produce an arm64 executable `mach_header_64`.
pub fn macho_header(sizeofcmds: u32, ncmds: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::<u8>::new());

    for v in [
        MH_MAGIC_64,
        CPU_TYPE_ARM64,
        // CPU_SUBTYPE_ARM64_ALL
        0,
        MH_EXECUTE,
        ncmds,
        sizeofcmds,
        0,
        0,
    ] {
        cursor.iowrite_with(v, scroll::LE).unwrap();
    }

    cursor.into_inner()
}

/// Assemble a Mach-O image from load commands and signature data.
///
/// Load commands follow the header. The signature data is placed at
/// [SIGNATURE_OFFSET] and ends the image.
pub fn assemble(commands: &[Vec<u8>], signature: &[u8]) -> Vec<u8> {
    let sizeofcmds = commands.iter().map(|c| c.len()).sum::<usize>();

    let mut data = macho_header(sizeofcmds as u32, commands.len() as u32);
    for command in commands {
        data.extend_from_slice(command);
    }

    assert!(data.len() <= SIGNATURE_OFFSET as usize);
    data.resize(SIGNATURE_OFFSET as usize, 0);
    data.extend_from_slice(signature);

    data
}

/// Produce a Mach-O image whose `LC_CODE_SIGNATURE` covers `signature`.
///
/// Contains an `LC_UUID` (24 bytes) then an `LC_CODE_SIGNATURE` (16 bytes).
pub fn signed_macho(signature: &[u8]) -> Vec<u8> {
    assemble(
        &[
            load_command(LC_UUID, &[0; 16]),
            code_signature_command(SIGNATURE_OFFSET, signature.len() as u32),
        ],
        signature,
    )
}

/// Produce a code directory blob declaring `length` bytes.
///
/// The blob is never shorter than a code directory header, even if `length`
/// is. Bytes after the fields we care about follow a counting pattern.
pub fn code_directory(digest_type: DigestType, length: u32) -> Vec<u8> {
    let size = (length as usize).max(88);

    let mut data = (0..size).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    data[0..4].copy_from_slice(&u32::from(CodeSigningMagic::CodeDirectory).to_be_bytes());
    data[4..8].copy_from_slice(&length.to_be_bytes());
    // version
    data[8..12].copy_from_slice(&0x20400u32.to_be_bytes());
    data[37] = u8::from(digest_type);

    data
}

/// Produce an embedded signature super blob from `(slot, blob)` pairs.
///
/// Blobs are laid out after the index in the order given.
pub fn superblob(blobs: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut blob_data = Vec::new();
    let mut indices = Vec::with_capacity(blobs.len());

    let mut offset = (SUPERBLOB_HEADER_SIZE + BLOB_INDEX_SIZE * blobs.len()) as u32;

    for (slot, blob) in blobs {
        indices.push((*slot, offset));
        blob_data.extend_from_slice(blob);
        offset += blob.len() as u32;
    }

    raw_superblob(offset, blobs.len() as u32, &indices, &blob_data)
}

/// Produce a super blob with explicit header fields and index entries.
///
/// `payload` follows the index entries. Nothing is validated.
pub fn raw_superblob(length: u32, count: u32, indices: &[(u32, u32)], payload: &[u8]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::<u8>::new());

    cursor
        .iowrite_with(u32::from(CodeSigningMagic::EmbeddedSignature), scroll::BE)
        .unwrap();
    cursor.iowrite_with(length, scroll::BE).unwrap();
    cursor.iowrite_with(count, scroll::BE).unwrap();

    for (slot, offset) in indices {
        cursor.iowrite_with(*slot, scroll::BE).unwrap();
        cursor.iowrite_with(*offset, scroll::BE).unwrap();
    }

    cursor.write_all(payload).unwrap();

    cursor.into_inner()
}
