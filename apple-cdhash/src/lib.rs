// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code directory hash (cdhash) computation for Apple binaries.
//!
//! The cdhash of a signed Mach-O binary is the digest of its code directory,
//! the signed blob describing the binary's content. Apple operating systems
//! identify signed code by its cdhash. This crate computes the same cdhash
//! the kernel would without any dependency on an Apple operating system or
//! its signature verification machinery.
//!
//! Input binaries are untrusted. Every offset, length and count read from a
//! binary is validated before it is used and no input can cause a read
//! outside the data provided.
//!
//! # Features and Capabilities
//!
//! This crate can:
//!
//! * Validate a 64-bit Mach-O header and its load commands. (See [MachOImage].)
//! * Find the code signature data referenced by `LC_CODE_SIGNATURE`. (See
//!   [MachOImage::code_signature_region].)
//! * Parse embedded signature super blobs and bare code directories. (See
//!   [CodeSignature] and [SuperBlob].)
//! * Pick the code directory the kernel would use when a signature contains
//!   several. (See [select_code_directory].)
//! * Compute the cdhash. (See [compute_cdhash].)
//! * Split universal binaries into their per-architecture slices and describe
//!   how each slice's cdhash was derived. (See [macho_slices] and
//!   [describe_path].)
//!
//! This crate does not verify signatures. A binary with a correct cdhash may
//! still have an invalid or missing CMS signature.
//!
//! # Supported digests
//!
//! Code directories using SHA-1 and SHA-256 (including truncated SHA-256) can
//! have their cdhash computed. SHA-384 code directories are ranked so they are
//! selected when present, but computing their cdhash is an error.

mod cdhash;
pub use cdhash::*;
mod code_directory;
pub use code_directory::*;
pub mod embedded_signature;
pub use embedded_signature::*;
mod error;
pub use error::*;
mod macho;
pub use macho::*;
mod reader;
pub use reader::*;
#[cfg(test)]
mod testutil;
