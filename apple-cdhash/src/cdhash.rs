// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Computing the cdhash of a Mach-O binary.

use {
    crate::{embedded_signature::CodeSignature, error::AppleCdhashError, macho::MachOImage},
    log::debug,
};

/// Length in bytes of a cdhash.
pub const CDHASH_LEN: usize = 20;

/// The code directory hash of a signed binary.
///
/// This is the digest of the selected code directory, truncated to 20
/// bytes if the algorithm produces more.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CdHash([u8; CDHASH_LEN]);

impl CdHash {
    /// Construct an instance from the leading bytes of a digest.
    ///
    /// Digests shorter than [CDHASH_LEN] are zero-padded. No supported
    /// algorithm produces one.
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        let mut value = [0u8; CDHASH_LEN];
        let len = digest.len().min(CDHASH_LEN);
        value[0..len].copy_from_slice(&digest[0..len]);

        Self(value)
    }

    pub fn as_bytes(&self) -> &[u8; CDHASH_LEN] {
        &self.0
    }

    /// Lowercase hex encoding of the cdhash.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for CdHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("CdHash({})", self.as_hex()))
    }
}

impl std::fmt::Display for CdHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl AsRef<[u8]> for CdHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<CdHash> for [u8; CDHASH_LEN] {
    fn from(v: CdHash) -> Self {
        v.0
    }
}

/// Compute the cdhash of a 64-bit Mach-O binary.
///
/// `data` is the complete binary. It is only read.
pub fn compute_cdhash(data: &[u8]) -> Result<CdHash, AppleCdhashError> {
    let image = MachOImage::parse(data)?;
    let region = image.code_signature_region()?;

    let signature = CodeSignature::from_region(&region)?;
    debug!("code signature blob has magic {:?}", signature.magic());

    let record = signature.selected_code_directory()?;
    let cdhash = record.cdhash()?;

    debug!(
        "cdhash from {} code directory in slot {:?}: {}",
        record.digest_type, record.slot, cdhash
    );

    Ok(cdhash)
}

/// Compute the cdhash of a 64-bit Mach-O binary into a caller-provided buffer.
///
/// Returns `true` on success. `output` is only written to on success.
pub fn compute_cdhash_into(data: &[u8], output: &mut [u8; CDHASH_LEN]) -> bool {
    match compute_cdhash(data) {
        Ok(cdhash) => {
            output.copy_from_slice(cdhash.as_bytes());
            true
        }
        Err(e) => {
            debug!("unable to compute cdhash: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            embedded_signature::DigestType,
            testutil::{code_directory, raw_superblob, signed_macho, superblob},
        },
    };

    fn sha256_prefix(data: &[u8]) -> Vec<u8> {
        ring::digest::digest(&ring::digest::SHA256, data).as_ref()[0..20].to_vec()
    }

    fn sha1(data: &[u8]) -> Vec<u8> {
        ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data)
            .as_ref()
            .to_vec()
    }

    #[test]
    fn bare_code_directory() {
        let cd = code_directory(DigestType::Sha256, 256);
        let macho = signed_macho(&cd);

        let cdhash = compute_cdhash(&macho).unwrap();
        assert_eq!(cdhash.as_bytes().to_vec(), sha256_prefix(&cd));
        assert_eq!(cdhash.as_hex(), hex::encode(sha256_prefix(&cd)));
    }

    #[test]
    fn superblob_prefers_sha256() {
        let sha1_cd = code_directory(DigestType::Sha1, 160);
        let sha256_cd = code_directory(DigestType::Sha256, 200);

        let macho = signed_macho(&superblob(&[
            (0, sha1_cd.clone()),
            (2, vec![0xfa, 0xde, 0x0c, 0x01, 0, 0, 0, 12, 0, 0, 0, 0]),
            (0x1000, sha256_cd.clone()),
            (0x10000, vec![0xfa, 0xde, 0x0b, 0x01, 0, 0, 0, 8]),
        ]));

        assert_eq!(
            compute_cdhash(&macho).unwrap().as_bytes().to_vec(),
            sha256_prefix(&sha256_cd)
        );
    }

    #[test]
    fn superblob_sha1_only() {
        let cd = code_directory(DigestType::Sha1, 160);
        let macho = signed_macho(&superblob(&[(0, cd.clone())]));

        assert_eq!(compute_cdhash(&macho).unwrap().as_bytes().to_vec(), sha1(&cd));
    }

    #[test]
    fn deterministic() {
        let macho = signed_macho(&superblob(&[
            (0, code_directory(DigestType::Sha1, 100)),
            (0x1000, code_directory(DigestType::Sha256, 100)),
        ]));

        assert_eq!(compute_cdhash(&macho).unwrap(), compute_cdhash(&macho).unwrap());
    }

    #[test]
    fn declared_length_shorter_than_header() {
        // One index entry, so the code directory starts at 12 + 8 = 20. 88
        // bytes follow it but the code directory claims only 32 of them.
        let cd = code_directory(DigestType::Sha256, 32);
        assert_eq!(cd.len(), 88);

        let blob = raw_superblob(108, 1, &[(0, 20)], &cd);
        assert_eq!(blob.len(), 108);

        let cdhash = compute_cdhash(&signed_macho(&blob)).unwrap();
        assert_eq!(cdhash.as_bytes().to_vec(), sha256_prefix(&cd[0..32]));
    }

    #[test]
    fn unsupported_digest() {
        let macho = signed_macho(&code_directory(DigestType::Sha384, 100));

        assert!(matches!(
            compute_cdhash(&macho),
            Err(AppleCdhashError::DigestUnsupportedAlgorithm(DigestType::Sha384))
        ));
    }

    #[test]
    fn superblob_unranked_only() {
        let macho = signed_macho(&superblob(&[(0, code_directory(DigestType::Sha512, 100))]));

        assert!(matches!(
            compute_cdhash(&macho),
            Err(AppleCdhashError::NoCodeDirectory)
        ));
    }

    #[test]
    fn not_macho() {
        assert!(matches!(
            compute_cdhash(&[0u8; 8192]),
            Err(AppleCdhashError::NotMachO)
        ));
        assert!(matches!(compute_cdhash(&[]), Err(AppleCdhashError::NotMachO)));
    }

    #[test]
    fn into_buffer() {
        let cd = code_directory(DigestType::Sha256, 128);
        let macho = signed_macho(&cd);

        let mut output = [0u8; CDHASH_LEN];
        assert!(compute_cdhash_into(&macho, &mut output));
        assert_eq!(output.to_vec(), sha256_prefix(&cd));
    }

    #[test]
    fn into_buffer_untouched_on_failure() {
        let mut cd = code_directory(DigestType::Sha256, 128);
        cd[0] = 0;
        let macho = signed_macho(&cd);

        let mut output = [0xaa; CDHASH_LEN];
        assert!(!compute_cdhash_into(&macho, &mut output));
        assert_eq!(output, [0xaa; CDHASH_LEN]);
    }

    #[test]
    fn display() {
        let cdhash = CdHash::from_digest(&[0x01; 32]);
        assert_eq!(format!("{}", cdhash), "01".repeat(20));
        assert_eq!(format!("{:?}", cdhash), format!("CdHash({})", "01".repeat(20)));

        let bytes: [u8; CDHASH_LEN] = cdhash.into();
        assert_eq!(bytes, [0x01; CDHASH_LEN]);
    }
}
