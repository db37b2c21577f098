// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Post-transfer image verification

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use sha2::Digest;

/// Hash the peer announces in the footer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    None,
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0 => Some(HashAlgorithm::None),
            1 => Some(HashAlgorithm::Md5),
            2 => Some(HashAlgorithm::Sha1),
            3 => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Length of the ASCII hex digest carried by the hash message.
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::None => 0,
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::None => "none",
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Upper-case hex digest of the whole file, `None` for the no-op hash.
    pub fn hex_digest(&self, path: &Path) -> io::Result<Option<String>> {
        match self {
            HashAlgorithm::None => Ok(None),
            HashAlgorithm::Md5 => file_digest::<md5::Md5>(path).map(Some),
            HashAlgorithm::Sha1 => file_digest::<sha1::Sha1>(path).map(Some),
            HashAlgorithm::Sha256 => file_digest::<sha2::Sha256>(path).map(Some),
        }
    }

    /// Compares the file digest against the digest received from the peer.
    ///
    /// The no-op hash accepts any file. Comparison is case-insensitive.
    pub fn verify(&self, path: &Path, expected: &str) -> io::Result<bool> {
        match self.hex_digest(path)? {
            None => Ok(true),
            Some(actual) => Ok(actual == expected.to_ascii_uppercase()),
        }
    }
}

fn file_digest<D: Digest>(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode_upper(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("abc.img");
        std::fs::write(&path, b"abc").expect("Should write file");
        (dir, path)
    }

    #[test]
    fn test_selectors() {
        assert_eq!(HashAlgorithm::from_selector(0), Some(HashAlgorithm::None));
        assert_eq!(HashAlgorithm::from_selector(3), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::from_selector(4), None);

        let lens: Vec<usize> = (0..4u8)
            .filter_map(HashAlgorithm::from_selector)
            .map(|h| h.digest_len())
            .collect();
        assert_eq!(lens, vec![0, 32, 40, 64]);
    }

    #[test]
    fn test_known_digests() {
        let (_dir, path) = abc_file();

        assert_eq!(
            HashAlgorithm::Md5.hex_digest(&path).unwrap().as_deref(),
            Some("900150983CD24FB0D6963F7D28E17F72")
        );
        assert_eq!(
            HashAlgorithm::Sha1.hex_digest(&path).unwrap().as_deref(),
            Some("A9993E364706816ABA3E25717850C26C9CD0D89D")
        );
        assert_eq!(
            HashAlgorithm::Sha256.hex_digest(&path).unwrap().as_deref(),
            Some("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD")
        );
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let (_dir, path) = abc_file();

        assert!(HashAlgorithm::Md5.verify(&path, "900150983cd24fb0d6963f7d28e17f72").unwrap());
        assert!(HashAlgorithm::Md5.verify(&path, "900150983CD24FB0D6963F7D28E17F72").unwrap());
        assert!(!HashAlgorithm::Md5.verify(&path, "000150983CD24FB0D6963F7D28E17F72").unwrap());
        assert!(!HashAlgorithm::Sha1.verify(&path, "").unwrap());
    }

    #[test]
    fn test_none_always_verifies() {
        let (_dir, path) = abc_file();
        assert!(HashAlgorithm::None.verify(&path, "").unwrap());
        assert!(HashAlgorithm::None.verify(&path, "garbage").unwrap());
        // the file is never opened for the no-op hash
        assert!(HashAlgorithm::None.verify(Path::new("/nonexistent/disk.img"), "").unwrap());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = HashAlgorithm::Sha256.verify(Path::new("/nonexistent/disk.img"), "00");
        assert!(result.is_err());
    }
}
