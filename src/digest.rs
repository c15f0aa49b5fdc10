/*
 * Copyright 2023-2025 the ocfl-store authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use digest::DynDigest;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

use crate::error::{Error, Result};

/// The size of the buffer to use when streaming bytes through a digest.
const BUFFER_SIZE: usize = 1024 * 16;

/// A cryptographic digest algorithm known to this crate.
///
/// `Sha256` and `Sha512` may be used as an inventory's primary
/// `digestAlgorithm`; `Md5` is only valid in the fixity block and for
/// store-side transfer checksums.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DigestAlgorithm {
    /// MD5
    #[serde(rename = "md5")]
    Md5,

    /// SHA-256
    #[serde(rename = "sha256")]
    Sha256,

    /// SHA-512
    #[serde(rename = "sha512")]
    Sha512,
}

impl DigestAlgorithm {
    /// The name of this algorithm as it appears in inventories and sidecar
    /// file extensions.
    pub fn ocfl_name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Whether this algorithm may be used as an inventory's primary
    /// `digestAlgorithm`.
    pub fn supports_content_addressing(&self) -> bool {
        matches!(self, DigestAlgorithm::Sha256 | DigestAlgorithm::Sha512)
    }

    /// Return a new incremental hasher for this algorithm.
    pub fn hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            DigestAlgorithm::Md5 => Box::new(Md5::default()),
            DigestAlgorithm::Sha256 => Box::new(Sha256::default()),
            DigestAlgorithm::Sha512 => Box::new(Sha512::default()),
        }
    }

    /// Compute the lower-case hex digest of the given bytes.
    pub fn hash_hex(&self, bytes: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Stream the given reader to EOF and return its lower-case hex digest.
    ///
    /// # Errors
    /// - `Error::Io`: An I/O error occurred.
    pub fn hash_reader(&self, mut reader: impl Read) -> Result<String> {
        let mut hasher = self.hasher();
        let mut buffer = [0u8; BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Compute the lower-case hex digest of the file at `path`.
    ///
    /// # Errors
    /// - `Error::Io`: The file could not be opened or read.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        self.hash_reader(File::open(path)?)
    }
}

impl Display for DigestAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.ocfl_name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(Error::InvalidValue(format!(
                "unknown digest algorithm: {}",
                value
            ))),
        }
    }
}

/// A reader that verifies the bytes it produces against a declared digest.
///
/// The check fires once, when the underlying reader reaches EOF. Dropping the
/// reader before EOF never raises the fixity failure. [`FixityCheckReader::verify`]
/// can be called after EOF to surface the result as a [`crate::Error`] instead
/// of an `io::Error`.
pub struct FixityCheckReader<R: Read> {
    inner: R,
    hasher: Box<dyn DynDigest + Send>,
    algorithm: DigestAlgorithm,
    expected: String,
    /// The caller-facing name of the content, used in error messages.
    path: String,
    failure: Option<String>,
    checked: bool,
}

impl<R: Read> FixityCheckReader<R> {
    /// Wrap `inner`, expecting its complete contents to hash to `expected`.
    pub fn new(inner: R, algorithm: DigestAlgorithm, expected: &str, path: &str) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
            algorithm,
            expected: expected.to_ascii_lowercase(),
            path: path.to_owned(),
            failure: None,
            checked: false,
        }
    }

    fn check(&mut self) -> io::Result<()> {
        if self.checked {
            return match &self.failure {
                None => Ok(()),
                Some(actual) => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "fixity check of {} failed: expected {} digest {}; found {}",
                        self.path, self.algorithm, self.expected, actual
                    ),
                )),
            };
        }

        self.checked = true;
        let actual = hex::encode(self.hasher.finalize_reset());
        if actual != self.expected {
            self.failure = Some(actual);
        }
        self.check()
    }

    /// Read the remaining bytes, discard them, and verify the digest.
    ///
    /// # Errors
    /// - `Error::FixityCheck`: The computed digest does not match.
    /// - `Error::Io`: An I/O error occurred.
    pub fn verify(mut self) -> Result<()> {
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let bytes_read = self.inner.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            self.hasher.update(&buffer[..bytes_read]);
        }

        // The check may already have run if a read() hit EOF first.
        if !self.checked {
            self.checked = true;
            let actual = hex::encode(self.hasher.finalize_reset());
            if actual != self.expected {
                self.failure = Some(actual);
            }
        }

        match self.failure {
            None => Ok(()),
            Some(actual) => Err(Error::FixityCheck {
                algorithm: self.algorithm,
                expected: self.expected,
                actual,
                path: self.path,
            }),
        }
    }
}

impl<R: Read> Read for FixityCheckReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.inner.read(buf)?;

        if bytes_read == 0 {
            self.check()?;
        } else {
            self.hasher.update(&buf[..bytes_read]);
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";

    #[test]
    fn hash_known_vectors() {
        assert_eq!(DigestAlgorithm::Sha256.hash_hex(b"abc"), ABC_SHA256);
        assert_eq!(DigestAlgorithm::Md5.hash_hex(b"abc"), ABC_MD5);
        assert_eq!(
            DigestAlgorithm::Sha256.hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_reader_matches_hash_hex() -> anyhow::Result<()> {
        let digest = DigestAlgorithm::Sha512.hash_reader(Cursor::new(b"some test data".to_vec()))?;
        assert_eq!(digest, DigestAlgorithm::Sha512.hash_hex(b"some test data"));
        Ok(())
    }

    #[test]
    fn fixity_reader_accepts_matching_digest() -> anyhow::Result<()> {
        let mut reader =
            FixityCheckReader::new(Cursor::new(b"abc".to_vec()), DigestAlgorithm::Sha256, ABC_SHA256, "a.txt");
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        assert_eq!(out, b"abc");
        Ok(())
    }

    #[test]
    fn fixity_reader_fails_at_eof_on_mismatch() {
        let mut reader = FixityCheckReader::new(
            Cursor::new(b"abd".to_vec()),
            DigestAlgorithm::Sha256,
            ABC_SHA256,
            "a.txt",
        );
        let mut out = Vec::new();
        let error = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn fixity_reader_dropped_early_does_not_fail() -> anyhow::Result<()> {
        let mut reader = FixityCheckReader::new(
            Cursor::new(vec![0u8; 1024]),
            DigestAlgorithm::Sha256,
            ABC_SHA256,
            "a.txt",
        );
        let mut buf = [0u8; 16];
        reader.read(&mut buf)?;
        drop(reader);
        Ok(())
    }

    #[test]
    fn verify_reports_fixity_error_with_path() {
        let reader = FixityCheckReader::new(
            Cursor::new(b"abd".to_vec()),
            DigestAlgorithm::Sha256,
            ABC_SHA256,
            "dir/a.txt",
        );
        match reader.verify() {
            Err(Error::FixityCheck { path, expected, .. }) => {
                assert_eq!(path, "dir/a.txt");
                assert_eq!(expected, ABC_SHA256);
            }
            other => panic!("expected fixity error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn uppercase_expected_digest_is_normalized() -> anyhow::Result<()> {
        let reader = FixityCheckReader::new(
            Cursor::new(b"abc".to_vec()),
            DigestAlgorithm::Sha256,
            &ABC_SHA256.to_ascii_uppercase(),
            "a.txt",
        );
        reader.verify()?;
        Ok(())
    }
}
