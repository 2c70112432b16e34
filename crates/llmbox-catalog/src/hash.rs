//! Content hashing of model files.
//!
//! The algorithm is inferred from the expected digest: 32 hex characters is
//! MD5, 64 is SHA-256.

use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::errors::CatalogError;

const READ_BUF: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Pick the algorithm matching an expected hex digest.
    pub fn for_digest(expected: &str) -> Result<Self, CatalogError> {
        if !expected.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CatalogError::UnsupportedHash(expected.to_owned()));
        }
        match expected.len() {
            32 => Ok(Self::Md5),
            64 => Ok(Self::Sha256),
            _ => Err(CatalogError::UnsupportedHash(expected.to_owned())),
        }
    }

    /// Lowercase hex digest of the file at `path`.
    pub async fn digest_file(self, path: &Path) -> Result<String, CatalogError> {
        match self {
            Self::Md5 => digest_file::<Md5>(path).await,
            Self::Sha256 => digest_file::<Sha256>(path).await,
        }
    }
}

async fn digest_file<D: Digest>(path: &Path) -> Result<String, CatalogError>
where
    sha2::digest::Output<D>: std::fmt::LowerHex,
{
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CatalogError::io(path, e))?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| CatalogError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether the file at `path` exists and hashes to `expected`.
///
/// A missing file is `Ok(false)`. An unrecognised digest format is an error.
pub async fn file_matches(path: &Path, expected: &str) -> Result<bool, CatalogError> {
    let algorithm = HashAlgorithm::for_digest(expected)?;
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(false);
    }
    let actual = algorithm.digest_file(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// Hash the file at `path` and fail with [`CatalogError::HashMismatch`]
/// unless it equals `expected`.
pub async fn verify_file(path: &Path, filename: &str, expected: &str) -> Result<(), CatalogError> {
    let actual = HashAlgorithm::for_digest(expected)?
        .digest_file(path)
        .await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CatalogError::HashMismatch {
            filename: filename.to_owned(),
            expected: expected.to_owned(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Digests of b"hello world".
    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn hello_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"hello world").unwrap();
        file
    }

    #[test]
    fn algorithm_by_length() {
        assert_eq!(HashAlgorithm::for_digest(HELLO_MD5).unwrap(), HashAlgorithm::Md5);
        assert_eq!(
            HashAlgorithm::for_digest(HELLO_SHA256).unwrap(),
            HashAlgorithm::Sha256
        );
        assert!(HashAlgorithm::for_digest("abc").is_err());
        assert!(HashAlgorithm::for_digest("").is_err());
        assert!(HashAlgorithm::for_digest(&"z".repeat(32)).is_err());
    }

    #[tokio::test]
    async fn md5_and_sha256_digests() {
        let file = hello_file();
        assert_eq!(
            HashAlgorithm::Md5.digest_file(file.path()).await.unwrap(),
            HELLO_MD5
        );
        assert_eq!(
            HashAlgorithm::Sha256.digest_file(file.path()).await.unwrap(),
            HELLO_SHA256
        );
    }

    #[tokio::test]
    async fn matches_is_case_insensitive() {
        let file = hello_file();
        assert!(file_matches(file.path(), &HELLO_MD5.to_uppercase()).await.unwrap());
    }

    #[tokio::test]
    async fn mismatch_and_missing() {
        let file = hello_file();
        assert!(!file_matches(file.path(), &"0".repeat(32)).await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        assert!(!file_matches(&dir.path().join("absent"), HELLO_MD5).await.unwrap());
    }

    #[tokio::test]
    async fn verify_reports_both_digests() {
        let file = hello_file();
        verify_file(file.path(), "hello.bin", HELLO_SHA256).await.unwrap();

        let wrong = "0".repeat(32);
        match verify_file(file.path(), "hello.bin", &wrong).await {
            Err(CatalogError::HashMismatch {
                filename,
                expected,
                actual,
            }) => {
                assert_eq!(filename, "hello.bin");
                assert_eq!(expected, wrong);
                assert_eq!(actual, HELLO_MD5);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
