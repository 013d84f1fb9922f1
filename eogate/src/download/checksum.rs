//! SHA-256 verification of downloaded payloads.
//!
//! Providers publish digests as `sha256:<hex>` or as bare hex. Digests in
//! other algorithms (`md5:...`) cannot be checked and are skipped with a
//! warning.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

/// Read buffer while hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

const SHA256_HEX_LEN: usize = 64;

/// Normalizes a published digest to lowercase SHA-256 hex.
///
/// Returns `None` for digests this crate cannot verify.
pub fn parse_expected(published: &str) -> Option<String> {
    let published = published.trim();
    let hex = match published.split_once(':') {
        Some((algorithm, hex)) if algorithm.eq_ignore_ascii_case("sha256") => hex,
        Some(_) => return None,
        None => published,
    };
    (hex.len() == SHA256_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| hex.to_ascii_lowercase())
}

/// Lowercase hex SHA-256 of a file.
pub fn calculate_file_checksum(path: &Path) -> GatewayResult<String> {
    let mut file = File::open(path).map_err(|e| GatewayError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).map_err(|e| GatewayError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Outcome of comparing a file to its published digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Matched,
    Mismatched { expected: String, actual: String },
    /// No digest, or one in an unsupported algorithm.
    Unchecked,
}

/// Hashes `path` off the async runtime and compares it to `published`.
pub async fn check(path: &Path, published: Option<&str>) -> GatewayResult<Verification> {
    let Some(published) = published else {
        return Ok(Verification::Unchecked);
    };
    let Some(expected) = parse_expected(published) else {
        warn!(path = %path.display(), checksum = %published, "Unsupported checksum, not verified");
        return Ok(Verification::Unchecked);
    };
    let owned: PathBuf = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || calculate_file_checksum(&owned))
        .await
        .map_err(|e| GatewayError::Configuration(format!("checksum task failed: {}", e)))??;
    debug!(path = %path.display(), matched = actual == expected, "Checksum computed");
    Ok(if actual == expected {
        Verification::Matched
    } else {
        Verification::Mismatched { expected, actual }
    })
}

/// Verifies a finished download, deleting it on mismatch.
///
/// # Errors
///
/// `Integrity` when the digest does not match; the file is gone by then.
pub async fn verify_or_remove(path: &Path, published: Option<&str>, product: &str) -> GatewayResult<()> {
    match check(path, published).await? {
        Verification::Mismatched { expected, actual } => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "Cannot remove corrupt download");
            }
            Err(GatewayError::Integrity {
                product: product.to_string(),
                expected,
                actual,
            })
        }
        Verification::Matched | Verification::Unchecked => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(content).unwrap();
        path
    }

    #[test]
    fn test_calculate_file_checksum() {
        let temp = TempDir::new().unwrap();
        assert_eq!(calculate_file_checksum(&write(&temp, "a", b"hello world")).unwrap(), HELLO_WORLD);
        assert_eq!(
            calculate_file_checksum(&write(&temp, "empty", b"")).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(calculate_file_checksum(Path::new("/nonexistent/file")).is_err());
    }

    #[test]
    fn test_parse_expected_forms() {
        let upper = HELLO_WORLD.to_ascii_uppercase();
        assert_eq!(parse_expected(HELLO_WORLD).as_deref(), Some(HELLO_WORLD));
        assert_eq!(parse_expected(&format!("sha256:{}", upper)).as_deref(), Some(HELLO_WORLD));
        assert_eq!(parse_expected("md5:5eb63bbbe01eeed093cb22bb8f5acdc3"), None);
        assert_eq!(parse_expected("abc"), None);
    }

    #[tokio::test]
    async fn test_mismatch_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "payload", b"hello world!");
        let result = verify_or_remove(&path, Some(HELLO_WORLD), "S2A_X").await;
        match result {
            Err(GatewayError::Integrity { product, expected, .. }) => {
                assert_eq!(product, "S2A_X");
                assert_eq!(expected, HELLO_WORLD);
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_match_and_unchecked_keep_file() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "payload", b"hello world");
        verify_or_remove(&path, Some(&format!("sha256:{}", HELLO_WORLD)), "p").await.unwrap();
        verify_or_remove(&path, Some("md5:whatever"), "p").await.unwrap();
        verify_or_remove(&path, None, "p").await.unwrap();
        assert!(path.exists());
    }
}
