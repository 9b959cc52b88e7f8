//! Content checksums for migration files
//!
//! The same algorithm is used everywhere a migration's content needs a stable fingerprint:
//! discovery (`MigrationStore`), recording (`MigrationTracker`), and drift detection
//! (`MigrationRunner::verify`).

use sha2::{Digest, Sha256};

/// Stable content hash of a migration file's bytes, normalized by stripping a single
/// trailing newline so that editors that enforce "file ends with newline" don't produce
/// spurious drift against content written before that convention was adopted.
pub fn checksum(bytes: &[u8]) -> String {
    let normalized = strip_trailing_newline(bytes);
    let mut hasher = Sha256::new();
    hasher.update(normalized);
    hex::encode(hasher.finalize())
}

fn strip_trailing_newline(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && (bytes[end - 1] == b'\n' || bytes[end - 1] == b'\r') {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_same_checksum() {
        assert_eq!(checksum(b"select 1;"), checksum(b"select 1;"));
    }

    #[test]
    fn trailing_newline_does_not_affect_checksum() {
        assert_eq!(checksum(b"select 1;"), checksum(b"select 1;\n"));
        assert_eq!(checksum(b"select 1;"), checksum(b"select 1;\r\n"));
    }

    #[test]
    fn multiple_trailing_newlines_do_not_affect_checksum() {
        assert_eq!(checksum(b"select 1;"), checksum(b"select 1;\n\n"));
        assert_eq!(checksum(b"select 1;"), checksum(b"select 1;\n\n\n"));
    }

    #[test]
    fn interior_whitespace_changes_checksum() {
        assert_ne!(checksum(b"select 1;"), checksum(b"select  1;"));
    }

    #[test]
    fn different_content_different_checksum() {
        assert_ne!(checksum(b"select 1;"), checksum(b"select 2;"));
    }
}
