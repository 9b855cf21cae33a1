//! Shared key handling for storage backends.
//!
//! Key format: `{subdirectory}/{key}` when a subdirectory is configured, `{key}` otherwise.

use crate::traits::{StorageError, StorageResult};

/// Normalize a configured subdirectory: surrounding slashes stripped, empty treated as none.
pub fn normalize_subdirectory(subdirectory: Option<&str>) -> Option<String> {
    subdirectory
        .map(|s| s.trim().trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
}

/// Reject keys that could escape the configured scope.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Produce the fully qualified key used on the backend.
///
/// All backends must use this for every operation so that `put` and the later
/// `get`/`delete` of the same key agree.
pub fn qualify(subdirectory: Option<&str>, key: &str) -> StorageResult<String> {
    validate_key(key)?;
    Ok(match subdirectory {
        Some(prefix) => format!("{}/{}", prefix, key),
        None => key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_with_subdirectory() {
        let sub = normalize_subdirectory(Some("/uploads/"));
        assert_eq!(
            qualify(sub.as_deref(), "abc.png").unwrap(),
            "uploads/abc.png"
        );
        assert_eq!(qualify(None, "abc.png").unwrap(), "abc.png");
        assert_eq!(normalize_subdirectory(Some("  ")), None);
    }

    #[test]
    fn rejects_traversal() {
        assert!(qualify(None, "../etc/passwd").is_err());
        assert!(qualify(None, "a/../../b").is_err());
        assert!(qualify(None, "/etc/passwd").is_err());
        assert!(qualify(None, "a\\b").is_err());
        assert!(qualify(None, "").is_err());
        // dots inside a name are fine
        assert!(qualify(None, "..hidden").is_ok());
        assert!(qualify(None, ".thumbnail.x.jpg").is_ok());
    }
}
