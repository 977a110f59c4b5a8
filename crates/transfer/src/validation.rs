use std::path::{Component, Path};

use crate::TransferError;

/// Checks that `relative` names a location inside whatever directory it
/// will be joined onto: non-empty, not rooted, and free of `..`.
pub fn validate_relative_path(relative: &str) -> Result<(), TransferError> {
    let reject = |why: &str| Err(TransferError::InvalidPath(format!("{why}: {relative:?}")));

    if relative.trim().is_empty() {
        return reject("path is empty");
    }
    let path = Path::new(relative);
    if path.has_root() || path.is_absolute() {
        return reject("path must be relative");
    }
    match path
        .components()
        .find(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        None => Ok(()),
        Some(Component::ParentDir) => reject("path leaves its base directory"),
        Some(_) => reject("path must be relative"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(path: &str) -> String {
        match validate_relative_path(path) {
            Err(TransferError::InvalidPath(reason)) => reason,
            other => panic!("expected InvalidPath for {path:?}, got {other:?}"),
        }
    }

    #[test]
    fn nested_and_dotted_names_pass() {
        for path in ["blob.bin", "out/2024/blob.bin", "./blob.bin", ".hidden/part"] {
            assert!(validate_relative_path(path).is_ok(), "{path}");
        }
    }

    #[test]
    fn blank_paths_fail() {
        assert!(reason("").contains("empty"));
        assert!(reason("   ").contains("empty"));
    }

    #[test]
    fn escaping_paths_fail() {
        for path in ["..", "../secret", "data/../../secret"] {
            assert!(reason(path).contains("leaves"), "{path}");
        }
    }

    #[test]
    fn rooted_paths_fail() {
        assert!(reason("/var/data").contains("relative"));
    }
}
