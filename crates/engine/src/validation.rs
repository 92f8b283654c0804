use std::path::{Component, Path};

use crate::error::TransferError;

/// Validates a remote-supplied file name before it is joined onto a local
/// destination directory.
///
/// Rejects empty names, absolute paths, parent-directory traversal and
/// Windows prefix components.
pub fn validate_remote_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {name}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_remote_name("").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_remote_name("../../../etc/passwd").is_err());
        assert!(validate_remote_name("sub/../../escape").is_err());
        assert!(validate_remote_name("..").is_err());
    }

    #[test]
    fn rejects_absolute() {
        assert!(validate_remote_name("/tmp/evil").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_remote_name("report.pdf").is_ok());
        assert!(validate_remote_name("photos/2024/img_001.jpg").is_ok());
        assert!(validate_remote_name(".hidden").is_ok());
        assert!(validate_remote_name("./report.pdf").is_ok());
    }
}
