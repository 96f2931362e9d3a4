use std::path::{Component, Path};

use crate::TransferError;

/// Validates a client-supplied path segment (username or file name).
///
/// Rejects:
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
/// - Paths made only of `.` components
pub fn validate_path_segment(segment: &str) -> Result<(), TransferError> {
    let path = Path::new(segment);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {segment}"
        )));
    }

    let mut has_name = false;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {segment}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {segment}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {segment}"
                )));
            }
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
        }
    }

    if !has_name {
        return Err(TransferError::InvalidPath(format!(
            "no file name in path: {segment}"
        )));
    }

    Ok(())
}
