use crate::TransferError;

/// Longest accepted file name, matching common filesystem limits.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Validates a client-supplied file name.
///
/// Names travel to the server and come back embedded in URLs, so anything
/// that smells like a path is rejected:
/// - empty names or names over 255 bytes
/// - path separators (`/`, `\`)
/// - the reserved names `.` and `..`
/// - control characters
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty file name".into()));
    }

    if name.len() > MAX_FILE_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "file name exceeds {MAX_FILE_NAME_LEN} bytes"
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!(
            "reserved name not allowed: {name}"
        )));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(TransferError::InvalidName(
            "control characters not allowed".into(),
        ));
    }

    Ok(())
}
