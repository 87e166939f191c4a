use crate::TransferError;

/// Reduces a peer-supplied file name to a safe single path component.
///
/// Directory parts (either separator) are stripped and control characters
/// removed. Rejects names that end up empty, `.` or `..`.
pub fn sanitize_file_name(name: &str) -> Result<String, TransferError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(TransferError::InvalidFileName(name.to_string()));
    }

    Ok(cleaned.to_string())
}
