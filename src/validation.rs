//! Validators for configuration values.
//!
//! Each returns a static message on failure; `AcquisitionConfig::validate`
//! wraps it with the offending key.
use std::ops::RangeInclusive;

/// Accepts serial port identifiers such as `COM5` or `/dev/ttyUSB0`.
///
/// Rejects blank names and names containing null bytes.
pub fn is_valid_port_name(port: &str) -> Result<(), &'static str> {
    if port.trim().is_empty() {
        return Err("Serial port name cannot be empty");
    }
    if port.contains('\0') {
        return Err("Serial port name cannot contain null bytes");
    }
    Ok(())
}

/// Accepts any non-empty path without null bytes. Whether it exists is
/// checked when the session file is created.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("Path cannot be empty");
    }
    if path.contains('\0') {
        return Err("Path cannot contain null bytes");
    }
    Ok(())
}

/// Validates a file name prefix: non-empty, no path separators.
pub fn is_valid_file_prefix(prefix: &str) -> Result<(), &'static str> {
    is_not_empty(prefix).map_err(|_| "File prefix cannot be empty")?;
    if prefix.contains(['/', '\\', '\0']) {
        return Err("File prefix cannot contain path separators");
    }
    Ok(())
}

/// `value` lies within `range`, both ends included.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    range
        .contains(&value)
        .then_some(())
        .ok_or("Value is outside the allowed range")
}

/// Rejects the empty string. Whitespace counts as content; trim first if it
/// should not.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("Value cannot be empty");
    }
    Ok(())
}
