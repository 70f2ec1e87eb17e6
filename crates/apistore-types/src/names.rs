//! Object name and namespace validation.
//!
//! Names and namespaces become single components of a storage location, so
//! each must be usable as exactly one path segment:
//! - Must be non-empty and at most 253 bytes
//! - Must not be `.` or `..`
//! - Must not contain `/`, `\` or NUL

use crate::error::TypeError;

/// Longest name accepted, matching the DNS subdomain limit.
pub const MAX_NAME_LEN: usize = 253;

/// Characters that are forbidden anywhere in a segment.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '\0'];

/// Validate that `name` can be used as a single storage path segment.
///
/// # Examples
///
/// ```
/// use apistore_types::names::validate_path_segment;
///
/// assert!(validate_path_segment("foo-1").is_ok());
/// assert!(validate_path_segment("..").is_err());
/// assert!(validate_path_segment("a/b").is_err());
/// ```
pub fn validate_path_segment(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "must not be empty".into(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: format!("must be at most {MAX_NAME_LEN} bytes"),
        });
    }

    if name == "." || name == ".." {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "must not be a relative path component".into(),
        });
    }

    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return Err(TypeError::InvalidName {
                name: name.to_string(),
                reason: format!("contains forbidden character: {ch:?}"),
            });
        }
    }

    Ok(())
}
