//! Name and path validators shared by cache-directory discovery and
//! application-name configuration.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::error::{CacheError, CacheResult};

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

static INVALID_FILENAME_CHARS: Lazy<Vec<char>> = Lazy::new(|| {
    let mut chars: Vec<char> = (0x00u8..=0x1Fu8).map(|b| b as char).collect();
    chars.extend(['<', '>', ':', '"', '|', '?', '*', '/', '\\', '\0']);
    chars
});

/// Validates a name used as a filesystem path component (application name,
/// per-cache file stem, …). Rejects the same closed set of patterns the
/// source library rejects: empty/whitespace, path separators, `.`/`..`,
/// reserved device names, invalid-filename characters, and leading or
/// trailing `.`/whitespace.
pub fn validate_name(name: &str) -> CacheResult<()> {
    if name.trim().is_empty() {
        return Err(CacheError::InvalidArgument("name must not be empty or whitespace".into()));
    }
    if name == "." || name == ".." {
        return Err(CacheError::InvalidArgument("name must not be '.' or '..'".into()));
    }
    if name.chars().any(|c| INVALID_FILENAME_CHARS.contains(&c)) {
        return Err(CacheError::InvalidArgument(format!("name '{name}' contains an invalid character")));
    }
    let upper = name.to_ascii_uppercase();
    if RESERVED_DEVICE_NAMES.contains(&upper.as_str()) {
        return Err(CacheError::InvalidArgument(format!("name '{name}' is a reserved device name")));
    }
    let starts_or_ends_with_dot_or_space = name.starts_with('.')
        || name.ends_with('.')
        || name.starts_with(char::is_whitespace)
        || name.ends_with(char::is_whitespace);
    if starts_or_ends_with_dot_or_space {
        return Err(CacheError::InvalidArgument(format!(
            "name '{name}' must not start or end with '.' or whitespace"
        )));
    }
    Ok(())
}

/// Joins `base` and `rel`, rejecting the combination if the canonicalized
/// result would escape `base` (e.g. via `..` segments).
///
/// `base` must already exist (it is canonicalized); `rel` need not.
pub fn safe_path_combine(base: &Path, rel: &str) -> CacheResult<PathBuf> {
    validate_name_allow_separators(rel)?;
    let canonical_base = base
        .canonicalize()
        .map_err(|e| CacheError::InvalidArgument(format!("base path '{}' is invalid: {e}", base.display())))?;
    let combined = canonical_base.join(rel);
    let lexical = lexically_normalize(&combined);
    let normalized_base = lexically_normalize(&canonical_base);
    if !lexical.starts_with(&normalized_base) {
        return Err(CacheError::InvalidArgument(format!(
            "'{rel}' escapes base directory '{}'",
            base.display()
        )));
    }
    Ok(lexical)
}

/// Like [`validate_name`] but permits `/`/`\` so multi-segment relative
/// paths can be validated component-by-component for [`safe_path_combine`].
fn validate_name_allow_separators(rel: &str) -> CacheResult<()> {
    if rel.trim().is_empty() {
        return Err(CacheError::InvalidArgument("relative path must not be empty".into()));
    }
    for component in rel.split(['/', '\\']) {
        if component.is_empty() {
            continue;
        }
        if component == ".." {
            return Err(CacheError::InvalidArgument("relative path must not contain '..'".into()));
        }
        if component == "." {
            continue;
        }
        validate_name(component)?;
    }
    Ok(())
}

/// Normalizes `.`/`..` components lexically, without touching the
/// filesystem (the path may not fully exist yet).
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut stack: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                stack.pop();
            }
            std::path::Component::CurDir => {}
            other => stack.push(other.as_os_str().to_os_string()),
        }
    }
    stack.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
    }

    #[test]
    fn rejects_reserved_device_names_case_insensitively() {
        assert!(validate_name("CON").is_err());
        assert!(validate_name("com1").is_err());
        assert!(validate_name("Lpt9").is_err());
    }

    #[test]
    fn rejects_leading_or_trailing_dot_or_space() {
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("trailing.").is_err());
        assert!(validate_name(" leading").is_err());
        assert!(validate_name("trailing ").is_err());
    }

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_name("my-app_2").is_ok());
    }

    #[test]
    fn safe_path_combine_allows_nested_paths_within_base() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        let combined = safe_path_combine(tmp.path(), "nested/file.db").unwrap();
        assert!(combined.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn safe_path_combine_rejects_escape_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(safe_path_combine(tmp.path(), "../escape.db").is_err());
    }
}
