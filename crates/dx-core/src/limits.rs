//! Request validation bounds shared by every API entry point

use std::collections::HashMap;

use thiserror::Error;

/// Maximum request path length in bytes.
pub const MAX_PATH_BYTES: usize = 4096;
/// Page number bounds.
pub const MIN_PAGE: u32 = 1;
pub const MAX_PAGE: u32 = 1_000_000;
/// Page size bounds.
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 1000;
/// Filter map bounds.
pub const MAX_FILTERS: usize = 50;
pub const MAX_FILTER_KEY_CHARS: usize = 256;
pub const MAX_FILTER_VALUE_CHARS: usize = 1000;
/// Extensions accepted by `open_file_info` / `start_index`.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["json", "csv", "vcf"];

/// A rejected request input. Renders with the `Validation error:` prefix
/// the request bridge surfaces verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation error: {0}")]
pub struct ValidationError(pub String);

/// Check path length and extension. Existence checks are the caller's
/// concern since they require filesystem access.
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError("path must not be empty".to_string()));
    }
    if path.len() > MAX_PATH_BYTES {
        return Err(ValidationError(format!(
            "path exceeds {} bytes",
            MAX_PATH_BYTES
        )));
    }
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ValidationError(format!(
            "unsupported file extension '{}'",
            ext
        )));
    }
    Ok(())
}

/// Check the 16-hex lowercase file identifier shape.
pub fn validate_file_id(id: &str) -> Result<(), ValidationError> {
    let ok = id.len() == 16
        && id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if ok {
        Ok(())
    } else {
        Err(ValidationError(format!("malformed file id '{}'", id)))
    }
}

pub fn validate_page(page: u32) -> Result<(), ValidationError> {
    if (MIN_PAGE..=MAX_PAGE).contains(&page) {
        Ok(())
    } else {
        Err(ValidationError(format!(
            "page must be between {} and {}",
            MIN_PAGE, MAX_PAGE
        )))
    }
}

pub fn validate_limit(limit: u32) -> Result<(), ValidationError> {
    if (MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        Ok(())
    } else {
        Err(ValidationError(format!(
            "limit must be between {} and {}",
            MIN_LIMIT, MAX_LIMIT
        )))
    }
}

pub fn validate_filters(filters: &HashMap<String, String>) -> Result<(), ValidationError> {
    if filters.len() > MAX_FILTERS {
        return Err(ValidationError(format!(
            "at most {} filters are allowed",
            MAX_FILTERS
        )));
    }
    for (key, value) in filters {
        if key.chars().count() > MAX_FILTER_KEY_CHARS {
            return Err(ValidationError(format!(
                "filter key exceeds {} characters",
                MAX_FILTER_KEY_CHARS
            )));
        }
        if value.chars().count() > MAX_FILTER_VALUE_CHARS {
            return Err(ValidationError(format!(
                "filter value exceeds {} characters",
                MAX_FILTER_VALUE_CHARS
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_rules() {
        assert!(validate_path("data/users.csv").is_ok());
        assert!(validate_path("Contacts.VCF").is_ok());
        assert!(validate_path("notes.txt").is_err());
        assert!(validate_path("").is_err());
        let long = format!("{}.csv", "x".repeat(MAX_PATH_BYTES));
        assert!(validate_path(&long).is_err());
    }

    #[test]
    fn test_file_id_rules() {
        assert!(validate_file_id("b46034ea76c4edb9").is_ok());
        assert!(validate_file_id("B46034EA76C4EDB9").is_err());
        assert!(validate_file_id("b46034ea76c4edb").is_err());
        assert!(validate_file_id("b46034ea76c4edb9f").is_err());
        assert!(validate_file_id("g46034ea76c4edb9").is_err());
    }

    #[test]
    fn test_page_and_limit_bounds() {
        assert!(validate_page(1).is_ok());
        assert!(validate_page(1_000_000).is_ok());
        assert!(validate_page(0).is_err());
        assert!(validate_page(1_000_001).is_err());
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(1000).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1001).is_err());
    }

    #[test]
    fn test_filter_bounds() {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), "doe".to_string());
        assert!(validate_filters(&filters).is_ok());

        filters.insert("k".repeat(257), "v".to_string());
        assert!(validate_filters(&filters).is_err());
        filters.clear();

        filters.insert("k".to_string(), "v".repeat(1001));
        assert!(validate_filters(&filters).is_err());
        filters.clear();

        for i in 0..51 {
            filters.insert(format!("col{}", i), "v".to_string());
        }
        assert!(validate_filters(&filters).is_err());
    }

    #[test]
    fn test_error_rendering() {
        let err = validate_page(0).unwrap_err();
        assert!(err.to_string().starts_with("Validation error: "));
    }
}
