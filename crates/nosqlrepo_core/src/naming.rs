//! Validation for names that reach storage engines as identifiers.
//!
//! Collection names end up in SQLite index names and field names end up in
//! JSON paths, so both are restricted to a conservative identifier alphabet.

use once_cell::sync::Lazy;
use regex::Regex;

static COLLECTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("valid collection regex"));
static FIELD_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*){0,15}$")
        .expect("valid field path regex")
});

/// Returns whether `name` can be used as a collection name.
pub fn is_valid_collection_name(name: &str) -> bool {
    COLLECTION_NAME_RE.is_match(name)
}

/// Returns whether `field` is a valid dotted field path (`address.city`).
pub fn is_valid_field_name(field: &str) -> bool {
    FIELD_NAME_RE.is_match(field)
}

/// Converts a dotted field path into a SQLite JSON path (`$.address.city`).
pub fn json_path(field: &str) -> String {
    format!("$.{field}")
}

#[cfg(test)]
mod tests {
    use super::{is_valid_collection_name, is_valid_field_name, json_path};

    #[test]
    fn collection_names_accept_type_like_identifiers() {
        assert!(is_valid_collection_name("TestEntity"));
        assert!(is_valid_collection_name("_archive_2024"));
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("9lives"));
        assert!(!is_valid_collection_name("users; DROP TABLE documents"));
        assert!(!is_valid_collection_name("with-dash"));
    }

    #[test]
    fn field_names_accept_dotted_paths_only() {
        assert!(is_valid_field_name("name"));
        assert!(is_valid_field_name("address.city"));
        assert!(!is_valid_field_name("address..city"));
        assert!(!is_valid_field_name("tags[0]"));
        assert!(!is_valid_field_name("name'"));
    }

    #[test]
    fn json_path_prefixes_root() {
        assert_eq!(json_path("address.city"), "$.address.city");
    }
}
