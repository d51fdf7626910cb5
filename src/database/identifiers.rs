//! Allow-list validation for SQL identifiers.
//!
//! Values always travel through bind parameters; the only strings ever
//! interpolated into SQL text are table names, orderable columns and
//! language codes, and each must pass these checks first.

use super::DatabaseError;

/// Knowledge tables reachable through the repository layer.
pub const TABLES: [&str; 9] = [
    "attractions",
    "accommodations",
    "restaurants",
    "destinations",
    "events",
    "tour_packages",
    "faqs",
    "practical_info",
    "transport_routes",
];

/// Columns that may appear in interpolated positions (filters, ORDER
/// BY). JSON payload fields are addressed through bind parameters and
/// never interpolated.
pub const COLUMNS: [&str; 12] = [
    "id",
    "name",
    "description",
    "city_id",
    "region_id",
    "category",
    "rating",
    "price_tier",
    "active",
    "popularity",
    "created_at",
    "updated_at",
];

/// Columns the batch executor may write. Superset of the filterable
/// set plus payload columns that never appear in predicates.
pub const WRITABLE_COLUMNS: [&str; 16] = [
    "id",
    "slug",
    "name",
    "description",
    "city_id",
    "region_id",
    "category",
    "rating",
    "price_tier",
    "active",
    "popularity",
    "data",
    "embedding",
    "geom",
    "created_at",
    "updated_at",
];

/// Language codes that may select a JSONB text field.
pub const LANGUAGES: [&str; 5] = ["en", "ar", "fr", "de", "es"];

pub fn validate_table(table: &str) -> Result<&str, DatabaseError> {
    if TABLES.contains(&table) {
        Ok(table)
    } else {
        Err(DatabaseError::InvalidIdentifier(format!("table '{table}'")))
    }
}

pub fn validate_column(column: &str) -> Result<&str, DatabaseError> {
    if COLUMNS.contains(&column) {
        Ok(column)
    } else {
        Err(DatabaseError::InvalidIdentifier(format!(
            "column '{column}'"
        )))
    }
}

pub fn validate_writable_column(column: &str) -> Result<&str, DatabaseError> {
    if WRITABLE_COLUMNS.contains(&column) {
        Ok(column)
    } else {
        Err(DatabaseError::InvalidIdentifier(format!(
            "column '{column}'"
        )))
    }
}

pub fn validate_language(lang: &str) -> Result<&str, DatabaseError> {
    if LANGUAGES.contains(&lang) {
        Ok(lang)
    } else {
        Err(DatabaseError::InvalidIdentifier(format!(
            "language '{lang}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_table_passes() {
        assert_eq!(validate_table("attractions").unwrap(), "attractions");
    }

    #[test]
    fn test_injection_attempt_rejected() {
        assert!(validate_table("attractions; DROP TABLE sessions").is_err());
        assert!(validate_column("id); --").is_err());
        assert!(validate_language("en' OR '1'='1").is_err());
    }

    #[test]
    fn test_unknown_column_rejected() {
        assert!(validate_column("password").is_err());
    }

    #[test]
    fn test_all_languages_pass() {
        for lang in LANGUAGES {
            validate_language(lang).unwrap();
        }
    }
}
