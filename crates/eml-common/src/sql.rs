//! SQL helpers
//!
//! Table names are configurable but cannot be bound as statement parameters,
//! so they are validated before being formatted into SQL text.

use crate::error::{EmlError, Result};

/// Longest identifier accepted (PostgreSQL truncates at 63 bytes).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a plain (unquoted) SQL identifier such as a table name.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to [`MAX_IDENTIFIER_LEN`] bytes.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(name)
    } else {
        Err(EmlError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert_eq!(validate_identifier("jobs").unwrap(), "jobs");
        assert!(validate_identifier("eml_jobs_2").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2jobs").is_err());
        assert!(validate_identifier("jobs; DROP TABLE users").is_err());
        assert!(validate_identifier("public.jobs").is_err());
        assert!(validate_identifier("jöbs").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_error_names_the_identifier() {
        let err = validate_identifier("2jobs").unwrap_err();
        assert_eq!(err, EmlError::InvalidIdentifier("2jobs".into()));
        assert!(err.to_string().starts_with("Invalid SQL identifier '2jobs'"));
    }
}
