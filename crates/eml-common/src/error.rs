//! Error types shared across the EML crates

use thiserror::Error;

/// Result type alias for shared EML operations
pub type Result<T> = std::result::Result<T, EmlError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmlError {
    #[error(
        "Invalid SQL identifier '{0}': only ASCII letters, digits and '_' are allowed \
         and it must not start with a digit"
    )]
    InvalidIdentifier(String),
}
