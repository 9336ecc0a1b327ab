use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: String,
        constraint: String,
    },
    /// The connection host must be set.
    #[error("`host` cannot be empty")]
    MissingHost,
    /// The database name must be set.
    #[error("`name` cannot be empty")]
    MissingDatabaseName,
}
