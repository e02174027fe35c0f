//! Errors of field and group operations.
//!
//! Validation failures are not errors; they are carried in-band as
//! `Status::Invalid`.

/// Errors raised by form operations.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    /// No control exists at the path.
    #[error("no control at path `{path}`")]
    NotFound { path: String },

    /// The path names a group where a field was expected.
    #[error("control at `{path}` is a group, not a field")]
    NotAField { path: String },

    /// The path names a field where a group was expected.
    #[error("control at `{path}` is a field, not a group")]
    NotAGroup { path: String },

    /// The field, group or scope has already been released.
    #[error("`{name}` has been released")]
    Released { name: String },

    /// A partial value for a group was not an object.
    #[error("expected an object of values for group `{path}`")]
    ShapeMismatch { path: String },

    /// Malformed pipeline configuration.
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result alias for form operations.
pub type Result<T, E = FormError> = std::result::Result<T, E>;
