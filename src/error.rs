//! Error types for offline registry operations.
//!
//! Engine failures arrive as raw [`Status`] codes. A closed set of them is
//! mapped to named conditions; everything else is kept as
//! [`RegistryError::Engine`] with the numeric code attached.

use crate::engine::Status;
use crate::types::ValueType;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while operating on a hive.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Named key, value or hive file is absent.
    #[error("{operation}: '{name}' not found")]
    NotFound {
        /// Operation that was attempted.
        operation: &'static str,
        /// Name of the missing item.
        name: String,
    },

    /// Delete refused because the key still has subkeys.
    #[error("cannot delete key '{name}': it has subkeys")]
    KeyHasChildren {
        /// Name of the key that could not be deleted.
        name: String,
    },

    /// Engine rejected a parameter (name too long, path too deep, ...).
    #[error("{operation}: invalid parameter for '{name}'")]
    InvalidParameter {
        /// Operation that was attempted.
        operation: &'static str,
        /// Name involved in the call.
        name: String,
    },

    /// Save target already exists. The engine never overwrites.
    #[error("file already exists: {path}")]
    FileExists {
        /// Target path of the save.
        path: String,
    },

    /// Operation is not valid for this object (e.g. deleting the root key).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Structured decoding is not supported for this value type.
    #[error("decoding {} values is not supported", .0.name())]
    Unsupported(ValueType),

    /// Caller supplied data that cannot be encoded.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Engine reported a value type outside the known set.
    #[error("invalid value type: {0}")]
    InvalidValueType(u32),

    /// Any other engine failure.
    #[error("{operation} failed for '{name}' with engine status {code}")]
    Engine {
        /// Operation that was attempted.
        operation: &'static str,
        /// Name involved in the call.
        name: String,
        /// Raw status code.
        code: u32,
    },
}

impl RegistryError {
    /// Maps an engine status to an error.
    ///
    /// # Arguments
    ///
    /// * `status` - Non-success status returned by the engine
    /// * `operation` - Operation that was attempted (e.g. "open key")
    /// * `name` - Key, value or path the operation was applied to
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use offreg::{RegistryError, Status};
    /// let err = RegistryError::from_status(Status::FILE_NOT_FOUND, "open key", "Software");
    /// assert!(matches!(err, RegistryError::NotFound { .. }));
    /// ```
    pub fn from_status(status: Status, operation: &'static str, name: &str) -> Self {
        let name = name.to_string();
        match status {
            Status::FILE_NOT_FOUND | Status::PATH_NOT_FOUND => Self::NotFound { operation, name },
            Status::KEY_HAS_CHILDREN => Self::KeyHasChildren { name },
            Status::INVALID_PARAMETER => Self::InvalidParameter { operation, name },
            Status::FILE_EXISTS => Self::FileExists { path: name },
            other => Self::Engine {
                operation,
                name,
                code: other.code(),
            },
        }
    }

    /// Returns the engine status behind this error, if there is one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::NotFound { .. } => Some(Status::FILE_NOT_FOUND),
            Self::KeyHasChildren { .. } => Some(Status::KEY_HAS_CHILDREN),
            Self::InvalidParameter { .. } => Some(Status::INVALID_PARAMETER),
            Self::FileExists { .. } => Some(Status::FILE_EXISTS),
            Self::Engine { code, .. } => Some(Status::new(*code)),
            Self::InvalidState(_)
            | Self::Unsupported(_)
            | Self::InvalidInput(_)
            | Self::InvalidValueType(_) => None,
        }
    }

    /// Returns true if this error means the named item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
