//! Error types for the functron utilities.

use std::path::PathBuf;

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a functron-utils related operation.
pub type FunctronUtilsResult<T> = Result<T, FunctronUtilsError>;

/// An error that occurred during a functron-utils operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FunctronUtilsError {
    /// The path could not be validated.
    #[error("path validation error: {0}")]
    PathValidation(String),

    /// A path resolves to a location outside of the root it must stay within.
    #[error("path {path:?} escapes root {root:?}")]
    PathEscape {
        /// The root directory.
        root: PathBuf,

        /// The offending path, as supplied.
        path: PathBuf,
    },

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
