use std::{io, path::PathBuf};

use functron_utils::FunctronUtilsError;
use thiserror::Error;

use crate::models::{ImageHandle, ImageStatus};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a functron-related operation.
pub type FunctronResult<T> = Result<T, FunctronError>;

/// An error that occurred during a functron operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FunctronError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An error from the shared utilities crate.
    #[error(transparent)]
    Utils(#[from] FunctronUtilsError),

    /// An error that occurred when a database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred when a migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred when a JSON document could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A base64 encoded request field could not be decoded.
    #[error("could not decode {field}: {source}")]
    Base64 {
        /// The field that failed to decode.
        field: &'static str,

        /// The underlying decode error.
        #[source]
        source: base64::DecodeError,
    },

    /// A spawned task panicked or was cancelled.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An archive entry resolved to a location outside the extraction directory.
    #[error("DirectoryUnpackSecurityError: entry {entry:?} resolves outside {root:?}")]
    PathEscape {
        /// The extraction directory.
        root: PathBuf,

        /// The offending entry name as it appears in the archive.
        entry: PathBuf,
    },

    /// A directory or file could not be materialised while unpacking an archive.
    #[error("UnpackError: could not write {path:?}: {source}")]
    Unpack {
        /// The target path being written.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The named image is not present in the container runtime.
    #[error("image not built: {0}")]
    ImageNotBuilt(String),

    /// The handle was never issued or has already been released.
    #[error("invalid image handle: {0}")]
    InvalidHandle(ImageHandle),

    /// A release would take an image's reference count below zero.
    #[error("reference count for image '{0}' would drop below zero")]
    RefCountUnderflow(String),

    /// The image still has outstanding references.
    #[error("image '{name}' is still in use ({count} reference(s))")]
    ImageInUse {
        /// The image name.
        name: String,

        /// The outstanding reference count.
        count: u64,
    },

    /// An image with this name is already persisted.
    #[error("image '{0}' already exists")]
    ImageExists(String),

    /// No stored image matched the lookup.
    #[error("no matching image")]
    NoMatchingImage,

    /// A lookup that must match a single row matched several.
    #[error("integrity error: {0} rows matched (should be 1)")]
    Integrity(usize),

    /// The requested status change is not allowed by the build lifecycle.
    #[error("invalid status transition for image {id}: {from} -> {to}")]
    InvalidStatusTransition {
        /// The image id.
        id: i64,

        /// The current status.
        from: ImageStatus,

        /// The requested status.
        to: ImageStatus,
    },

    /// The store has no schema version recorded.
    #[error("unable to find the db_schema configuration key")]
    UnknownSchemaVersion,

    /// The store carries a schema version this build cannot read.
    #[error("unsupported database schema version: {0}")]
    UnsupportedSchemaVersion(String),

    /// The container runtime binary could not be spawned.
    #[error("failed to spawn `{command}`: {source}")]
    RuntimeSpawn {
        /// The command line that failed to start.
        command: String,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A container runtime command ran but reported failure.
    #[error("`{command}` failed: {stderr}")]
    RuntimeCommand {
        /// The command line that failed.
        command: String,

        /// Whatever the command wrote to stderr.
        stderr: String,
    },

    /// An invalid argument was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration document was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
