use functron_core::FunctronError;
use functron_server::ServerError;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a functron CLI operation.
pub type FunctronCliResult<T> = Result<T, FunctronCliError>;

/// An error that can occur when running a functron binary.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FunctronCliError {
    /// An I/O error, e.g. while binding the listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the core library.
    #[error(transparent)]
    Core(#[from] FunctronError),

    /// An error while setting up the server.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
