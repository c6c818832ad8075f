//! Payloads of the one-shot invocation pipeline.
//!
//! The wire format keeps PascalCase keys: a request carries `DockerFile`, `TarFile`, `FnName`,
//! `Stdin` and `Timeout`, and a response carries `TempName`, `Errors`, the captured output of
//! the function and of the build and cleanup steps, and an optional `DetailedError`.

use std::time::Duration;

use base64::{prelude::BASE64_STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::validate_image_name;
use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An invocation request exactly as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationRequest {
    /// Dockerfile text.
    pub docker_file: String,

    /// Base64 encoded tar archive with the build context.
    #[serde(default)]
    pub tar_file: String,

    /// Function name, used to derive the temporary image tag.
    pub fn_name: String,

    /// Base64 encoded bytes fed to the function's stdin.
    #[serde(default)]
    pub stdin: String,

    /// How long to let the function run, in seconds.
    pub timeout: f64,
}

/// A request whose fields have been decoded and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Dockerfile text.
    pub dockerfile: String,

    /// Raw tar archive with the build context.
    pub build_context: Vec<u8>,

    /// Function name.
    pub fn_name: String,

    /// Raw stdin bytes.
    pub stdin: Vec<u8>,

    /// The fixed time the function is given.
    pub timeout: Duration,
}

/// The response returned for every invocation, successful or not.
///
/// `CmdOut`, `BuildContextStdout`, `BuildContextStderr` and `CleanupOut` are base64 encoded;
/// `CmdErr` and `CleanupErr` are plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InvocationResponse {
    /// Temporary image tag, present once the build step was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_name: Option<String>,

    /// Every error encountered, in pipeline order.
    pub errors: Vec<String>,

    /// The function's stdout.
    pub cmd_out: String,

    /// The function's stderr.
    pub cmd_err: String,

    /// Output of the image build.
    pub build_context_stdout: String,

    /// Error output of the image build.
    pub build_context_stderr: String,

    /// Output of removing the temporary image.
    pub cleanup_out: String,

    /// Error text from removing the temporary image.
    pub cleanup_err: String,

    /// Extra detail about a terminal failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_error: Option<String>,
}

/// How far an invocation got, which decides the HTTP status it is reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    /// The function ran. Run and cleanup problems are reported in the response body.
    Completed,

    /// The request could not be decoded.
    Rejected,

    /// The archive tried to write outside its staging directory.
    StagingRejected,

    /// The build context could not be staged.
    StagingFailed,

    /// The image build failed.
    BuildFailed,
}

/// The result of running the invocation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// How far the pipeline got.
    pub status: InvocationStatus,

    /// The response body.
    pub response: InvocationResponse,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Invocation {
    /// Decodes a raw request body.
    ///
    /// An empty body, malformed JSON, bad base64, an unusable function name or a timeout that
    /// is negative or not a number are all rejected here, before anything touches the disk.
    pub fn decode(body: &[u8]) -> FunctronResult<Self> {
        if body.is_empty() {
            return Err(FunctronError::InvalidArgument("NoBody".to_string()));
        }

        let request: InvocationRequest = serde_json::from_slice(body)?;
        Self::try_from(request)
    }
}

impl InvocationStatus {
    /// The HTTP status code this outcome is reported with.
    pub fn http_status(&self) -> u16 {
        match self {
            InvocationStatus::Completed => 200,
            InvocationStatus::Rejected
            | InvocationStatus::StagingRejected
            | InvocationStatus::BuildFailed => 400,
            InvocationStatus::StagingFailed => 500,
        }
    }
}

impl InvocationOutcome {
    /// Creates an outcome.
    pub fn new(status: InvocationStatus, response: InvocationResponse) -> Self {
        Self { status, response }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl TryFrom<InvocationRequest> for Invocation {
    type Error = FunctronError;

    fn try_from(request: InvocationRequest) -> FunctronResult<Self> {
        validate_image_name(&request.fn_name)?;

        let build_context = BASE64_STANDARD
            .decode(request.tar_file.as_bytes())
            .map_err(|source| FunctronError::Base64 {
                field: "TarFile",
                source,
            })?;

        let stdin = BASE64_STANDARD
            .decode(request.stdin.as_bytes())
            .map_err(|source| FunctronError::Base64 {
                field: "Stdin",
                source,
            })?;

        let timeout = Duration::try_from_secs_f64(request.timeout).map_err(|e| {
            FunctronError::InvalidArgument(format!("invalid Timeout {}: {}", request.timeout, e))
        })?;

        Ok(Self {
            dockerfile: request.docker_file,
            build_context,
            fn_name: request.fn_name,
            stdin,
            timeout,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
