//! The one-shot invocation pipeline.
//!
//! Each request runs through the same steps, independently of every other request:
//! decode, stage the build context, build a temporary image, run it for a fixed time budget,
//! capture its output, remove the image and respond. Requests share nothing but the runtime
//! and the name generator; isolation comes from a private staging directory and a random tag
//! per request.
//!
//! The run step always waits for the full timeout before looking at the process, so a function
//! that finishes early is still only observed once its budget has elapsed.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use base64::{prelude::BASE64_STANDARD, Engine};
use functron_utils::{DOCKERFILE_NAME, INVOCATION_DIR_PREFIX, SCRATCH_SUBDIR};
use getset::Getters;
use tempfile::TempDir;
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    task::JoinHandle,
};

use crate::{
    models::{Invocation, InvocationOutcome, InvocationResponse, InvocationStatus},
    runtime::{ContainerProcess, ContainerRuntime},
    utils::{container_name_for, unpack_into_directory, NameGenerator},
    FunctronError, FunctronResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long to wait for output streams to drain and a killed process to exit.
const STREAM_GRACE: Duration = Duration::from_secs(5);

/// Recorded when the function is still running once its budget is spent.
pub const TIMEOUT_ERROR: &str = "Process exceeded timeout";

/// Recorded when the function exited unsuccessfully or was signalled.
pub const ABNORMAL_EXIT_ERROR: &str = "Process did not exit right";

/// Recorded when the temporary image fails to build.
pub const BUILD_FAILURE_ERROR: &str = "BuildFailure";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs invocations against a container runtime.
#[derive(Getters)]
pub struct Invoker {
    runtime: Arc<dyn ContainerRuntime>,

    /// Directory under which per-request staging directories are created.
    #[getset(get = "pub with_prefix")]
    scratch_dir: PathBuf,

    names: Arc<Mutex<NameGenerator>>,
}

type StreamTask = JoinHandle<io::Result<Vec<u8>>>;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Invoker {
    /// Creates an invoker that stages requests under `<scratch_dir>/functron`.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        scratch_dir: impl AsRef<Path>,
        names: NameGenerator,
    ) -> Self {
        Self {
            runtime,
            scratch_dir: scratch_dir.as_ref().join(SCRATCH_SUBDIR),
            names: Arc::new(Mutex::new(names)),
        }
    }

    /// Decodes a raw request body and runs it.
    pub async fn invoke_raw(&self, body: &[u8]) -> InvocationOutcome {
        match Invocation::decode(body) {
            Ok(invocation) => self.invoke(invocation).await,
            Err(e) => {
                tracing::info!("rejecting invocation request: {}", e);
                let response = InvocationResponse {
                    errors: vec![decode_error_message(&e)],
                    ..Default::default()
                };
                InvocationOutcome::new(InvocationStatus::Rejected, response)
            }
        }
    }

    /// Runs a decoded invocation through the pipeline.
    pub async fn invoke(&self, mut invocation: Invocation) -> InvocationOutcome {
        let mut response = InvocationResponse::default();

        // Stage
        let context = match self.stage(&mut invocation).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!("failed to stage invocation of {}: {}", invocation.fn_name, e);
                let status = match e {
                    FunctronError::PathEscape { .. } => InvocationStatus::StagingRejected,
                    _ => InvocationStatus::StagingFailed,
                };
                response.errors.push(e.to_string());
                return InvocationOutcome::new(status, response);
            }
        };
        tracing::debug!("staged invocation in {}", context.path().display());

        // Build
        let tag = self.next_tag(&invocation.fn_name);
        response.temp_name = Some(tag.clone());

        match self.runtime.build_image(&tag, context.path()).await {
            Ok(output) => {
                response.build_context_stdout = BASE64_STANDARD.encode(&output.stdout);
                if !output.success {
                    tracing::warn!(
                        "failed to build image {}: {}",
                        tag,
                        output.stderr_lossy().trim()
                    );
                    response.build_context_stderr = BASE64_STANDARD.encode(&output.stderr);
                    response.detailed_error = Some(match output.code {
                        Some(code) => format!("exit status {}", code),
                        None => "build terminated by signal".to_string(),
                    });
                    response.errors.push(BUILD_FAILURE_ERROR.to_string());
                    return InvocationOutcome::new(InvocationStatus::BuildFailed, response);
                }
            }
            Err(e) => {
                tracing::warn!("failed to build image {}: {}", tag, e);
                response.detailed_error = Some(e.to_string());
                response.errors.push(BUILD_FAILURE_ERROR.to_string());
                return InvocationOutcome::new(InvocationStatus::BuildFailed, response);
            }
        }
        tracing::info!("built image {}, running", tag);

        // Run and capture
        let stdin = std::mem::take(&mut invocation.stdin);
        self.run(&tag, context.path(), stdin, invocation.timeout, &mut response)
            .await;

        // Remove image
        match self.runtime.remove_image(&tag).await {
            Ok(output) => {
                response.cleanup_out = BASE64_STANDARD.encode(&output.stdout);
                if !output.success {
                    response.cleanup_err = output.stderr_lossy().trim().to_string();
                    tracing::warn!("failed to remove image {}: {}", tag, response.cleanup_err);
                }
            }
            Err(e) => {
                tracing::warn!("failed to remove image {}: {}", tag, e);
                response.cleanup_err = e.to_string();
            }
        }

        InvocationOutcome::new(InvocationStatus::Completed, response)
    }

    /// Creates the staging directory, writes the Dockerfile and unpacks the build context.
    async fn stage(&self, invocation: &mut Invocation) -> FunctronResult<TempDir> {
        fs::create_dir_all(&self.scratch_dir).await?;
        let context = tempfile::Builder::new()
            .prefix(INVOCATION_DIR_PREFIX)
            .tempdir_in(&self.scratch_dir)?;

        fs::write(context.path().join(DOCKERFILE_NAME), &invocation.dockerfile).await?;

        let archive = std::mem::take(&mut invocation.build_context);
        let root = context.path().to_path_buf();
        tokio::task::spawn_blocking(move || unpack_into_directory(&archive[..], &root)).await??;

        Ok(context)
    }

    async fn run(
        &self,
        tag: &str,
        context_dir: &Path,
        stdin: Vec<u8>,
        timeout: Duration,
        response: &mut InvocationResponse,
    ) {
        let container = container_name_for(tag);
        let mut process = match self
            .runtime
            .run_container(tag, &container, context_dir)
            .await
        {
            Ok(process) => process,
            Err(e) => {
                tracing::warn!("failed to start {}: {}", tag, e);
                response.errors.push(format!("Can't start command: {}", e));
                return;
            }
        };

        let child = process.child_mut();
        let stdin_task = match child.stdin.take() {
            Some(mut pipe) => Some(tokio::spawn(async move {
                pipe.write_all(&stdin).await?;
                pipe.shutdown().await
            })),
            None => {
                response.errors.push("Can't attach to stdin".to_string());
                None
            }
        };
        let stdout_task = child.stdout.take().map(|pipe| tokio::spawn(read_stream(pipe)));
        let stderr_task = child.stderr.take().map(|pipe| tokio::spawn(read_stream(pipe)));

        // The whole budget is always spent before the process is looked at
        tokio::time::sleep(timeout).await;

        match process.child_mut().try_wait() {
            Ok(Some(status)) if status.success() => {
                tracing::debug!("{} exited successfully", container);
            }
            Ok(Some(status)) => {
                tracing::info!("{} exited abnormally: {}", container, status);
                response.errors.push(ABNORMAL_EXIT_ERROR.to_string());
            }
            Ok(None) => {
                tracing::info!("{} exceeded its timeout of {:?}", container, timeout);
                response.errors.push(TIMEOUT_ERROR.to_string());
                self.terminate(&mut process).await;
            }
            Err(e) => {
                tracing::warn!("could not query the state of {}: {}", container, e);
                response.errors.push(format!("Can't query process state: {}", e));
                self.terminate(&mut process).await;
            }
        }

        if let Some(task) = stdin_task {
            match tokio::time::timeout(STREAM_GRACE, task).await {
                Ok(Ok(Err(e))) => tracing::debug!("stdin of {} was not fully written: {}", container, e),
                Ok(Err(e)) => tracing::debug!("stdin writer of {} failed: {}", container, e),
                Err(_) => tracing::debug!("stdin writer of {} did not finish", container),
                Ok(Ok(Ok(()))) => {}
            }
        }

        match collect(stdout_task).await {
            Ok(stdout) => response.cmd_out = BASE64_STANDARD.encode(stdout),
            Err(e) => response.errors.push(format!("Can't read stdout correctly: {}", e)),
        }

        match collect(stderr_task).await {
            Ok(stderr) if !stderr.is_empty() => {
                response.cmd_err = String::from_utf8_lossy(&stderr).into_owned();
            }
            Ok(_) => {}
            Err(e) => {
                response.errors.push(format!("Can't read stderr correctly: {}", e));
                response.cmd_err = e;
            }
        }

        if let Err(e) = tokio::time::timeout(STREAM_GRACE, process.child_mut().wait()).await {
            tracing::warn!("{} did not exit after being killed: {}", container, e);
        }
    }

    /// Kills the client process and the container behind it.
    async fn terminate(&self, process: &mut ContainerProcess) {
        if let Err(e) = process.child_mut().start_kill() {
            tracing::warn!("could not kill {}: {}", process.get_name(), e);
        }

        match self.runtime.kill_container(process.get_name()).await {
            Ok(output) if !output.success => tracing::debug!(
                "kill of container {} reported: {}",
                process.get_name(),
                output.stderr_lossy().trim()
            ),
            Err(e) => tracing::warn!("could not kill container {}: {}", process.get_name(), e),
            Ok(_) => {}
        }
    }

    fn next_tag(&self, fn_name: &str) -> String {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .temporary_name(fn_name)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn read_stream(mut pipe: impl AsyncRead + Unpin) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    pipe.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

async fn collect(task: Option<StreamTask>) -> Result<Vec<u8>, String> {
    let Some(mut task) = task else {
        return Err("stream was not attached".to_string());
    };

    match tokio::time::timeout(STREAM_GRACE, &mut task).await {
        Ok(Ok(Ok(bytes))) => Ok(bytes),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => {
            task.abort();
            Err("stream did not close".to_string())
        }
    }
}

fn decode_error_message(error: &FunctronError) -> String {
    match error {
        FunctronError::InvalidArgument(message) => message.clone(),
        other => other.to_string(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
