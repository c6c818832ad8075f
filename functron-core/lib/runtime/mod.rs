//! The container runtime seam.
//!
//! Everything functron does with containers goes through [`ContainerRuntime`]: building images,
//! running them as one-shot processes, killing, committing and removing them. [`DockerRuntime`]
//! implements it on top of the `docker` CLI.

mod docker;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::{path::Path, process::Output};

use async_trait::async_trait;
use getset::Getters;
use tokio::process::Child;

use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The captured result of a runtime command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited successfully.
    pub success: bool,

    /// The exit code, if the command exited rather than being signalled.
    pub code: Option<i32>,

    /// Everything written to stdout.
    pub stdout: Vec<u8>,

    /// Everything written to stderr.
    pub stderr: Vec<u8>,
}

/// A running container process with piped stdio.
#[derive(Debug, Getters)]
pub struct ContainerProcess {
    /// The container name, used to kill the container independently of the client process.
    #[getset(get = "pub with_prefix")]
    name: String,

    /// The client process attached to the container.
    child: Child,
}

/// Operations functron needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Builds `context_dir` (which contains a `Dockerfile`) into an image tagged `tag`.
    async fn build_image(&self, tag: &str, context_dir: &Path) -> FunctronResult<CommandOutput>;

    /// Starts `tag` as a container called `name` with `context_dir` mounted at `/data`.
    ///
    /// stdin, stdout and stderr of the returned process are piped.
    async fn run_container(
        &self,
        tag: &str,
        name: &str,
        context_dir: &Path,
    ) -> FunctronResult<ContainerProcess>;

    /// Kills the container called `name`.
    async fn kill_container(&self, name: &str) -> FunctronResult<CommandOutput>;

    /// Removes the container called `name`.
    async fn remove_container(&self, name: &str) -> FunctronResult<CommandOutput>;

    /// Removes the image tagged `tag`.
    async fn remove_image(&self, tag: &str) -> FunctronResult<CommandOutput>;

    /// Lists every image as `repository\ttag` lines.
    async fn list_images(&self) -> FunctronResult<String>;

    /// Runs `script` with `/bin/sh` inside a new container called `name` created from `tag`.
    ///
    /// The container is left behind so it can be committed.
    async fn run_script(&self, tag: &str, name: &str, script: &str)
        -> FunctronResult<CommandOutput>;

    /// Commits the container called `name` onto the image tag `tag`.
    async fn commit_container(&self, name: &str, tag: &str) -> FunctronResult<CommandOutput>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CommandOutput {
    /// stderr decoded lossily as UTF-8.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// stdout decoded lossily as UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turns an unsuccessful output into [`FunctronError::RuntimeCommand`].
    pub fn into_result(self, command: impl Into<String>) -> FunctronResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(FunctronError::RuntimeCommand {
                command: command.into(),
                stderr: self.stderr_lossy().trim().to_string(),
            })
        }
    }
}

impl ContainerProcess {
    /// Wraps a spawned client process.
    pub fn new(name: impl Into<String>, child: Child) -> Self {
        Self {
            name: name.into(),
            child,
        }
    }

    /// The client process.
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}
