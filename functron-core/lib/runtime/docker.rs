//! [`ContainerRuntime`] on top of the `docker` CLI.
//!
//! This module handles:
//! - Building, listing and removing images with `docker build`, `docker images` and `docker rmi`
//! - Running one-shot containers with the build context mounted at the data mount
//! - Feeding pre-commit scripts to a container shell over stdin
//! - Killing, committing and removing named containers
//!
//! Every command line may be prefixed, e.g. with `taskset`, and is logged before it runs.

use std::{path::Path, process::Stdio};

use async_trait::async_trait;
use functron_utils::{
    env, normalize_path, SupportedPathType, CONTAINER_DATA_MOUNT, CONTAINER_STOP_TIMEOUT_SECS,
};
use getset::Getters;
use tokio::{io::AsyncWriteExt, process::Command};

use super::{CommandOutput, ContainerProcess, ContainerRuntime};
use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`ContainerRuntime`] that shells out to the `docker` CLI.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerRuntime {
    /// The docker executable, `docker` unless `FUNCTRON_DOCKER` says otherwise.
    executable: String,

    /// Words placed in front of every docker command line, e.g. `taskset -c 0`.
    command_prefix: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRuntime {
    /// Creates a runtime using the docker executable from the environment.
    pub fn new() -> Self {
        Self {
            executable: env::get_docker_exe(),
            command_prefix: Vec::new(),
        }
    }

    /// Prefixes every docker command line with the whitespace separated words of `prefix`.
    pub fn with_command_prefix(mut self, prefix: &str) -> Self {
        self.command_prefix = prefix.split_whitespace().map(str::to_string).collect();
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = match self.command_prefix.split_first() {
            Some((program, rest)) => {
                let mut command = Command::new(program);
                command.args(rest).arg(&self.executable);
                command
            }
            None => Command::new(&self.executable),
        };
        command.args(args);
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut words: Vec<&str> = self.command_prefix.iter().map(String::as_str).collect();
        words.push(&self.executable);
        words.extend_from_slice(args);
        words.join(" ")
    }

    async fn output(&self, args: &[&str]) -> FunctronResult<CommandOutput> {
        let description = self.describe(args);
        tracing::debug!("running {}", description);

        let output = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| FunctronError::RuntimeSpawn {
                command: description.clone(),
                source,
            })?;

        let output = CommandOutput::from(output);
        if !output.success {
            tracing::debug!("{} exited with {:?}", description, output.code);
        }

        Ok(output)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, tag: &str, context_dir: &Path) -> FunctronResult<CommandOutput> {
        let context = context_dir.to_string_lossy();
        self.output(&["build", "--rm", "-t", tag, &*context]).await
    }

    async fn run_container(
        &self,
        tag: &str,
        name: &str,
        context_dir: &Path,
    ) -> FunctronResult<ContainerProcess> {
        let context = normalize_path(&context_dir.to_string_lossy(), SupportedPathType::Absolute)?;
        let volume = format!("{}:{}", context, CONTAINER_DATA_MOUNT);
        let stop_timeout = CONTAINER_STOP_TIMEOUT_SECS.to_string();
        let args = [
            "run",
            "-i",
            "--rm",
            "--name",
            name,
            "--stop-timeout",
            stop_timeout.as_str(),
            "-v",
            volume.as_str(),
            tag,
        ];

        let description = self.describe(&args);
        tracing::debug!("starting {}", description);

        let child = self
            .command(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FunctronError::RuntimeSpawn {
                command: description,
                source,
            })?;

        Ok(ContainerProcess::new(name, child))
    }

    async fn kill_container(&self, name: &str) -> FunctronResult<CommandOutput> {
        self.output(&["kill", name]).await
    }

    async fn remove_container(&self, name: &str) -> FunctronResult<CommandOutput> {
        self.output(&["rm", "-f", name]).await
    }

    async fn remove_image(&self, tag: &str) -> FunctronResult<CommandOutput> {
        self.output(&["rmi", "-f", tag]).await
    }

    async fn list_images(&self) -> FunctronResult<String> {
        let args = ["images", "--format", "{{.Repository}}\t{{.Tag}}"];
        let output = self.output(&args).await?.into_result(self.describe(&args))?;
        Ok(output.stdout_lossy())
    }

    async fn run_script(
        &self,
        tag: &str,
        name: &str,
        script: &str,
    ) -> FunctronResult<CommandOutput> {
        let args = ["run", "-i", "--name", name, tag, "/bin/sh"];
        let description = self.describe(&args);
        tracing::debug!("running {}", description);

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FunctronError::RuntimeSpawn {
                command: description.clone(),
                source,
            })?;

        // The shell reads the script from stdin and exits at EOF
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        Ok(child.wait_with_output().await?.into())
    }

    async fn commit_container(&self, name: &str, tag: &str) -> FunctronResult<CommandOutput> {
        self.output(&["commit", name, tag]).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
