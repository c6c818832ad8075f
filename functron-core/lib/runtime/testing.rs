//! A [`ContainerRuntime`] backed by plain `sh` processes, for tests that must not need docker.
//!
//! Images are names in a set. "Running" an image executes `run.sh` from the build context with
//! `sh`, or `cat` when the context has none. A Dockerfile containing `FAIL` fails to build.

use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use functron_utils::DOCKERFILE_NAME;
use tokio::{fs, process::Command};

use super::{CommandOutput, ContainerProcess, ContainerRuntime};
use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The script a test build context provides to act as the container's entrypoint.
pub const RUN_SCRIPT_NAME: &str = "run.sh";

/// Dockerfiles containing this marker fail to build.
pub const BUILD_FAILURE_MARKER: &str = "FAIL";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A fake container runtime.
#[derive(Debug, Default)]
pub struct ShellRuntime {
    images: Mutex<BTreeSet<String>>,
    containers: Mutex<HashMap<String, String>>,
    killed: Mutex<Vec<String>>,
    removed_images: Mutex<Vec<String>>,
    lose_built_images: AtomicBool,
    fail_removals: AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ShellRuntime {
    /// Creates a runtime with no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runtime that already has `tags` built.
    pub fn with_images<'a>(tags: impl IntoIterator<Item = &'a str>) -> Self {
        let runtime = Self::new();
        for tag in tags {
            runtime.add_image(tag);
        }
        runtime
    }

    /// Registers an image as built.
    pub fn add_image(&self, tag: &str) {
        lock(&self.images).insert(full_tag(tag));
    }

    /// Whether an image is currently built.
    pub fn has_image(&self, tag: &str) -> bool {
        lock(&self.images).contains(&full_tag(tag))
    }

    /// Makes builds report success without the image showing up in listings.
    pub fn set_lose_built_images(&self, lose: bool) {
        self.lose_built_images.store(lose, Ordering::SeqCst);
    }

    /// Makes every image removal fail.
    pub fn set_fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    /// Names of every container killed so far.
    pub fn killed_containers(&self) -> Vec<String> {
        lock(&self.killed).clone()
    }

    /// Tags of every image removed so far.
    pub fn removed_images(&self) -> Vec<String> {
        lock(&self.removed_images).clone()
    }

    /// Names of containers that exist and have not been removed.
    pub fn live_containers(&self) -> Vec<String> {
        lock(&self.containers).keys().cloned().collect()
    }

    fn succeeded(stdout: impl Into<Vec<u8>>) -> CommandOutput {
        CommandOutput {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    fn failed(stderr: impl Into<Vec<u8>>) -> CommandOutput {
        CommandOutput {
            success: false,
            code: Some(1),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerRuntime for ShellRuntime {
    async fn build_image(&self, tag: &str, context_dir: &Path) -> FunctronResult<CommandOutput> {
        let dockerfile = fs::read_to_string(context_dir.join(DOCKERFILE_NAME)).await?;
        if dockerfile.contains(BUILD_FAILURE_MARKER) {
            return Ok(CommandOutput {
                success: false,
                code: Some(1),
                stdout: b"Step 1/1 : FAIL\n".to_vec(),
                stderr: b"build failed\n".to_vec(),
            });
        }

        if !self.lose_built_images.load(Ordering::SeqCst) {
            self.add_image(tag);
        }

        Ok(Self::succeeded(format!("Successfully tagged {}\n", tag)))
    }

    async fn run_container(
        &self,
        tag: &str,
        name: &str,
        context_dir: &Path,
    ) -> FunctronResult<ContainerProcess> {
        let mut command = Command::new("sh");
        if context_dir.join(RUN_SCRIPT_NAME).exists() {
            command.arg(RUN_SCRIPT_NAME);
        } else {
            command.arg("-c").arg("exec cat");
        }

        let child = command
            .current_dir(context_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FunctronError::RuntimeSpawn {
                command: format!("sh {}", RUN_SCRIPT_NAME),
                source,
            })?;

        lock(&self.containers).insert(name.to_string(), tag.to_string());
        Ok(ContainerProcess::new(name, child))
    }

    async fn kill_container(&self, name: &str) -> FunctronResult<CommandOutput> {
        lock(&self.killed).push(name.to_string());
        lock(&self.containers).remove(name);
        Ok(Self::succeeded(format!("{}\n", name)))
    }

    async fn remove_container(&self, name: &str) -> FunctronResult<CommandOutput> {
        match lock(&self.containers).remove(name) {
            Some(_) => Ok(Self::succeeded(format!("{}\n", name))),
            None => Ok(Self::failed(format!("No such container: {}\n", name))),
        }
    }

    async fn remove_image(&self, tag: &str) -> FunctronResult<CommandOutput> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Ok(Self::failed("image is being used by a stopped container\n"));
        }

        if lock(&self.images).remove(&full_tag(tag)) {
            lock(&self.removed_images).push(tag.to_string());
            Ok(Self::succeeded(format!("Untagged: {}\n", tag)))
        } else {
            Ok(Self::failed(format!("No such image: {}\n", tag)))
        }
    }

    async fn list_images(&self) -> FunctronResult<String> {
        let listing = lock(&self.images)
            .iter()
            .map(|tag| match tag.rsplit_once(':') {
                Some((repository, version)) => format!("{}\t{}\n", repository, version),
                None => format!("{}\t<none>\n", tag),
            })
            .collect();
        Ok(listing)
    }

    async fn run_script(
        &self,
        tag: &str,
        name: &str,
        script: &str,
    ) -> FunctronResult<CommandOutput> {
        // The container exists while the script runs, so it can be killed midway
        lock(&self.containers).insert(name.to_string(), tag.to_string());

        let output = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(output.into())
    }

    async fn commit_container(&self, name: &str, tag: &str) -> FunctronResult<CommandOutput> {
        if lock(&self.containers).contains_key(name) {
            self.add_image(tag);
            Ok(Self::succeeded("sha256:0123456789ab\n"))
        } else {
            Ok(Self::failed(format!("No such container: {}\n", name)))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn full_tag(tag: &str) -> String {
    if tag.rsplit_once(':').is_some() {
        tag.to_string()
    } else {
        format!("{}:latest", tag)
    }
}
