//! The build scheduler.
//!
//! This module handles:
//! - Driving images that are due through the build lifecycle
//! - Running pre-commit scripts, killing any that overrun, and committing their result
//! - Removing images whose removal deadline has passed
//! - Sleeping until the next thing is due, or until woken
//!
//! Every status change goes through [`ImageStore::transition_status`], so the scheduler can
//! only move records along the lifecycle.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use functron_utils::PRE_COMMIT_SCRIPT_TIMEOUT_SECS;
use getset::Getters;
use tokio::sync::Notify;

use super::{format_image_name, ImageLibrary, ImageStore};
use crate::{
    models::{FunctronImage, ImageStatus},
    runtime::ContainerRuntime,
    FunctronError, FunctronResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The shortest pause between two ticks.
const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Prefix of the containers pre-commit scripts run in.
const COMMIT_CONTAINER_PREFIX: &str = "functron-commit-";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Builds and removes library images according to the image store.
pub struct BuildScheduler {
    store: ImageStore,
    library: Arc<ImageLibrary>,
    runtime: Arc<dyn ContainerRuntime>,
    poll_interval: Duration,
    script_timeout: Duration,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct TickReport {
    /// Final status of every image the tick tried to build, by name.
    built: Vec<(String, ImageStatus)>,

    /// Images removed from the runtime.
    cleaned: Vec<String>,

    /// Images whose removal was put off because they are still referenced.
    deferred: Vec<String>,

    /// When the next tick is due.
    next_tick: Option<DateTime<Utc>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BuildScheduler {
    /// Creates a scheduler that waits at most `poll_interval` between ticks.
    pub fn new(
        store: ImageStore,
        library: Arc<ImageLibrary>,
        runtime: Arc<dyn ContainerRuntime>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            library,
            runtime,
            poll_interval,
            script_timeout: Duration::from_secs(PRE_COMMIT_SCRIPT_TIMEOUT_SECS),
        }
    }

    /// Sets how long a pre-commit script may run before its container is killed.
    pub fn with_script_timeout(mut self, script_timeout: Duration) -> Self {
        self.script_timeout = script_timeout;
        self
    }

    /// Works through the current build plan once.
    ///
    /// A failure on one image is logged and does not stop the others.
    pub async fn tick(&self) -> FunctronResult<TickReport> {
        let plan = self.store.retrieve_build_plan().await?;
        let mut report = TickReport {
            next_tick: Some(plan.next_tick),
            ..Default::default()
        };

        if !plan.is_idle() {
            tracing::info!(
                "tick: {} image(s) to build, {} to clean up",
                plan.images_needing_build.len(),
                plan.images_needing_cleanup.len()
            );
        }

        for image in plan.images_needing_build {
            let name = image.name.clone();
            match self.build(image).await {
                Ok(status) => report.built.push((name, status)),
                Err(e) => tracing::error!("failed to drive build of image {}: {}", name, e),
            }
        }

        // Images built above may already be due for removal, so re-read each one
        for image in plan.images_needing_cleanup {
            let image = match self.store.retrieve_image_by_id(image.id).await {
                Ok(image) => image,
                Err(e) => {
                    tracing::error!("failed to re-read image {}: {}", image.name, e);
                    continue;
                }
            };

            match self.clean(&image).await {
                Ok(true) => report.cleaned.push(image.name),
                Ok(false) => report.deferred.push(image.name),
                Err(e) => tracing::error!("failed to clean up image {}: {}", image.name, e),
            }
        }

        Ok(report)
    }

    /// Ticks forever, sleeping between ticks until the next one is due, the poll interval has
    /// passed or `wakeup` is notified.
    pub async fn run(&self, wakeup: Arc<Notify>) {
        tracing::info!(
            "build scheduler started, polling every {}s",
            self.poll_interval.as_secs()
        );

        loop {
            let wait = match self.tick().await {
                Ok(report) => report
                    .next_tick
                    .and_then(|next| (next - Utc::now()).to_std().ok())
                    .unwrap_or(Duration::ZERO)
                    .min(self.poll_interval),
                Err(e) => {
                    tracing::error!("build scheduler tick failed: {}", e);
                    self.poll_interval
                }
            };
            let wait = wait.max(MIN_TICK_INTERVAL);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = wakeup.notified() => tracing::debug!("build scheduler woken early"),
            }
        }
    }

    /// Drives one image from scheduled to its final status, which is returned.
    async fn build(&self, image: FunctronImage) -> FunctronResult<ImageStatus> {
        let image = self
            .store
            .transition_status(&image, ImageStatus::Preparing)
            .await?;

        let context = match self.library.prepare_build_context(&image.dockerfile).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!("could not stage build of image {}: {}", image.name, e);
                return self.fail(&image, ImageStatus::FailedPreparation).await;
            }
        };

        let image = self
            .store
            .transition_status(&image, ImageStatus::BuildingDockerfile)
            .await?;

        match self.library.build_from_context(&image.name, context.path()).await {
            Ok(output) if output.success => {}
            Ok(output) => {
                tracing::warn!(
                    "docker build of image {} failed: {}",
                    image.name,
                    output.stderr_lossy().trim()
                );
                return self.fail(&image, ImageStatus::FailedDockerfile).await;
            }
            Err(e) => {
                tracing::warn!("docker build of image {} failed: {}", image.name, e);
                return self.fail(&image, ImageStatus::FailedDockerfile).await;
            }
        }
        drop(context);

        let image = self
            .store
            .transition_status(&image, ImageStatus::RunningCommitScript)
            .await?;

        let tag = format_image_name(&image.name);
        let script = image.pre_commit_script.trim();
        let container = format!("{}{}", COMMIT_CONTAINER_PREFIX, uuid::Uuid::new_v4());

        if !script.is_empty() {
            let run = self.runtime.run_script(&tag, &container, script);
            let script_ok = match tokio::time::timeout(self.script_timeout, run).await {
                Ok(Ok(output)) if output.success => true,
                Ok(Ok(output)) => {
                    tracing::warn!(
                        "pre-commit script of image {} failed: {}",
                        image.name,
                        output.stderr_lossy().trim()
                    );
                    false
                }
                Ok(Err(e)) => {
                    tracing::warn!("pre-commit script of image {} failed: {}", image.name, e);
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        "pre-commit script of image {} ran longer than {}s, killing {}",
                        image.name,
                        self.script_timeout.as_secs_f64(),
                        container
                    );
                    self.kill_container(&container).await;
                    false
                }
            };

            if !script_ok {
                self.remove_container(&container).await;
                return self.fail(&image, ImageStatus::FailedCommitScript).await;
            }
        }

        let image = self
            .store
            .transition_status(&image, ImageStatus::Committing)
            .await?;

        if !script.is_empty() {
            let committed = self.runtime.commit_container(&container, &tag).await;
            self.remove_container(&container).await;

            match committed {
                Ok(output) if output.success => {}
                Ok(output) => {
                    tracing::warn!(
                        "commit of image {} failed: {}",
                        image.name,
                        output.stderr_lossy().trim()
                    );
                    return self.fail(&image, ImageStatus::FailedCommit).await;
                }
                Err(e) => {
                    tracing::warn!("commit of image {} failed: {}", image.name, e);
                    return self.fail(&image, ImageStatus::FailedCommit).await;
                }
            }
        }

        let image = self
            .store
            .transition_status(&image, ImageStatus::Completed)
            .await?;

        if !self.library.check_image_built(&image.name).await? {
            tracing::warn!(
                "image {} was built but the runtime does not list {}",
                image.name,
                tag
            );
            return self.fail(&image, ImageStatus::Invalid).await;
        }

        tracing::info!("image {} is built", image.name);
        Ok(image.status)
    }

    /// Removes a due image. Returns `false` if it is still referenced.
    async fn clean(&self, image: &FunctronImage) -> FunctronResult<bool> {
        if image.status == ImageStatus::CleanedUp {
            return Ok(true);
        }

        match self.library.delete_image(&image.name).await {
            Ok(()) => {}
            Err(FunctronError::ImageNotBuilt(_)) => {
                tracing::debug!("image {} was never built, nothing to remove", image.name);
            }
            Err(FunctronError::ImageInUse { count, .. }) => {
                tracing::info!(
                    "image {} is due for removal but has {} reference(s), trying again later",
                    image.name,
                    count
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.store
            .transition_status(image, ImageStatus::CleanedUp)
            .await?;
        Ok(true)
    }

    async fn fail(&self, image: &FunctronImage, status: ImageStatus) -> FunctronResult<ImageStatus> {
        let image = self.store.transition_status(image, status).await?;
        Ok(image.status)
    }

    async fn kill_container(&self, name: &str) {
        match self.runtime.kill_container(name).await {
            Ok(output) if !output.success => {
                tracing::warn!(
                    "could not kill container {}: {}",
                    name,
                    output.stderr_lossy().trim()
                );
            }
            Err(e) => tracing::warn!("could not kill container {}: {}", name, e),
            Ok(_) => {}
        }
    }

    async fn remove_container(&self, name: &str) {
        match self.runtime.remove_container(name).await {
            Ok(output) if !output.success => {
                tracing::warn!(
                    "could not remove container {}: {}",
                    name,
                    output.stderr_lossy().trim()
                );
            }
            Err(e) => tracing::warn!("could not remove container {}: {}", name, e),
            Ok(_) => {}
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
