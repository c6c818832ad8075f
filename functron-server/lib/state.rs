//! Application state management for the functron server.
//!
//! This module handles:
//! - Global application state
//! - Wiring the image store, image library and invoker to one container runtime
//! - Waking the build scheduler when new work is persisted
//!
//! The module provides:
//! - Thread-safe application state container
//! - Construction of the build scheduler that shares this state

use std::sync::Arc;

use functron_core::{
    management::{BuildScheduler, ImageLibrary, ImageStore, Invoker},
    runtime::ContainerRuntime,
    utils::NameGenerator,
};
use functron_utils::SCRATCH_SUBDIR;
use getset::Getters;
use tokio::sync::Notify;

use crate::config::Config;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Application state structure
#[derive(Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct AppState {
    /// The application configuration
    config: Arc<Config>,

    /// The persistent image store
    store: ImageStore,

    /// The reference counted library of built images
    library: Arc<ImageLibrary>,

    /// The one-shot invocation pipeline
    invoker: Arc<Invoker>,

    /// The container runtime everything above shares
    runtime: Arc<dyn ContainerRuntime>,

    /// Wakes the build scheduler before its next planned tick
    scheduler_wakeup: Arc<Notify>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AppState {
    /// Create a new application state instance
    pub fn new(config: Arc<Config>, store: ImageStore, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let names = match config.get_name_seed() {
            Some(seed) => {
                tracing::info!("using seed {} for temporary image names", seed);
                NameGenerator::from_seed(*seed)
            }
            None => NameGenerator::from_entropy(),
        };

        let library = Arc::new(ImageLibrary::new(
            runtime.clone(),
            config.get_scratch_dir().join(SCRATCH_SUBDIR),
        ));
        let invoker = Arc::new(Invoker::new(
            runtime.clone(),
            config.get_scratch_dir(),
            names,
        ));

        Self {
            config,
            store,
            library,
            invoker,
            runtime,
            scheduler_wakeup: Arc::new(Notify::new()),
        }
    }

    /// Create a build scheduler that works on this state's store and library
    pub fn build_scheduler(&self) -> BuildScheduler {
        BuildScheduler::new(
            self.store.clone(),
            self.library.clone(),
            self.runtime.clone(),
            *self.config.get_poll_interval(),
        )
    }

    /// Ask the build scheduler to look at the store now
    pub fn wake_scheduler(&self) {
        self.scheduler_wakeup.notify_one();
    }
}
