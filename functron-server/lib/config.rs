//! Configuration module for the functron server.
//!
//! This module handles server configuration including:
//! - The listen address
//! - Where the image store and invocation scratch space live
//! - Scheduler polling and name generation settings
//! - Slots and the repositron URL loaded from the configuration file
//!
//! The module provides:
//! - Configuration structure for server settings
//! - Defaults taken from `functron-utils`
//! - Merging of a loaded [`Configuration`] file

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use functron_core::config::{Configuration, SlotConfig};
use functron_utils::{env, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SERVER_PORT, IMAGE_DB_FILENAME};
use getset::Getters;

use crate::{ServerError, ServerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration structure that holds all the server settings
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Config {
    /// Address to listen on
    addr: SocketAddr,

    /// Path of the SQLite image store
    db_path: PathBuf,

    /// Directory invocation and build contexts are staged under
    scratch_dir: PathBuf,

    /// Longest the build scheduler sleeps between ticks
    poll_interval: Duration,

    /// Seed for temporary image names, for reproducible runs
    name_seed: Option<u64>,

    /// URL of the repositron service, if one is configured
    repositron_url: Option<String>,

    /// Execution slots from the configuration file
    slots: Vec<SlotConfig>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Create a new configuration
    ///
    /// The database defaults to `images.db` under the functron home directory and the scratch
    /// directory defaults to the system temporary directory.
    pub fn new(
        host: IpAddr,
        port: u16,
        db_path: Option<PathBuf>,
        scratch_dir: Option<PathBuf>,
        poll_interval: Duration,
        name_seed: Option<u64>,
    ) -> ServerResult<Self> {
        if port == 0 {
            return Err(ServerError::ConfigError(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        if poll_interval.is_zero() {
            return Err(ServerError::ConfigError(
                "poll interval must be at least one second".to_string(),
            ));
        }

        let db_path =
            db_path.unwrap_or_else(|| env::get_functron_home_path().join(IMAGE_DB_FILENAME));
        let scratch_dir = scratch_dir.unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            addr: SocketAddr::new(host, port),
            db_path,
            scratch_dir,
            poll_interval,
            name_seed,
            repositron_url: None,
            slots: Vec::new(),
        })
    }

    /// Takes slots and the repositron URL from a loaded configuration file.
    pub fn with_configuration(mut self, configuration: &Configuration) -> Self {
        self.repositron_url = configuration.get_repositron_url().clone();
        self.slots = configuration.get_slots().clone();
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_SERVER_PORT),
            db_path: env::get_functron_home_path().join(IMAGE_DB_FILENAME),
            scratch_dir: std::env::temp_dir(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            name_seed: None,
            repositron_url: None,
            slots: Vec::new(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
