//! The functron configuration file.
//!
//! The file is JSON and keeps the key names existing deployments already use:
//!
//! ```json
//! {
//!     "Port": 8081,
//!     "RepositronURL": "http://repositron:8080",
//!     "Slots": [
//!         { "environment_vars": { "OMP_NUM_THREADS": "1" }, "Tags": ["hiMem"], "CmdPrefix": "taskset -c 0" }
//!     ]
//! }
//! ```

use std::{collections::HashMap, path::Path};

use getset::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Configuration for one functron instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Configuration {
    /// The port to listen for HTTP requests on.
    #[serde(rename = "Port", alias = "port", default)]
    port: Option<u16>,

    /// Base URL of the repositron server output is streamed to.
    #[serde(rename = "RepositronURL", alias = "repositron_url", default)]
    repositron_url: Option<String>,

    /// The resources available on this machine.
    #[serde(rename = "Slots", alias = "slots", default)]
    slots: Vec<SlotConfig>,
}

/// One execution slot on this machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct SlotConfig {
    /// Environment variables set for work assigned to this slot.
    #[serde(default)]
    environment_vars: HashMap<String, String>,

    /// Tags used to assign work to this slot, e.g. `hiMem`.
    #[serde(rename = "Tags", alias = "tags", default)]
    tags: Vec<String>,

    /// A command prefixed to every runtime command issued for this slot, e.g. `taskset -c 0`.
    #[serde(rename = "CmdPrefix", alias = "cmd_prefix", default)]
    cmd_prefix: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Configuration {
    /// Reads and validates a configuration file.
    pub async fn read(path: impl AsRef<Path>) -> FunctronResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let configuration: Configuration = serde_json::from_str(&contents)?;
        configuration.validate()?;

        tracing::info!(
            "loaded configuration from {} ({} slot(s))",
            path.display(),
            configuration.slots.len()
        );

        Ok(configuration)
    }

    /// Checks values serde cannot check on its own.
    pub fn validate(&self) -> FunctronResult<()> {
        if self.port == Some(0) {
            return Err(FunctronError::InvalidConfig(
                "Port must be non-zero".to_string(),
            ));
        }

        if let Some(url) = &self.repositron_url {
            if url.trim().is_empty() {
                return Err(FunctronError::InvalidConfig(
                    "RepositronURL cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The first non-empty command prefix among the slots.
    pub fn get_cmd_prefix(&self) -> Option<&str> {
        self.slots
            .iter()
            .filter_map(|slot| slot.cmd_prefix.as_deref())
            .map(str::trim)
            .find(|prefix| !prefix.is_empty())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
