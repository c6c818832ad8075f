//! Utility functions for working with environment variables.

use std::path::PathBuf;

use crate::{DEFAULT_DOCKER_EXE, DEFAULT_FUNCTRON_HOME};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the functron home directory
pub const FUNCTRON_HOME_ENV_VAR: &str = "FUNCTRON_HOME";

/// Environment variable for the docker executable
pub const DOCKER_EXE_ENV_VAR: &str = "FUNCTRON_DOCKER";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path to the functron home directory.
/// If the FUNCTRON_HOME environment variable is set, returns that path.
/// Otherwise, returns the default functron home path.
pub fn get_functron_home_path() -> PathBuf {
    if let Ok(functron_home) = std::env::var(FUNCTRON_HOME_ENV_VAR) {
        PathBuf::from(functron_home)
    } else {
        DEFAULT_FUNCTRON_HOME.to_owned()
    }
}

/// Returns the docker executable to invoke.
pub fn get_docker_exe() -> String {
    std::env::var(DOCKER_EXE_ENV_VAR).unwrap_or_else(|_| DEFAULT_DOCKER_EXE.to_string())
}
