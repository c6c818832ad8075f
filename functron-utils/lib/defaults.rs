//! Default values and well-known names used across functron.

use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default port the server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 8081;

/// The name of the functron home directory, relative to the user's home.
pub const FUNCTRON_HOME_DIR: &str = ".functron";

/// The default functron home directory.
pub static DEFAULT_FUNCTRON_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(FUNCTRON_HOME_DIR)
});

/// The filename of the image store database.
pub const IMAGE_DB_FILENAME: &str = "images.db";

/// The subdirectory of the scratch directory that holds invocation directories.
///
/// Kept stable so that a server running inside a container and the host daemon
/// building on its behalf can agree on the path.
pub const SCRATCH_SUBDIR: &str = "functron";

/// The prefix of every invocation temporary directory.
pub const INVOCATION_DIR_PREFIX: &str = "functron-invocation";

/// The prefix of every image functron builds.
pub const IMAGE_NAME_PREFIX: &str = "functron-";

/// The tag version given to temporary invocation images.
pub const TEMPORARY_TAG_VERSION: &str = "1.0";

/// The number of random letters in a temporary image tag.
pub const TEMPORARY_TAG_SUFFIX_LEN: usize = 5;

/// The name of the Dockerfile written into a build context.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Where the build context is mounted inside a running container.
pub const CONTAINER_DATA_MOUNT: &str = "/data";

/// Seconds docker waits for a container to stop before killing it.
pub const CONTAINER_STOP_TIMEOUT_SECS: u32 = 5;

/// Hours after creation at which an image is removed, unless told otherwise.
pub const DEFAULT_REMOVAL_DELAY_HOURS: i64 = 24;

/// Days to look ahead when nothing needs building.
pub const IDLE_TICK_DAYS: i64 = 28;

/// Seconds between scheduler wake-ups when nothing else wakes it.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// The docker executable used when no override is set.
pub const DEFAULT_DOCKER_EXE: &str = "docker";

/// Seconds a pre-commit script may run before its container is killed.
pub const PRE_COMMIT_SCRIPT_TIMEOUT_SECS: u64 = 600;
