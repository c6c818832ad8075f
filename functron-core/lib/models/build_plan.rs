use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FunctronImage;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What the build scheduler has to do right now, derived from the image store.
///
/// A plan is never persisted; it is recomputed every time the store is asked for one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlan {
    /// When the scheduler next needs to look at the store.
    pub next_tick: DateTime<Utc>,

    /// Images whose removal deadline has passed and that are not yet removed.
    pub images_needing_cleanup: Vec<FunctronImage>,

    /// Images whose build time has passed and that are still scheduled.
    pub images_needing_build: Vec<FunctronImage>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BuildPlan {
    /// Whether the plan has no work in it.
    pub fn is_idle(&self) -> bool {
        self.images_needing_cleanup.is_empty() && self.images_needing_build.is_empty()
    }
}
