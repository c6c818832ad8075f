//! Image records and their build lifecycle.
//!
//! This module handles:
//! - The persisted image record and the input used to create one
//! - The closed set of build statuses and which transitions between them are legal
//! - Image name validation shared by the store and the invocation pipeline
//! - Opaque handles issued by the image library

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Upper bound on the length of an image name.
pub const MAX_IMAGE_NAME_LEN: usize = 96;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A persisted image definition together with where it is in its build lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FunctronImage {
    /// Identity assigned by the store.
    pub id: i64,

    /// Unique short name. The built image is tagged `functron-<name>`.
    #[serde(rename = "imageName")]
    pub name: String,

    /// The Dockerfile the image is built from.
    #[serde(rename = "dockerInstructions")]
    #[sqlx(rename = "docker_file")]
    pub dockerfile: String,

    /// A shell script run inside the built image before it is committed.
    #[serde(rename = "preCommitScript")]
    pub pre_commit_script: String,

    /// When the record was persisted.
    pub created: DateTime<Utc>,

    /// When the build becomes due.
    #[serde(rename = "scheduled")]
    #[sqlx(rename = "scheduled_build")]
    pub scheduled_for_build: DateTime<Utc>,

    /// When the build completed, if it has.
    #[serde(rename = "finished")]
    #[sqlx(rename = "finished")]
    pub committed: Option<DateTime<Utc>>,

    /// When the built image should be removed again.
    #[serde(rename = "scheduledRemoval")]
    #[sqlx(rename = "scheduled_removal")]
    pub scheduled_for_removal: DateTime<Utc>,

    /// Where the record is in its lifecycle.
    pub status: ImageStatus,
}

/// The caller supplied part of an image record.
///
/// Creation, build and status fields are always assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct NewImage {
    /// Unique short name.
    #[serde(rename = "imageName")]
    #[builder(setter(into))]
    pub name: String,

    /// The Dockerfile the image is built from.
    #[serde(rename = "dockerInstructions")]
    #[builder(setter(into))]
    pub dockerfile: String,

    /// Script run inside the built image before committing; empty for none.
    #[serde(rename = "preCommitScript", default)]
    #[builder(default, setter(into))]
    pub pre_commit_script: String,

    /// When the built image should be removed. Defaults to a day after creation.
    #[serde(rename = "scheduledRemoval", default)]
    #[builder(default, setter(strip_option))]
    pub scheduled_for_removal: Option<DateTime<Utc>>,
}

/// The build lifecycle of an image record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
pub enum ImageStatus {
    /// Persisted and waiting for its build time.
    #[serde(rename = "scheduled")]
    #[sqlx(rename = "scheduled")]
    Scheduled,

    /// The build context is being staged.
    #[serde(rename = "preparing")]
    #[sqlx(rename = "preparing")]
    Preparing,

    /// The Dockerfile is being built.
    #[serde(rename = "building_dockerfile")]
    #[sqlx(rename = "building_dockerfile")]
    BuildingDockerfile,

    /// The pre-commit script is running inside the built image.
    #[serde(rename = "building_commit_script")]
    #[sqlx(rename = "building_commit_script")]
    RunningCommitScript,

    /// The script's container is being committed back onto the image.
    #[serde(rename = "committing")]
    #[sqlx(rename = "committing")]
    Committing,

    /// The image is built and available.
    #[serde(rename = "completed")]
    #[sqlx(rename = "completed")]
    Completed,

    /// The image was removed after its removal deadline.
    #[serde(rename = "removed")]
    #[sqlx(rename = "removed")]
    CleanedUp,

    /// Staging the build context failed.
    #[serde(rename = "failed_preparation")]
    #[sqlx(rename = "failed_preparation")]
    FailedPreparation,

    /// `docker build` failed.
    #[serde(rename = "failed_docker")]
    #[sqlx(rename = "failed_docker")]
    FailedDockerfile,

    /// The pre-commit script failed.
    #[serde(rename = "failed_commit_script")]
    #[sqlx(rename = "failed_commit_script")]
    FailedCommitScript,

    /// Committing the script's container failed.
    #[serde(rename = "failed_commit")]
    #[sqlx(rename = "failed_commit")]
    FailedCommit,

    /// The runtime does not report the image that was supposedly built.
    #[serde(rename = "invalid")]
    #[sqlx(rename = "invalid")]
    Invalid,
}

/// An opaque token proving a reference on a library image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(u64);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ImageStatus; 12] = [
        ImageStatus::Scheduled,
        ImageStatus::Preparing,
        ImageStatus::BuildingDockerfile,
        ImageStatus::RunningCommitScript,
        ImageStatus::Committing,
        ImageStatus::Completed,
        ImageStatus::CleanedUp,
        ImageStatus::FailedPreparation,
        ImageStatus::FailedDockerfile,
        ImageStatus::FailedCommitScript,
        ImageStatus::FailedCommit,
        ImageStatus::Invalid,
    ];

    /// The string stored in the database and used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Scheduled => "scheduled",
            ImageStatus::Preparing => "preparing",
            ImageStatus::BuildingDockerfile => "building_dockerfile",
            ImageStatus::RunningCommitScript => "building_commit_script",
            ImageStatus::Committing => "committing",
            ImageStatus::Completed => "completed",
            ImageStatus::CleanedUp => "removed",
            ImageStatus::FailedPreparation => "failed_preparation",
            ImageStatus::FailedDockerfile => "failed_docker",
            ImageStatus::FailedCommitScript => "failed_commit_script",
            ImageStatus::FailedCommit => "failed_commit",
            ImageStatus::Invalid => "invalid",
        }
    }

    /// The statuses a record may be in immediately before entering this one.
    ///
    /// `Scheduled` is only ever assigned on insert, so it has none. `CleanedUp` may follow
    /// anything but itself, since removal deadlines apply to failed builds too.
    pub fn legal_predecessors(&self) -> &'static [ImageStatus] {
        use ImageStatus::*;

        match self {
            Scheduled => &[],
            Preparing => &[Scheduled],
            BuildingDockerfile => &[Preparing],
            RunningCommitScript => &[BuildingDockerfile],
            Committing => &[RunningCommitScript],
            Completed => &[Committing],
            FailedPreparation => &[Preparing],
            FailedDockerfile => &[BuildingDockerfile],
            FailedCommitScript => &[RunningCommitScript],
            FailedCommit => &[Committing],
            Invalid => &[Committing, Completed],
            CleanedUp => &[
                Scheduled,
                Preparing,
                BuildingDockerfile,
                RunningCommitScript,
                Committing,
                Completed,
                FailedPreparation,
                FailedDockerfile,
                FailedCommitScript,
                FailedCommit,
                Invalid,
            ],
        }
    }

    /// Whether a record in `from` may move to this status.
    pub fn can_transition_from(&self, from: ImageStatus) -> bool {
        self.legal_predecessors().contains(&from)
    }

    /// Whether the build lifecycle has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageStatus::Completed | ImageStatus::CleanedUp) || self.is_failure()
    }

    /// Whether this status records a failed or unreconcilable build.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ImageStatus::FailedPreparation
                | ImageStatus::FailedDockerfile
                | ImageStatus::FailedCommitScript
                | ImageStatus::FailedCommit
                | ImageStatus::Invalid
        )
    }
}

impl ImageHandle {
    /// Wraps a raw handle value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw handle value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that `name` can be used inside a container image reference.
///
/// Names must start with a lowercase letter or digit and may then contain lowercase letters,
/// digits, `-`, `_` and `.`.
pub fn validate_image_name(name: &str) -> FunctronResult<()> {
    if name.is_empty() {
        return Err(FunctronError::InvalidArgument(
            "image name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_IMAGE_NAME_LEN {
        return Err(FunctronError::InvalidArgument(format!(
            "image name '{}' is longer than {} characters",
            name, MAX_IMAGE_NAME_LEN
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let rest_ok =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));

    if !first_ok || !rest_ok {
        return Err(FunctronError::InvalidArgument(format!(
            "image name '{}' may only contain lowercase letters, digits, '-', '_' and '.'",
            name
        )));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = FunctronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| FunctronError::InvalidArgument(format!("unknown image status: {}", s)))
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
