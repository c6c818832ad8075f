//! Persistent store of library image definitions.
//!
//! This module handles:
//! - Persisting image definitions for a later build
//! - Point lookups by id and by name, and listing every name
//! - Status updates, either unchecked or validated against the build lifecycle
//! - Deriving the build plan the scheduler works from
//!
//! Every mutating operation re-reads the record it changed and returns that, never the caller's
//! copy, since other callers may have changed the same record in between.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use functron_utils::{DEFAULT_REMOVAL_DELAY_HOURS, IDLE_TICK_DAYS};
use getset::Getters;
use sqlx::{Pool, Sqlite};

use super::db::{self, KeyValueConfig, STORE_DB_MIGRATOR};
use crate::{
    models::{validate_image_name, BuildPlan, FunctronImage, ImageStatus, NewImage},
    FunctronError, FunctronResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const IMAGE_COLUMNS: &str = "id, name, docker_file, pre_commit_script, created, scheduled_build, \
                             finished, scheduled_removal, status";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The image store, a SQLite database of [`FunctronImage`] records.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageStore {
    /// Where the database lives.
    path: PathBuf,

    /// The connection pool.
    pool: Pool<Sqlite>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageStore {
    /// Opens the store at `path`, creating and stamping it on first use.
    ///
    /// Fails with [`FunctronError::UnknownSchemaVersion`] or
    /// [`FunctronError::UnsupportedSchemaVersion`] if the database was not written by a
    /// compatible version.
    pub async fn open(path: impl AsRef<Path>) -> FunctronResult<Self> {
        let path = path.as_ref().to_path_buf();
        let pool = db::get_or_create_pool(&path, &STORE_DB_MIGRATOR).await?;

        let version = db::get_schema_version(&pool).await?;
        tracing::debug!("image store at {} is at schema {:?}", path.display(), version);

        Ok(Self { path, pool })
    }

    /// Closes every connection to the database.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Reads one row of the configuration table.
    pub async fn configuration_value(&self, key: &str) -> FunctronResult<Option<KeyValueConfig>> {
        db::get_configuration_value(&self.pool, key).await
    }

    /// Persists `image` so that it is built as soon as the scheduler next runs.
    ///
    /// The record is created now, due for build now, removed a day from now unless the caller
    /// said otherwise, and starts out [`ImageStatus::Scheduled`].
    pub async fn persist_image_for_build(&self, image: &NewImage) -> FunctronResult<FunctronImage> {
        validate_image_name(&image.name)?;

        let created = Utc::now();
        let scheduled_removal = image
            .scheduled_for_removal
            .unwrap_or_else(|| created + Duration::hours(DEFAULT_REMOVAL_DELAY_HOURS));

        let result = sqlx::query(
            r#"
            INSERT INTO images
                (name, docker_file, pre_commit_script, created, scheduled_build, scheduled_removal, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.name)
        .bind(&image.dockerfile)
        .bind(&image.pre_commit_script)
        .bind(created)
        .bind(created)
        .bind(scheduled_removal)
        .bind(ImageStatus::Scheduled)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                FunctronError::ImageExists(image.name.clone())
            }
            _ => e.into(),
        })?;

        let id = result.last_insert_rowid();
        tracing::info!("persisted image {} with id {} for build", image.name, id);

        self.retrieve_image_by_id(id).await
    }

    /// Returns the record with identity `id`.
    pub async fn retrieve_image_by_id(&self, id: i64) -> FunctronResult<FunctronImage> {
        let rows = sqlx::query_as::<_, FunctronImage>(&format!(
            "SELECT {} FROM images WHERE id = ?",
            IMAGE_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        exactly_one(rows)
    }

    /// Returns the record called `name`.
    pub async fn retrieve_image_by_name(&self, name: &str) -> FunctronResult<FunctronImage> {
        let rows = sqlx::query_as::<_, FunctronImage>(&format!(
            "SELECT {} FROM images WHERE name = ?",
            IMAGE_COLUMNS
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        exactly_one(rows)
    }

    /// Returns the name of every record, whatever its status.
    pub async fn retrieve_images(&self) -> FunctronResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM images ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(names)
    }

    /// Sets the status of `image` without checking the build lifecycle.
    ///
    /// Fails with [`FunctronError::NoMatchingImage`] if the record no longer exists.
    pub async fn update_status(
        &self,
        image: &FunctronImage,
        status: ImageStatus,
    ) -> FunctronResult<FunctronImage> {
        let result = sqlx::query("UPDATE images SET status = ? WHERE id = ?")
            .bind(status)
            .bind(image.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FunctronError::NoMatchingImage);
        }

        tracing::info!("image {} ({}) is now {}", image.name, image.id, status);
        self.retrieve_image_by_id(image.id).await
    }

    /// Moves `image` to `status` if the build lifecycle allows it from the stored status.
    ///
    /// The check runs against the status in the database, not the one in `image`. Moving to
    /// [`ImageStatus::Completed`] also records the finish time.
    pub async fn transition_status(
        &self,
        image: &FunctronImage,
        status: ImageStatus,
    ) -> FunctronResult<FunctronImage> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, ImageStatus>("SELECT status FROM images WHERE id = ?")
            .bind(image.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(FunctronError::NoMatchingImage)?;

        if !status.can_transition_from(current) {
            return Err(FunctronError::InvalidStatusTransition {
                id: image.id,
                from: current,
                to: status,
            });
        }

        let finished = (status == ImageStatus::Completed).then(Utc::now);
        sqlx::query("UPDATE images SET status = ?, finished = COALESCE(?, finished) WHERE id = ?")
            .bind(status)
            .bind(finished)
            .bind(image.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "image {} ({}) moved from {} to {}",
            image.name,
            image.id,
            current,
            status
        );
        self.retrieve_image_by_id(image.id).await
    }

    /// Derives the build plan as of now.
    pub async fn retrieve_build_plan(&self) -> FunctronResult<BuildPlan> {
        self.retrieve_build_plan_at(Utc::now()).await
    }

    /// Derives the build plan as of `now`. Nothing is modified.
    pub async fn retrieve_build_plan_at(&self, now: DateTime<Utc>) -> FunctronResult<BuildPlan> {
        // julianday() compares instants regardless of how each timestamp was written
        let images_needing_cleanup = sqlx::query_as::<_, FunctronImage>(&format!(
            "SELECT {} FROM images \
             WHERE julianday(scheduled_removal) < julianday(?) AND status != ? \
             ORDER BY scheduled_removal, id",
            IMAGE_COLUMNS
        ))
        .bind(now)
        .bind(ImageStatus::CleanedUp)
        .fetch_all(&self.pool)
        .await?;

        let images_needing_build = sqlx::query_as::<_, FunctronImage>(&format!(
            "SELECT {} FROM images \
             WHERE julianday(scheduled_build) < julianday(?) AND status = ? \
             ORDER BY scheduled_build, id",
            IMAGE_COLUMNS
        ))
        .bind(now)
        .bind(ImageStatus::Scheduled)
        .fetch_all(&self.pool)
        .await?;

        // The earliest scheduled record sets the next tick, due or not, so a record persisted
        // just after `now` is picked up on the following tick
        let earliest_scheduled = sqlx::query_as::<_, FunctronImage>(&format!(
            "SELECT {} FROM images WHERE status = ? \
             ORDER BY julianday(scheduled_build), id LIMIT 1",
            IMAGE_COLUMNS
        ))
        .bind(ImageStatus::Scheduled)
        .fetch_optional(&self.pool)
        .await?;

        let next_tick = earliest_scheduled
            .map(|image| image.scheduled_for_build)
            .unwrap_or_else(|| now + Duration::days(IDLE_TICK_DAYS));

        Ok(BuildPlan {
            next_tick,
            images_needing_cleanup,
            images_needing_build,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn exactly_one(mut rows: Vec<FunctronImage>) -> FunctronResult<FunctronImage> {
    match rows.len() {
        0 => Err(FunctronError::NoMatchingImage),
        1 => Ok(rows.remove(0)),
        n => Err(FunctronError::Integrity(n)),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> FunctronResult<(TempDir, ImageStore)> {
        let temp_dir = TempDir::new()?;
        let store = ImageStore::open(temp_dir.path().join("images.db")).await?;
        Ok((temp_dir, store))
    }

    fn new_image(name: &str) -> NewImage {
        NewImage::builder()
            .name(name)
            .dockerfile("FROM alpine\nRUN echo hi\n")
            .build()
    }

    #[test_log::test(tokio::test)]
    async fn test_demo_lifecycle() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        store.persist_image_for_build(&new_image("demo")).await?;
        assert!(store.retrieve_images().await?.contains(&"demo".to_string()));

        let image = store.retrieve_image_by_name("demo").await?;
        assert_eq!(image.status, ImageStatus::Scheduled);
        assert_eq!(image.status.as_str(), "scheduled");

        store.update_status(&image, ImageStatus::Completed).await?;

        let refetched = store.retrieve_image_by_id(image.id).await?;
        assert_eq!(refetched.status.as_str(), "completed");

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_persist_assigns_lifecycle_fields() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        let before = Utc::now();
        let image = store.persist_image_for_build(&new_image("defaults")).await?;

        assert_eq!(image.status, ImageStatus::Scheduled);
        assert_eq!(image.scheduled_for_build, image.created);
        assert!(image.created >= before);
        assert_eq!(
            image.scheduled_for_removal,
            image.created + Duration::hours(DEFAULT_REMOVAL_DELAY_HOURS)
        );
        assert!(image.committed.is_none());
        assert_eq!(image.dockerfile, "FROM alpine\nRUN echo hi\n");

        let removal = Utc::now() + Duration::minutes(5);
        let explicit = NewImage::builder()
            .name("explicit")
            .dockerfile("FROM alpine")
            .pre_commit_script("echo done")
            .scheduled_for_removal(removal)
            .build();
        let image = store.persist_image_for_build(&explicit).await?;
        assert_eq!(image.scheduled_for_removal, removal);
        assert_eq!(image.pre_commit_script, "echo done");
        assert_ne!(image.id, 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_lookups_report_missing_and_duplicate_names() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        assert!(matches!(
            store.retrieve_image_by_name("missing").await,
            Err(FunctronError::NoMatchingImage)
        ));
        assert!(matches!(
            store.retrieve_image_by_id(42).await,
            Err(FunctronError::NoMatchingImage)
        ));

        store.persist_image_for_build(&new_image("unique")).await?;
        assert!(matches!(
            store.persist_image_for_build(&new_image("unique")).await,
            Err(FunctronError::ImageExists(name)) if name == "unique"
        ));

        assert!(matches!(
            store.persist_image_for_build(&new_image("Not Valid")).await,
            Err(FunctronError::InvalidArgument(_))
        ));

        assert!(matches!(
            exactly_one(vec![
                store.retrieve_image_by_name("unique").await?,
                store.retrieve_image_by_name("unique").await?,
            ]),
            Err(FunctronError::Integrity(2))
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_update_status_of_missing_record_fails() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        let mut image = store.persist_image_for_build(&new_image("ghost")).await?;
        image.id += 100;

        assert!(matches!(
            store.update_status(&image, ImageStatus::Completed).await,
            Err(FunctronError::NoMatchingImage)
        ));
        assert!(matches!(
            store.transition_status(&image, ImageStatus::Preparing).await,
            Err(FunctronError::NoMatchingImage)
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_transition_status_follows_lifecycle() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;
        let image = store.persist_image_for_build(&new_image("staged")).await?;

        assert!(matches!(
            store.transition_status(&image, ImageStatus::Completed).await,
            Err(FunctronError::InvalidStatusTransition {
                from: ImageStatus::Scheduled,
                to: ImageStatus::Completed,
                ..
            })
        ));

        let mut current = image;
        for status in [
            ImageStatus::Preparing,
            ImageStatus::BuildingDockerfile,
            ImageStatus::RunningCommitScript,
            ImageStatus::Committing,
        ] {
            current = store.transition_status(&current, status).await?;
            assert_eq!(current.status, status);
            assert!(current.committed.is_none());
        }

        let completed = store
            .transition_status(&current, ImageStatus::Completed)
            .await?;
        assert_eq!(completed.status, ImageStatus::Completed);
        assert!(completed.committed.is_some());

        // A stale copy is checked against what is stored, not what it says
        assert!(matches!(
            store.transition_status(&current, ImageStatus::FailedCommit).await,
            Err(FunctronError::InvalidStatusTransition {
                from: ImageStatus::Completed,
                ..
            })
        ));

        let removed = store
            .transition_status(&completed, ImageStatus::CleanedUp)
            .await?;
        assert_eq!(removed.status, ImageStatus::CleanedUp);
        assert!(store
            .transition_status(&removed, ImageStatus::CleanedUp)
            .await
            .is_err());

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_build_plan() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        let pending = store.persist_image_for_build(&new_image("pending")).await?;
        let expiring = store
            .persist_image_for_build(
                &NewImage::builder()
                    .name("expiring")
                    .dockerfile("FROM alpine")
                    .scheduled_for_removal(Utc::now() - Duration::minutes(1))
                    .build(),
            )
            .await?;
        let built = store.persist_image_for_build(&new_image("built")).await?;
        let built = store.update_status(&built, ImageStatus::Completed).await?;

        let now = Utc::now() + Duration::seconds(1);
        let plan = store.retrieve_build_plan_at(now).await?;

        let build_names: Vec<_> = plan.images_needing_build.iter().map(|i| &i.name).collect();
        assert_eq!(build_names, ["pending", "expiring"]);
        let cleanup_names: Vec<_> = plan.images_needing_cleanup.iter().map(|i| &i.name).collect();
        assert_eq!(cleanup_names, ["expiring"]);
        assert_eq!(plan.next_tick, pending.scheduled_for_build);
        assert!(plan.next_tick <= expiring.scheduled_for_build);
        assert!(!plan.is_idle());

        // Querying the plan changes nothing
        assert_eq!(store.retrieve_image_by_id(built.id).await?, built);
        assert_eq!(
            store.retrieve_image_by_id(pending.id).await?.status,
            ImageStatus::Scheduled
        );

        // Removed images never need cleaning again
        store
            .update_status(&expiring, ImageStatus::CleanedUp)
            .await?;
        let plan = store.retrieve_build_plan_at(now).await?;
        assert!(plan.images_needing_cleanup.is_empty());
        assert_eq!(plan.images_needing_build.len(), 1);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_idle_build_plan_looks_far_ahead() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        let now = Utc::now();
        let plan = store.retrieve_build_plan_at(now).await?;
        assert!(plan.is_idle());
        assert_eq!(plan.next_tick, now + Duration::days(IDLE_TICK_DAYS));

        // Records persisted after `now` are not yet due, but still bring the next tick forward
        let future = store.persist_image_for_build(&new_image("future")).await?;
        let plan = store
            .retrieve_build_plan_at(now - Duration::seconds(1))
            .await?;
        assert!(plan.images_needing_build.is_empty());
        assert_eq!(plan.next_tick, future.scheduled_for_build);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_plan_at_creation_instant_ticks_at_the_new_record() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        // A tick landing in the same instant as the persist must not push the next tick out
        let image = store.persist_image_for_build(&new_image("fresh")).await?;
        let plan = store.retrieve_build_plan_at(image.created).await?;
        assert!(plan.images_needing_build.is_empty());
        assert_eq!(plan.next_tick, image.scheduled_for_build);

        let plan = store
            .retrieve_build_plan_at(image.created + Duration::milliseconds(1))
            .await?;
        assert_eq!(plan.images_needing_build, vec![image.clone()]);

        // Only scheduled records count
        store.update_status(&image, ImageStatus::Completed).await?;
        let plan = store.retrieve_build_plan_at(image.created).await?;
        assert_eq!(plan.next_tick, image.created + Duration::days(IDLE_TICK_DAYS));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_persist_rejects_taken_name() -> FunctronResult<()> {
        let (_temp_dir, store) = open_store().await?;

        let first = store.persist_image_for_build(&new_image("taken")).await?;
        let err = store
            .persist_image_for_build(&new_image("taken"))
            .await
            .unwrap_err();
        assert!(matches!(&err, FunctronError::ImageExists(name) if name == "taken"));
        assert_eq!(err.to_string(), "image 'taken' already exists");

        // The first record is untouched
        assert_eq!(store.retrieve_image_by_name("taken").await?, first);
        assert_eq!(store.retrieve_images().await?, vec!["taken".to_string()]);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_reopen_keeps_records() -> FunctronResult<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("images.db");

        let store = ImageStore::open(&path).await?;
        let image = store.persist_image_for_build(&new_image("durable")).await?;
        assert_eq!(
            store.configuration_value("db_schema").await?.map(|kv| kv.value),
            Some("v1".to_string())
        );
        store.close().await;

        let store = ImageStore::open(&path).await?;
        assert_eq!(store.retrieve_image_by_name("durable").await?, image);
        assert_eq!(store.get_path(), &path);

        Ok(())
    }
}
