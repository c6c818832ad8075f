//! Reference counted library of long lived images.
//!
//! Library images are built once (by the build scheduler) and then shared. Callers acquire a
//! handle before relying on an image and release it afterwards; an image with outstanding
//! handles cannot be deleted. All bookkeeping sits behind one lock, so acquisitions, releases
//! and deletions are totally ordered. A lock per image name would let unrelated images proceed
//! in parallel if that ever becomes a bottleneck.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use functron_utils::{DOCKERFILE_NAME, IMAGE_NAME_PREFIX};
use getset::Getters;
use tempfile::TempDir;
use tokio::{fs, sync::Mutex};

use crate::{
    models::ImageHandle,
    runtime::{CommandOutput, ContainerRuntime},
    FunctronError, FunctronResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Prefix of the temporary directories library builds are staged in.
const BUILD_DIR_PREFIX: &str = "functron-build";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The image library.
#[derive(Getters)]
pub struct ImageLibrary {
    runtime: Arc<dyn ContainerRuntime>,

    /// Directory build contexts are staged under.
    #[getset(get = "pub with_prefix")]
    scratch_dir: PathBuf,

    state: Mutex<LibraryState>,
}

#[derive(Debug)]
struct LibraryState {
    ref_counts: HashMap<String, u64>,
    handles: HashMap<ImageHandle, String>,
    next_handle: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageLibrary {
    /// Creates an empty library that stages builds under `scratch_dir`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            scratch_dir: scratch_dir.into(),
            state: Mutex::new(LibraryState {
                ref_counts: HashMap::new(),
                handles: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Whether the runtime reports an image called `functron-<name>`.
    pub async fn check_image_built(&self, name: &str) -> FunctronResult<bool> {
        let _state = self.state.lock().await;
        self.is_listed(name).await
    }

    /// Short names of every built `functron-` image.
    pub async fn get_images(&self) -> FunctronResult<Vec<String>> {
        let _state = self.state.lock().await;
        let listing = self.runtime.list_images().await?;

        let mut names: Vec<String> = listed_short_names(&listing).map(str::to_string).collect();
        names.sort();
        names.dedup();

        Ok(names)
    }

    /// Takes a reference on `name`, which must already be built.
    ///
    /// No handle is issued for an image that is not built.
    pub async fn acquire_image(&self, name: &str) -> FunctronResult<ImageHandle> {
        let mut state = self.state.lock().await;

        if !self.is_listed(name).await? {
            return Err(FunctronError::ImageNotBuilt(name.to_string()));
        }

        *state.ref_counts.entry(name.to_string()).or_insert(0) += 1;

        let handle = ImageHandle::new(state.next_handle);
        state.next_handle += 1;
        state.handles.insert(handle, name.to_string());

        tracing::debug!("issued handle {} for image {}", handle, name);
        Ok(handle)
    }

    /// Gives back a reference taken with [`ImageLibrary::acquire_image`].
    ///
    /// Each handle can be released once.
    pub async fn release_image(&self, handle: ImageHandle) -> FunctronResult<()> {
        let mut state = self.state.lock().await;

        let name = state
            .handles
            .remove(&handle)
            .ok_or(FunctronError::InvalidHandle(handle))?;

        match state.ref_counts.get_mut(&name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                tracing::debug!("released handle {} for image {}", handle, name);
                Ok(())
            }
            _ => {
                tracing::error!(
                    "handle {} for image {} has no reference to release",
                    handle,
                    name
                );
                Err(FunctronError::RefCountUnderflow(name))
            }
        }
    }

    /// Removes `functron-<name>` from the runtime, if nothing holds a reference to it.
    pub async fn delete_image(&self, name: &str) -> FunctronResult<()> {
        let mut state = self.state.lock().await;

        if !self.is_listed(name).await? {
            return Err(FunctronError::ImageNotBuilt(name.to_string()));
        }

        if let Some(&count) = state.ref_counts.get(name) {
            if count != 0 {
                return Err(FunctronError::ImageInUse {
                    name: name.to_string(),
                    count,
                });
            }
        }

        let tag = format_image_name(name);
        self.runtime
            .remove_image(&tag)
            .await?
            .into_result(format!("remove image {}", tag))?;
        state.ref_counts.remove(name);

        tracing::info!("deleted image {}", tag);
        Ok(())
    }

    /// The number of outstanding references on `name`.
    pub async fn reference_count(&self, name: &str) -> u64 {
        let state = self.state.lock().await;
        state.ref_counts.get(name).copied().unwrap_or(0)
    }

    /// Stages `dockerfile` in a fresh directory under the scratch directory.
    pub async fn prepare_build_context(&self, dockerfile: &str) -> FunctronResult<TempDir> {
        fs::create_dir_all(&self.scratch_dir).await?;
        let context = tempfile::Builder::new()
            .prefix(BUILD_DIR_PREFIX)
            .tempdir_in(&self.scratch_dir)?;

        fs::write(context.path().join(DOCKERFILE_NAME), dockerfile).await?;

        Ok(context)
    }

    /// Builds the staged `context_dir` as `functron-<name>`.
    pub async fn build_from_context(
        &self,
        name: &str,
        context_dir: &Path,
    ) -> FunctronResult<CommandOutput> {
        let tag = format_image_name(name);
        tracing::info!("building image {} from {}", tag, context_dir.display());
        self.runtime.build_image(&tag, context_dir).await
    }

    /// Stages `dockerfile` and builds it as `functron-<name>`.
    pub async fn build_image(&self, name: &str, dockerfile: &str) -> FunctronResult<CommandOutput> {
        let context = self.prepare_build_context(dockerfile).await?;
        self.build_from_context(name, context.path()).await
    }

    async fn is_listed(&self, name: &str) -> FunctronResult<bool> {
        let listing = self.runtime.list_images().await?;
        let found = listed_short_names(&listing).any(|short| short == name);
        Ok(found)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The runtime image name for the library image `short_name`.
pub fn format_image_name(short_name: &str) -> String {
    format!("{}{}", IMAGE_NAME_PREFIX, short_name)
}

/// Short names of the `functron-` repositories in a `repository\ttag` listing.
fn listed_short_names(listing: &str) -> impl Iterator<Item = &str> {
    listing.lines().filter_map(|line| {
        let repository = line.split('\t').next().unwrap_or_default().trim();
        repository.strip_prefix(IMAGE_NAME_PREFIX)
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::ShellRuntime;

    fn library_with(runtime: Arc<ShellRuntime>) -> (TempDir, ImageLibrary) {
        let scratch = TempDir::new().unwrap();
        let library = ImageLibrary::new(runtime, scratch.path());
        (scratch, library)
    }

    #[test]
    fn test_listed_short_names() {
        let listing = "functron-demo\tlatest\n  functron-other \t1.0\nalpine\t3.19\nfunctron\tlatest\n\n";
        let names: Vec<_> = listed_short_names(listing).collect();
        assert_eq!(names, ["demo", "other"]);
        assert_eq!(format_image_name("demo"), "functron-demo");
    }

    #[test_log::test(tokio::test)]
    async fn test_check_image_built() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo", "alpine:3.19"]));
        let (_scratch, library) = library_with(runtime);

        assert!(library.check_image_built("demo").await?);
        assert!(!library.check_image_built("alpine").await?);
        assert!(!library.check_image_built("dem").await?);
        assert_eq!(library.get_images().await?, ["demo"]);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_acquire_release_restores_count() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo"]));
        let (_scratch, library) = library_with(runtime);

        let first = library.acquire_image("demo").await?;
        let before = library.reference_count("demo").await;
        let second = library.acquire_image("demo").await?;
        assert!(second > first);
        assert_eq!(library.reference_count("demo").await, before + 1);

        library.release_image(second).await?;
        assert_eq!(library.reference_count("demo").await, before);

        library.release_image(first).await?;
        assert_eq!(library.reference_count("demo").await, 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_acquire_unbuilt_image_issues_no_handle() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::new());
        let (_scratch, library) = library_with(runtime.clone());

        assert!(matches!(
            library.acquire_image("missing").await,
            Err(FunctronError::ImageNotBuilt(name)) if name == "missing"
        ));
        assert_eq!(library.reference_count("missing").await, 0);

        // The failed attempt did not consume a handle
        runtime.add_image("functron-missing");
        let handle = library.acquire_image("missing").await?;
        assert_eq!(handle, ImageHandle::new(1));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_release_unknown_or_repeated_handle() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo"]));
        let (_scratch, library) = library_with(runtime);

        assert!(matches!(
            library.release_image(ImageHandle::new(99)).await,
            Err(FunctronError::InvalidHandle(_))
        ));

        let handle = library.acquire_image("demo").await?;
        library.release_image(handle).await?;
        assert!(matches!(
            library.release_image(handle).await,
            Err(FunctronError::InvalidHandle(h)) if h == handle
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_release_detects_underflow() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo"]));
        let (_scratch, library) = library_with(runtime);

        let handle = library.acquire_image("demo").await?;
        library.state.lock().await.ref_counts.insert("demo".to_string(), 0);

        assert!(matches!(
            library.release_image(handle).await,
            Err(FunctronError::RefCountUnderflow(name)) if name == "demo"
        ));
        assert_eq!(library.reference_count("demo").await, 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_waits_for_references() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo"]));
        let (_scratch, library) = library_with(runtime.clone());

        let handle = library.acquire_image("demo").await?;
        assert!(matches!(
            library.delete_image("demo").await,
            Err(FunctronError::ImageInUse { count: 1, .. })
        ));
        assert!(runtime.has_image("functron-demo"));

        library.release_image(handle).await?;
        library.delete_image("demo").await?;
        assert!(!runtime.has_image("functron-demo"));
        assert_eq!(runtime.removed_images(), ["functron-demo"]);

        assert!(matches!(
            library.delete_image("demo").await,
            Err(FunctronError::ImageNotBuilt(_))
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_reports_runtime_failure() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo"]));
        runtime.set_fail_removals(true);
        let (_scratch, library) = library_with(runtime.clone());

        assert!(matches!(
            library.delete_image("demo").await,
            Err(FunctronError::RuntimeCommand { .. })
        ));
        assert!(runtime.has_image("functron-demo"));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_build_image() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::new());
        let (_scratch, library) = library_with(runtime.clone());

        let output = library.build_image("fresh", "FROM alpine\n").await?;
        assert!(output.success);
        assert!(library.check_image_built("fresh").await?);

        let output = library.build_image("broken", "FROM alpine\nRUN FAIL\n").await?;
        assert!(!output.success);
        assert!(!library.check_image_built("broken").await?);

        // Build contexts do not outlive the build
        assert_eq!(std::fs::read_dir(library.get_scratch_dir())?.count(), 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_acquires_issue_distinct_handles() -> FunctronResult<()> {
        let runtime = Arc::new(ShellRuntime::with_images(["functron-demo"]));
        let (_scratch, library) = library_with(runtime);
        let library = Arc::new(library);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let library = library.clone();
                tokio::spawn(async move { library.acquire_image("demo").await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await??);
        }
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), 8);
        assert_eq!(library.reference_count("demo").await, 8);

        Ok(())
    }
}
