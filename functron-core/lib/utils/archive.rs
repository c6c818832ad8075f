//! Unpacking of untrusted tar archives.
//!
//! Build contexts arrive from callers as tar archives. Every entry name is resolved against the
//! extraction directory before anything is written, and an entry that would land outside it
//! aborts the whole extraction. Only directories and regular files are materialised; links and
//! device nodes are skipped.

use std::{
    fs::{self, DirBuilder, OpenOptions, Permissions},
    io::{self, Read},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use functron_utils::{resolve_within, FunctronUtilsError};
use tar::{Archive, EntryType};

use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Counts of what an extraction wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Directories created or found already present.
    pub directories: usize,

    /// Regular files written.
    pub files: usize,

    /// Entries of other types that were ignored.
    pub skipped: usize,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Unpacks the tar stream `reader` into `dir`, which must already exist.
///
/// Directories are created with their recorded mode plus `u+rwx`, files are created or truncated
/// with their recorded mode plus `u+rw`. Extraction stops at the first entry that resolves
/// outside `dir` ([`FunctronError::PathEscape`]) or cannot be written
/// ([`FunctronError::Unpack`]). Entries before it stay on disk.
///
/// ## Examples
///
/// ```
/// use functron_core::utils::unpack_into_directory;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut builder = tar::Builder::new(Vec::new());
/// let mut header = tar::Header::new_gnu();
/// header.set_size(5);
/// header.set_mode(0o644);
/// header.set_cksum();
/// builder.append_data(&mut header, "hello.txt", &b"hello"[..])?;
/// let archive = builder.into_inner()?;
///
/// let dir = tempfile::tempdir()?;
/// unpack_into_directory(&archive[..], dir.path())?;
/// assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt"))?, "hello");
/// # Ok(())
/// # }
/// ```
pub fn unpack_into_directory<R: Read>(reader: R, dir: &Path) -> FunctronResult<UnpackSummary> {
    // Symlinks in the root itself (e.g. /tmp on macOS) are resolved once up front
    let root = dir.canonicalize()?;
    let mut summary = UnpackSummary::default();
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        let target = resolve_within(&root, &entry_path).map_err(|e| match e {
            FunctronUtilsError::PathEscape { .. } => FunctronError::PathEscape {
                root: root.clone(),
                entry: entry_path.clone(),
            },
            other => other.into(),
        })?;

        let mode = entry.header().mode()? & 0o7777;
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Directory => {
                create_directory(&target, mode | 0o700)?;
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                ensure_parent_within(&root, &target, &entry_path)?;
                write_file(&target, mode | 0o600, &mut entry)?;
                summary.files += 1;
            }
            other => {
                tracing::trace!(
                    "skipping {:?} entry {}",
                    other,
                    entry_path.display()
                );
                summary.skipped += 1;
            }
        }
    }

    tracing::debug!(
        "unpacked {} file(s) and {} directory(ies) into {}, skipped {}",
        summary.files,
        summary.directories,
        root.display(),
        summary.skipped
    );

    Ok(summary)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn create_directory(path: &Path, mode: u32) -> FunctronResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|source| unpack_error(path, source))?;

    // An existing directory keeps its old mode otherwise
    fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|source| unpack_error(path, source))
}

/// Creates the parents of `target` and checks they did not resolve outside `root`.
fn ensure_parent_within(root: &Path, target: &Path, entry_path: &Path) -> FunctronResult<()> {
    let escape = || FunctronError::PathEscape {
        root: root.to_path_buf(),
        entry: entry_path.to_path_buf(),
    };

    let parent = target.parent().ok_or_else(escape)?;
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(parent)
        .map_err(|source| unpack_error(parent, source))?;

    if !parent.canonicalize()?.starts_with(root) {
        return Err(escape());
    }

    if fs::symlink_metadata(target).is_ok_and(|metadata| metadata.file_type().is_symlink()) {
        return Err(escape());
    }

    Ok(())
}

fn write_file(path: &Path, mode: u32, contents: &mut impl Read) -> FunctronResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|source| unpack_error(path, source))?;

    io::copy(contents, &mut file).map_err(|source| unpack_error(path, source))?;

    // The umask and pre-existing files both get in the way of the recorded mode
    file.set_permissions(Permissions::from_mode(mode))
        .map_err(|source| unpack_error(path, source))
}

fn unpack_error(path: &Path, source: io::Error) -> FunctronError {
    FunctronError::Unpack {
        path: PathBuf::from(path),
        source,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};
    use tempfile::TempDir;

    /// Appends an entry whose name is written straight into the header, bypassing the
    /// sanitising that `tar::Builder` applies to paths.
    fn append_raw(builder: &mut Builder<Vec<u8>>, name: &str, entry_type: EntryType, data: &[u8]) {
        let mut header = Header::new_gnu();
        let bytes = name.as_bytes();
        header.as_gnu_mut().unwrap().name[..bytes.len()].copy_from_slice(bytes);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(entry_type);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    fn append_file(builder: &mut Builder<Vec<u8>>, name: &str, mode: u32, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    fn append_dir(builder: &mut Builder<Vec<u8>>, name: &str, mode: u32) {
        let mut header = Header::new_gnu();
        header.set_size(0);
        header.set_mode(mode);
        header.set_entry_type(EntryType::Directory);
        header.set_cksum();
        builder.append_data(&mut header, name, io::empty()).unwrap();
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    /// A scratch area with the extraction root one level down, so escapes have somewhere to go.
    fn scratch() -> (TempDir, PathBuf) {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("ctx");
        fs::create_dir(&root).unwrap();
        (outer, root)
    }

    #[test_log::test]
    fn test_unpack_files_and_directories() -> FunctronResult<()> {
        let (_outer, root) = scratch();

        let mut builder = Builder::new(Vec::new());
        append_dir(&mut builder, "src", 0o500);
        append_file(&mut builder, "src/main.py", 0o400, b"print('hi')\n");
        append_file(&mut builder, "nested/deeper/data.bin", 0o755, &[0, 1, 2, 3]);
        let archive = builder.into_inner()?;

        let summary = unpack_into_directory(&archive[..], &root)?;
        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 1);

        assert_eq!(fs::read(root.join("src/main.py"))?, b"print('hi')\n");
        assert_eq!(fs::read(root.join("nested/deeper/data.bin"))?, [0, 1, 2, 3]);

        // Owners can always read and write what was unpacked
        assert_eq!(mode_of(&root.join("src")), 0o700);
        assert_eq!(mode_of(&root.join("src/main.py")), 0o600);
        assert_eq!(mode_of(&root.join("nested/deeper/data.bin")), 0o755);

        Ok(())
    }

    #[test_log::test]
    fn test_existing_files_are_truncated() -> FunctronResult<()> {
        let (_outer, root) = scratch();
        fs::write(root.join("Dockerfile"), "FROM a-much-longer-base-image:latest\n")?;

        let mut builder = Builder::new(Vec::new());
        append_dir(&mut builder, ".", 0o755);
        append_file(&mut builder, "Dockerfile", 0o644, b"FROM alpine\n");
        let archive = builder.into_inner()?;

        unpack_into_directory(&archive[..], &root)?;
        assert_eq!(fs::read_to_string(root.join("Dockerfile"))?, "FROM alpine\n");

        Ok(())
    }

    #[test_log::test]
    fn test_parent_traversal_is_rejected_before_writing() -> FunctronResult<()> {
        let (outer, root) = scratch();

        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "ok.txt", 0o644, b"fine");
        append_raw(&mut builder, "../evil.txt", EntryType::Regular, b"evil");
        append_file(&mut builder, "after.txt", 0o644, b"never");
        let archive = builder.into_inner()?;

        let result = unpack_into_directory(&archive[..], &root);
        assert!(matches!(result, Err(FunctronError::PathEscape { .. })));

        assert!(root.join("ok.txt").exists());
        assert!(!outer.path().join("evil.txt").exists());
        assert!(!root.join("after.txt").exists());

        Ok(())
    }

    #[test_log::test]
    fn test_nested_traversal_is_rejected() -> FunctronResult<()> {
        let (outer, root) = scratch();

        let mut builder = Builder::new(Vec::new());
        append_raw(&mut builder, "a/b/../../../evil", EntryType::Directory, b"");
        let archive = builder.into_inner()?;

        let result = unpack_into_directory(&archive[..], &root);
        assert!(matches!(result, Err(FunctronError::PathEscape { .. })));
        assert!(!outer.path().join("evil").exists());
        assert!(!root.join("a").exists());

        Ok(())
    }

    #[test_log::test]
    fn test_absolute_entries_are_rejected() -> FunctronResult<()> {
        let (outer, root) = scratch();
        let target = outer.path().join("absolute.txt");

        let mut builder = Builder::new(Vec::new());
        append_raw(
            &mut builder,
            &target.to_string_lossy(),
            EntryType::Regular,
            b"evil",
        );
        let archive = builder.into_inner()?;

        let result = unpack_into_directory(&archive[..], &root);
        assert!(matches!(result, Err(FunctronError::PathEscape { .. })));
        assert!(!target.exists());

        Ok(())
    }

    #[test_log::test]
    fn test_links_are_skipped() -> FunctronResult<()> {
        let (outer, root) = scratch();

        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o777);
        header.set_entry_type(EntryType::Symlink);
        header.set_cksum();
        builder.append_link(&mut header, "link", outer.path())?;
        append_file(&mut builder, "link/inside.txt", 0o644, b"contained");
        let archive = builder.into_inner()?;

        let summary = unpack_into_directory(&archive[..], &root)?;
        assert_eq!(summary.skipped, 1);

        // The link was never created, so the file lands in a real directory under the root
        assert!(!fs::symlink_metadata(root.join("link"))?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(root.join("link/inside.txt"))?, "contained");
        assert!(!outer.path().join("inside.txt").exists());

        Ok(())
    }

    #[test_log::test]
    fn test_empty_archive_is_a_no_op() -> FunctronResult<()> {
        let (_outer, root) = scratch();

        let summary = unpack_into_directory(io::empty(), &root)?;
        assert_eq!(summary, UnpackSummary::default());
        assert_eq!(fs::read_dir(&root)?.count(), 0);

        Ok(())
    }

    #[test_log::test]
    fn test_pre_existing_symlinked_directory_is_rejected() -> FunctronResult<()> {
        let (outer, root) = scratch();
        std::os::unix::fs::symlink(outer.path(), root.join("escape"))?;

        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "escape/planted.txt", 0o644, b"evil");
        let archive = builder.into_inner()?;

        let result = unpack_into_directory(&archive[..], &root);
        assert!(matches!(result, Err(FunctronError::PathEscape { .. })));
        assert!(!outer.path().join("planted.txt").exists());

        Ok(())
    }
}
