//! Reconciliation of a declared file set against a local directory.
//!
//! [`reconcile`] compares a [`FileManifest`] with the tree under a base
//! directory and produces a [`ReconciliationPlan`]: the files that must be
//! (re)downloaded, and the orphans that were removed. Building the plan
//! touches the local disk (stat, hash, mkdir, delete) but never the network.
//!
//! After the plan's downloads complete, the regular files under the base
//! directory are exactly the non-directory entries of the manifest, each
//! with its declared content hash.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::BootstrapError;
use crate::hash::{self, HashAlgorithm};
use crate::manifest::{FileDescriptor, FileKind, FileManifest};

/// Whether files not declared by the manifest are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// The manifest declares the complete tree; delete anything else.
    Prune,
    /// Leave undeclared files alone.
    Keep,
}

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub source_url: String,
    /// Absolute destination path
    pub destination: PathBuf,
    pub expected_hash: String,
    pub algorithm: HashAlgorithm,
    /// Declared size, used for progress only
    pub expected_size: u64,
    pub executable: bool,
}

impl DownloadTask {
    fn from_descriptor(descriptor: &FileDescriptor, destination: PathBuf) -> Self {
        Self {
            source_url: descriptor.url.clone(),
            destination,
            expected_hash: descriptor.hash.clone(),
            algorithm: descriptor.algorithm,
            expected_size: descriptor.size,
            executable: descriptor.executable,
        }
    }
}

/// Work needed to converge a directory on its manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub downloads: Vec<DownloadTask>,
    /// Absolute paths found undeclared and deleted while planning
    pub orphans: BTreeSet<PathBuf>,
}

impl ReconciliationPlan {
    /// True when the directory is already converged.
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty() && self.orphans.is_empty()
    }

    /// Sum of the declared sizes of all downloads.
    pub fn total_bytes(&self) -> u64 {
        self.downloads.iter().map(|t| t.expected_size).sum()
    }

    /// Append another plan, e.g. the application plan to the runtime plan.
    pub fn merge(&mut self, other: ReconciliationPlan) {
        self.downloads.extend(other.downloads);
        self.orphans.extend(other.orphans);
    }
}

/// Compute the download plan for `manifest` under `base`.
///
/// Directories are created, executable bits on up-to-date files are
/// reapplied, and (with [`OrphanPolicy::Prune`]) undeclared files are
/// deleted immediately. Downloads are only planned, never executed.
///
/// An entry whose kind changed between manifest versions (a directory
/// that is now a file, or the reverse) is removed under either policy
/// and recorded as an orphan, since nothing can be written over it.
///
/// # Errors
///
/// Any local filesystem failure other than a missing file aborts the
/// reconciliation.
pub fn reconcile(
    manifest: &FileManifest,
    base: &Path,
    policy: OrphanPolicy,
) -> Result<ReconciliationPlan, BootstrapError> {
    let mut plan = ReconciliationPlan::default();

    for descriptor in manifest.iter() {
        let path = base.join(&descriptor.relative_path);

        match descriptor.kind {
            FileKind::Directory => {
                clear_parents(base, &path, &mut plan.orphans)?;
                clear_kind_conflict(&path, true, &mut plan.orphans)?;
                fs::create_dir_all(&path)?;
            }
            FileKind::File | FileKind::Classpath => {
                clear_parents(base, &path, &mut plan.orphans)?;
                let replaced = clear_kind_conflict(&path, false, &mut plan.orphans)?;
                if !replaced
                    && hash::file_matches(&path, descriptor.algorithm, &descriptor.hash)?
                {
                    if descriptor.executable {
                        set_executable(&path)?;
                    }
                } else {
                    debug!(
                        path = %path.display(),
                        url = %descriptor.url,
                        "Scheduling download"
                    );
                    plan.downloads
                        .push(DownloadTask::from_descriptor(descriptor, path));
                }
            }
            FileKind::Link | FileKind::Other => {}
        }
    }

    if policy == OrphanPolicy::Prune {
        let declared = manifest.declared_paths(base);
        plan.orphans.extend(remove_orphans(base, &declared)?);
    }

    info!(
        base = %base.display(),
        declared = manifest.len(),
        downloads = plan.downloads.len(),
        orphans = plan.orphans.len(),
        "Reconciled directory"
    );

    Ok(plan)
}

/// Delete every non-directory entry under `base` that is not declared.
fn remove_orphans(
    base: &Path,
    declared: &HashSet<PathBuf>,
) -> Result<BTreeSet<PathBuf>, BootstrapError> {
    let mut orphans = BTreeSet::new();
    let mut pending = vec![base.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            // file_type does not follow symlinks, so a link to a directory
            // is judged as a link, not descended into.
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            if declared.contains(&path) {
                continue;
            }

            warn!(path = %path.display(), "Removing undeclared file");
            remove_path(&path)?;
            orphans.insert(path);
        }
    }

    Ok(orphans)
}

/// Remove `path` if it exists as the wrong kind of entry.
///
/// A symlink counts as whatever it resolves to. Returns true when
/// something was removed.
fn clear_kind_conflict(
    path: &Path,
    want_dir: bool,
    orphans: &mut BTreeSet<PathBuf>,
) -> Result<bool, BootstrapError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let is_dir = if meta.file_type().is_symlink() {
        path.is_dir()
    } else {
        meta.is_dir()
    };
    if is_dir == want_dir {
        return Ok(false);
    }

    warn!(
        path = %path.display(),
        expected = if want_dir { "directory" } else { "file" },
        "Replacing entry of the wrong kind"
    );
    remove_path(path)?;
    orphans.insert(path.to_path_buf());
    Ok(true)
}

/// Clear files sitting where `path` needs a parent directory.
fn clear_parents(
    base: &Path,
    path: &Path,
    orphans: &mut BTreeSet<PathBuf>,
) -> Result<(), BootstrapError> {
    let mut parents: Vec<&Path> = path
        .ancestors()
        .skip(1)
        .take_while(|parent| *parent != base && parent.starts_with(base))
        .collect();
    // Outermost first; whatever sat below a removed file is gone with it
    parents.reverse();
    for parent in parents {
        clear_kind_conflict(parent, true, orphans)?;
    }
    Ok(())
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Add execute permission for everyone who can read the file.
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<(), BootstrapError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    let wanted = mode | ((mode & 0o444) >> 2);
    if wanted != mode {
        permissions.set_mode(wanted);
        fs::set_permissions(path, permissions)?;
        debug!(path = %path.display(), mode = %format!("{wanted:o}"), "Set executable bit");
    }
    Ok(())
}

/// Executable bits do not exist on this platform.
#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<(), BootstrapError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sha256(data: &[u8]) -> String {
        HashAlgorithm::Sha256.digest(data)
    }

    fn descriptor(path: &str, kind: FileKind, content: &[u8]) -> FileDescriptor {
        FileDescriptor {
            relative_path: path.to_string(),
            kind,
            hash: if kind == FileKind::Directory {
                String::new()
            } else {
                sha256(content)
            },
            algorithm: HashAlgorithm::Sha256,
            size: content.len() as u64,
            url: if kind == FileKind::Directory {
                String::new()
            } else {
                format!("https://cdn.example.com/{path}")
            },
            executable: false,
        }
    }

    fn manifest(descriptors: Vec<FileDescriptor>) -> FileManifest {
        FileManifest::from_descriptors(descriptors).unwrap()
    }

    #[test]
    fn test_missing_files_are_scheduled() {
        let dir = TempDir::new().unwrap();
        let m = manifest(vec![
            descriptor("lib", FileKind::Directory, b""),
            descriptor("lib/app.jar", FileKind::Classpath, b"jar"),
            descriptor("readme.txt", FileKind::File, b"hello"),
        ]);

        let plan = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();

        assert!(dir.path().join("lib").is_dir());
        assert_eq!(plan.downloads.len(), 2);
        assert!(plan.orphans.is_empty());
        assert_eq!(plan.total_bytes(), 8);
    }

    #[test]
    fn test_wrong_hash_schedules_exactly_one_task() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"good").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"stale").unwrap();

        let m = manifest(vec![
            descriptor("a.txt", FileKind::File, b"good"),
            descriptor("b.txt", FileKind::File, b"fresh"),
        ]);
        let plan = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();

        assert_eq!(plan.downloads.len(), 1);
        let task = &plan.downloads[0];
        assert_eq!(task.destination, dir.path().join("b.txt"));
        assert_eq!(task.expected_hash, sha256(b"fresh"));
        assert_eq!(task.expected_size, 5);
        assert_eq!(task.source_url, "https://cdn.example.com/b.txt");
    }

    #[test]
    fn test_sha1_manifest_is_compared_with_sha1() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("java"), b"hello world").unwrap();

        let mut d = descriptor("java", FileKind::File, b"hello world");
        d.algorithm = HashAlgorithm::Sha1;
        d.hash = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed".to_string();

        let plan = reconcile(&manifest(vec![d]), dir.path(), OrphanPolicy::Prune).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_second_run_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"one").unwrap();
        std::fs::write(dir.path().join("b").join("c.txt"), b"two").unwrap();
        std::fs::write(dir.path().join("stray.log"), b"x").unwrap();

        let m = manifest(vec![
            descriptor("a.txt", FileKind::File, b"one"),
            descriptor("b", FileKind::Directory, b""),
            descriptor("b/c.txt", FileKind::File, b"two"),
        ]);

        let first = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();
        assert!(first.downloads.is_empty());
        assert_eq!(first.orphans.len(), 1);

        let second = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_orphans_are_deleted() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("old").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("gone.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"keep").unwrap();
        std::fs::write(dir.path().join("keep.txt.part"), b"ke").unwrap();

        let m = manifest(vec![descriptor("keep.txt", FileKind::File, b"keep")]);
        let plan = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();

        assert!(plan.orphans.contains(&nested.join("gone.bin")));
        assert!(plan.orphans.contains(&dir.path().join("keep.txt.part")));
        assert!(!nested.join("gone.bin").exists());
        assert!(!dir.path().join("keep.txt.part").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_keep_policy_leaves_undeclared_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("user-settings.ini"), b"x").unwrap();

        let m = manifest(vec![descriptor("app.jar", FileKind::Classpath, b"jar")]);
        let plan = reconcile(&m, dir.path(), OrphanPolicy::Keep).unwrap();

        assert!(plan.orphans.is_empty());
        assert_eq!(plan.downloads.len(), 1);
        assert!(dir.path().join("user-settings.ini").exists());
    }

    #[test]
    fn test_missing_base_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("runtime").join("linux");

        let m = manifest(vec![descriptor("bin/java", FileKind::File, b"elf")]);
        let plan = reconcile(&m, &base, OrphanPolicy::Prune).unwrap();

        assert_eq!(plan.downloads.len(), 1);
        assert!(plan.orphans.is_empty());
    }

    #[test]
    fn test_declared_link_is_not_orphaned() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("legal"), b"notice").unwrap();

        let mut link = descriptor("legal", FileKind::Link, b"");
        link.hash.clear();
        link.url.clear();
        let plan = reconcile(&manifest(vec![link]), dir.path(), OrphanPolicy::Prune).unwrap();

        assert!(plan.is_empty());
        assert!(dir.path().join("legal").exists());
    }

    #[test]
    fn test_merge_plans() {
        let dir = TempDir::new().unwrap();
        let mut a = reconcile(
            &manifest(vec![descriptor("x", FileKind::File, b"1")]),
            &dir.path().join("a"),
            OrphanPolicy::Prune,
        )
        .unwrap();
        let b = reconcile(
            &manifest(vec![descriptor("y", FileKind::File, b"22")]),
            &dir.path().join("b"),
            OrphanPolicy::Prune,
        )
        .unwrap();

        a.merge(b);
        assert_eq!(a.downloads.len(), 2);
        assert_eq!(a.total_bytes(), 3);
    }

    #[test]
    fn test_directory_replaced_by_file() {
        let dir = TempDir::new().unwrap();
        let natives = dir.path().join("lib").join("natives");
        std::fs::create_dir_all(&natives).unwrap();
        std::fs::write(natives.join("old.so"), b"elf").unwrap();

        let m = manifest(vec![
            descriptor("lib", FileKind::Directory, b""),
            descriptor("lib/natives", FileKind::File, b"bundle"),
        ]);
        let plan = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();

        assert_eq!(plan.downloads.len(), 1);
        assert_eq!(plan.downloads[0].destination, natives);
        assert_eq!(plan.orphans, BTreeSet::from([natives.clone()]));
        assert!(!natives.exists());
        assert!(dir.path().join("lib").is_dir());
    }

    #[test]
    fn test_file_replaced_by_directory() {
        let dir = TempDir::new().unwrap();
        let b = dir.path().join("b");
        std::fs::write(&b, b"was a file").unwrap();

        let m = manifest(vec![
            descriptor("b", FileKind::Directory, b""),
            descriptor("b/c.txt", FileKind::File, b"two"),
        ]);
        // Kind conflicts are cleared even when undeclared files are kept
        let plan = reconcile(&m, dir.path(), OrphanPolicy::Keep).unwrap();

        assert!(b.is_dir());
        assert_eq!(plan.orphans, BTreeSet::from([b.clone()]));
        assert_eq!(plan.downloads.len(), 1);
        assert_eq!(plan.downloads[0].destination, b.join("c.txt"));

        std::fs::write(b.join("c.txt"), b"two").unwrap();
        assert!(reconcile(&m, dir.path(), OrphanPolicy::Keep).unwrap().is_empty());
    }

    #[test]
    fn test_file_where_parent_directory_is_needed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bin"), b"old launcher").unwrap();

        let m = manifest(vec![descriptor("bin/java", FileKind::File, b"elf")]);
        let plan = reconcile(&m, dir.path(), OrphanPolicy::Prune).unwrap();

        assert_eq!(plan.orphans, BTreeSet::from([dir.path().join("bin")]));
        assert_eq!(plan.downloads.len(), 1);
        assert!(!dir.path().join("bin").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_matching_executable_gets_permission_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("java");
        std::fs::write(&path, b"elf").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut d = descriptor("java", FileKind::File, b"elf");
        d.executable = true;
        let plan = reconcile(&manifest(vec![d]), dir.path(), OrphanPolicy::Prune).unwrap();

        assert!(plan.downloads.is_empty());
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
