use crate::engine::CancelToken;
use glob::Pattern;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{error, trace};
use walkdir::{DirEntry, WalkDir};

/// A regular file found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    /// Nanoseconds since the Unix epoch.
    pub mtime: i64,
}

#[derive(Debug)]
pub enum WalkEntry {
    File(FileDescriptor),
    /// Symlinks and special files. Not errors.
    Skipped { path: PathBuf, reason: &'static str },
    /// A directory or entry that could not be read. The walk continues with siblings.
    Error { path: PathBuf, error: io::Error },
}

/// Lazily enumerates files under a root.
///
/// Directories whose name is in `exclude_dirs` are pruned, not descended.
/// Symlinks are never followed. Each call to [`FileWalker::walk`] starts a fresh traversal.
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
    exclude_dirs: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_dirs: HashSet::new(),
            exclude_patterns: Vec::new(),
        }
    }

    pub fn with_excluded_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_dirs.extend(names.into_iter().map(Into::into));
        self
    }

    /// Glob patterns tested against each file name and full path. Invalid globs are logged and dropped.
    pub fn with_excluded_patterns<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for glob in globs {
            match Pattern::new(glob.as_ref()) {
                Ok(p) => self.exclude_patterns.push(p),
                Err(e) => error!("Invalid glob pattern '{}': {}", glob.as_ref(), e),
            }
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn walk(&self) -> impl Iterator<Item = WalkEntry> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_pruned(entry))
            .filter_map(move |result| self.to_walk_entry(result))
    }

    /// Walks the tree once to count files, checking `cancel` between entries.
    /// Returns `None` if cancelled.
    pub fn count(&self, cancel: &CancelToken) -> Option<u64> {
        let mut total = 0u64;
        for entry in self.walk() {
            if cancel.is_cancelled() {
                return None;
            }
            if matches!(entry, WalkEntry::File(_)) {
                total += 1;
            }
        }
        Some(total)
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.exclude_dirs.contains(name))
    }

    fn is_excluded_file(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.exclude_patterns
            .iter()
            .any(|p| p.matches(name) || p.matches_path(path))
    }

    fn to_walk_entry(&self, result: walkdir::Result<DirEntry>) -> Option<WalkEntry> {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.root.clone());
                let error = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                error!("Error walking {}: {}", path.display(), error);
                return Some(WalkEntry::Error { path, error });
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }
        if file_type.is_symlink() {
            trace!("Skipping symlink {}", entry.path().display());
            return Some(WalkEntry::Skipped {
                path: entry.into_path(),
                reason: "symlink",
            });
        }
        if !file_type.is_file() {
            return Some(WalkEntry::Skipped {
                path: entry.into_path(),
                reason: "not a regular file",
            });
        }
        if self.is_excluded_file(entry.path()) {
            return None;
        }

        match entry.metadata() {
            Ok(metadata) => Some(WalkEntry::File(FileDescriptor {
                size: metadata.len(),
                mtime: mtime_nanos(&metadata),
                path: entry.into_path(),
            })),
            Err(err) => {
                let path = entry.into_path();
                let error = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "metadata unavailable"));
                error!("Error getting metadata for {}: {}", path.display(), error);
                Some(WalkEntry::Error { path, error })
            }
        }
    }
}

/// Modification time as nanoseconds since the epoch; pre-epoch times are negative.
pub fn mtime_nanos(metadata: &std::fs::Metadata) -> i64 {
    match metadata.modified() {
        Ok(modified) => match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        },
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn files(walker: &FileWalker) -> Vec<String> {
        let mut names: Vec<String> = walker
            .walk()
            .filter_map(|e| match e {
                WalkEntry::File(f) => Some(
                    f.path
                        .strip_prefix(walker.root())
                        .unwrap()
                        .to_string_lossy()
                        .into_owned(),
                ),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    fn make_tree(root: &Path) {
        fs::create_dir_all(root.join("docs/.git/objects")).unwrap();
        fs::create_dir_all(root.join("photos")).unwrap();
        fs::write(root.join("top.txt"), "top").unwrap();
        fs::write(root.join("docs/a.txt"), "a").unwrap();
        fs::write(root.join("docs/.git/objects/blob"), "blob").unwrap();
        fs::write(root.join("photos/img.jpg"), "jpg").unwrap();
        fs::write(root.join("photos/img.jpg.tmp"), "tmp").unwrap();
    }

    #[test]
    fn test_walk_finds_all_files() {
        let tmp = tempfile::tempdir().unwrap();
        make_tree(tmp.path());
        let walker = FileWalker::new(tmp.path());
        assert_eq!(files(&walker).len(), 5);
    }

    #[test]
    fn test_excluded_dir_names_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        make_tree(tmp.path());
        let walker = FileWalker::new(tmp.path())
            .with_excluded_dirs([".git"])
            .with_excluded_patterns(["*.tmp"]);
        assert_eq!(files(&walker), vec!["docs/a.txt", "photos/img.jpg", "top.txt"]);
    }

    #[test]
    fn test_root_itself_is_never_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("photos");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("x.png"), "x").unwrap();
        let walker = FileWalker::new(&root).with_excluded_dirs(["photos"]);
        assert_eq!(files(&walker), vec!["x.png"]);
    }

    #[test]
    fn test_descriptor_carries_size_and_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("f.bin"), vec![0u8; 123]).unwrap();
        let walker = FileWalker::new(tmp.path());
        let entry = walker
            .walk()
            .find_map(|e| match e {
                WalkEntry::File(f) => Some(f),
                _ => None,
            })
            .unwrap();
        assert_eq!(entry.size, 123);
        assert!(entry.mtime > 0);
    }

    #[test]
    fn test_count_respects_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        make_tree(tmp.path());
        let walker = FileWalker::new(tmp.path());
        assert_eq!(walker.count(&CancelToken::new()), Some(5));

        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(walker.count(&cancel), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        fs::write(tmp.path().join("real.txt"), "r").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link_dir")).unwrap();
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("loop")).unwrap();

        let walker = FileWalker::new(tmp.path());
        let entries: Vec<WalkEntry> = walker.walk().collect();
        let skipped = entries
            .iter()
            .filter(|e| matches!(e, WalkEntry::Skipped { reason: "symlink", .. }))
            .count();
        assert_eq!(skipped, 2);
        assert!(!entries.iter().any(|e| matches!(e, WalkEntry::Error { .. })));
        assert_eq!(files(&walker), vec!["real.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_reported_and_walk_continues() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let locked = tmp.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden.txt"), "h").unwrap();
        fs::write(tmp.path().join("visible.txt"), "v").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        if fs::read_dir(&locked).is_ok() {
            // Running as root; permissions are not enforced
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let walker = FileWalker::new(tmp.path());
        let entries: Vec<WalkEntry> = walker.walk().collect();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(entries.iter().any(|e| matches!(e, WalkEntry::Error { .. })));
        assert!(entries.iter().any(
            |e| matches!(e, WalkEntry::File(f) if f.path.ends_with("visible.txt"))
        ));
    }
}
