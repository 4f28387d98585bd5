//! Turns a fresh checksum observation plus a file's last known state into a status.

use crate::hasher::ChecksumAlgorithm;
use crate::storage::models::{FileStatus, PriorFile};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// What a worker just measured for one file.
#[derive(Debug, Clone, Copy)]
pub struct CurrentObservation<'a> {
    pub digest: &'a str,
    pub algorithm: ChecksumAlgorithm,
    pub size: i64,
    pub mtime: i64,
}

/// Classify one observation against the file's prior state.
///
/// Never returns [`FileStatus::Missing`]; that outcome comes from [`find_missing`].
pub fn classify(prior: Option<&PriorFile>, current: &CurrentObservation<'_>) -> FileStatus {
    let Some(prior) = prior else {
        return FileStatus::New;
    };
    let Some(latest) = prior.latest.as_ref() else {
        return FileStatus::New;
    };

    let metadata_same = prior.size == current.size && prior.mtime == current.mtime;

    // Digests of different algorithms are not comparable
    if latest.algorithm != current.algorithm {
        return if metadata_same {
            FileStatus::Unchanged
        } else {
            FileStatus::Modified
        };
    }

    if latest.digest == current.digest {
        FileStatus::Unchanged
    } else if metadata_same {
        FileStatus::Corrupted
    } else {
        FileStatus::Modified
    }
}

/// Known, not-yet-deleted files that this walk did not observe. Returns their file ids.
///
/// Files under `unreadable` directories are never reported: the walk could not look there.
/// Neither are files for which `still_present` holds, such as paths the walk was told to exclude.
pub fn find_missing<F>(
    prior: &HashMap<String, PriorFile>,
    observed: &HashSet<String>,
    unreadable: &[PathBuf],
    still_present: F,
) -> Vec<i64>
where
    F: Fn(&Path) -> bool,
{
    let mut missing: Vec<i64> = prior
        .values()
        .filter(|p| !p.is_deleted && !observed.contains(&p.path))
        .filter(|p| !unreadable.iter().any(|dir| Path::new(&p.path).starts_with(dir)))
        .filter(|p| !still_present(Path::new(&p.path)))
        .map(|p| p.file_id)
        .collect();
    missing.sort_unstable();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::LatestChecksum;

    fn prior(digest: &str, size: i64, mtime: i64) -> PriorFile {
        PriorFile {
            file_id: 1,
            path: "/data/a".to_string(),
            size,
            mtime,
            is_deleted: false,
            latest: Some(LatestChecksum {
                id: 10,
                digest: digest.to_string(),
                algorithm: ChecksumAlgorithm::Sha256,
            }),
        }
    }

    fn current(digest: &str, size: i64, mtime: i64) -> CurrentObservation<'_> {
        CurrentObservation {
            digest,
            algorithm: ChecksumAlgorithm::Sha256,
            size,
            mtime,
        }
    }

    #[test]
    fn test_no_history_is_new() {
        assert_eq!(classify(None, &current("aa", 1, 1)), FileStatus::New);
        let mut p = prior("aa", 1, 1);
        p.latest = None;
        assert_eq!(classify(Some(&p), &current("aa", 1, 1)), FileStatus::New);
    }

    #[test]
    fn test_same_digest_is_unchanged_even_if_touched() {
        let p = prior("aa", 1, 1);
        assert_eq!(classify(Some(&p), &current("aa", 1, 1)), FileStatus::Unchanged);
        assert_eq!(classify(Some(&p), &current("aa", 1, 99)), FileStatus::Unchanged);
    }

    #[test]
    fn test_digest_change_with_metadata_change_is_modified() {
        let p = prior("aa", 1, 1);
        assert_eq!(classify(Some(&p), &current("bb", 2, 1)), FileStatus::Modified);
        assert_eq!(classify(Some(&p), &current("bb", 1, 2)), FileStatus::Modified);
        assert_eq!(classify(Some(&p), &current("bb", 2, 2)), FileStatus::Modified);
    }

    #[test]
    fn test_digest_change_without_metadata_change_is_corrupted() {
        let p = prior("aa", 1, 1);
        assert_eq!(classify(Some(&p), &current("bb", 1, 1)), FileStatus::Corrupted);
    }

    #[test]
    fn test_algorithm_change_falls_back_to_metadata() {
        let p = prior("aa", 1, 1);
        let same = CurrentObservation {
            digest: "ffff",
            algorithm: ChecksumAlgorithm::Blake3,
            size: 1,
            mtime: 1,
        };
        assert_eq!(classify(Some(&p), &same), FileStatus::Unchanged);
        let touched = CurrentObservation { mtime: 5, ..same };
        assert_eq!(classify(Some(&p), &touched), FileStatus::Modified);
    }

    #[test]
    fn test_find_missing_skips_observed_and_already_deleted() {
        let mut known = HashMap::new();
        for (id, path, deleted) in [(1, "/d/a", false), (2, "/d/b", false), (3, "/d/c", true)] {
            known.insert(
                path.to_string(),
                PriorFile {
                    file_id: id,
                    path: path.to_string(),
                    size: 0,
                    mtime: 0,
                    is_deleted: deleted,
                    latest: None,
                },
            );
        }
        let observed: HashSet<String> = ["/d/a".to_string()].into_iter().collect();
        assert_eq!(find_missing(&known, &observed, &[], |_| false), vec![2]);
        assert!(find_missing(&known, &observed, &[PathBuf::from("/d")], |_| false).is_empty());
    }

    #[test]
    fn test_find_missing_keeps_files_still_on_disk() {
        let mut known = HashMap::new();
        for (id, path) in [(1, "/d/excluded/a"), (2, "/d/gone")] {
            known.insert(
                path.to_string(),
                PriorFile {
                    file_id: id,
                    path: path.to_string(),
                    size: 0,
                    mtime: 0,
                    is_deleted: false,
                    latest: None,
                },
            );
        }
        let present = |p: &Path| p.starts_with("/d/excluded");
        assert_eq!(find_missing(&known, &HashSet::new(), &[], present), vec![2]);
    }
}
