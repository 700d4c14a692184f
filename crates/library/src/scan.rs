use std::collections::HashSet;
use std::path::{Path, PathBuf};

use common::{path_string, FileSignature};
use tracing::{debug, info, warn};

use crate::{
    extract_song, FolderWalker, Library, LibraryError, UpsertOutcome, DEFAULT_EXTENSIONS,
};

#[derive(Clone, Debug)]
pub struct ScanOptions {
    pub extensions: Vec<String>,
    /// Delete stored songs under the root that the walk no longer finds.
    pub deletion_aware: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            deletion_aware: false,
        }
    }
}

/// Hooks a scan pass calls back into. Cancellation is polled between files.
pub trait ScanObserver: Send + Sync {
    fn on_started(&self, _total: usize) {}
    fn on_file_processed(&self, _processed: usize) {}
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub walked: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub deleted: usize,
    pub albums_recomputed: usize,
    pub cancelled: bool,
}

/// Runs one blocking scan pass of `root` against `library`.
///
/// The walk is materialized up front so progress has a total. Every file is
/// committed as soon as it is extracted, together with a durable dirty mark
/// on its album. Dirty albums are rebuilt once at the end, including after a
/// cancellation, and any marks left by an interrupted earlier pass are
/// rebuilt before walking. Deletions only happen when the walk ran to
/// completion.
pub fn run_scan(
    library: &Library,
    root: &Path,
    options: &ScanOptions,
    observer: &dyn ScanObserver,
) -> Result<ScanReport, LibraryError> {
    let root = root
        .canonicalize()
        .map_err(|err| LibraryError::FolderUnavailable {
            path: root.to_path_buf(),
            reason: err.to_string(),
        })?;

    let recovered = library.recompute_dirty_albums()?;
    if recovered > 0 {
        warn!("Rebuilt {} albums left stale by an interrupted scan", recovered);
    }

    let before: Vec<String> = if options.deletion_aware {
        library
            .list_song_paths()?
            .into_iter()
            .filter(|path| Path::new(path).starts_with(&root))
            .collect()
    } else {
        Vec::new()
    };

    let walker = FolderWalker::with_extensions(&root, &options.extensions);
    let files: Vec<PathBuf> = walker.walk()?.collect();
    info!("Scanning {:?}: {} candidate files", root, files.len());
    observer.on_started(files.len());

    let mut report = ScanReport {
        walked: files.len(),
        albums_recomputed: recovered,
        ..ScanReport::default()
    };
    let mut seen: HashSet<String> = HashSet::with_capacity(files.len());

    for (index, file) in files.iter().enumerate() {
        if observer.should_cancel() {
            report.cancelled = true;
            break;
        }
        let path = path_string(file);
        seen.insert(path.clone());

        if is_unchanged(library, file, &path)? {
            report.unchanged += 1;
        } else {
            match extract_song(file) {
                Ok(song) => {
                    match library.upsert_song(&song)? {
                        UpsertOutcome::Inserted { .. } => report.inserted += 1,
                        UpsertOutcome::Updated { .. } => report.updated += 1,
                        UpsertOutcome::Unchanged => report.unchanged += 1,
                    }
                }
                Err(err) => {
                    warn!("Skipping {}", err);
                    report.failed += 1;
                }
            }
        }
        observer.on_file_processed(index + 1);
    }

    if options.deletion_aware && !report.cancelled {
        for path in before.iter().filter(|path| !seen.contains(*path)) {
            if library.delete_song(path)?.is_some() {
                debug!("Removed missing song {}", path);
                report.deleted += 1;
            }
        }
    }

    report.albums_recomputed += library.recompute_dirty_albums()?;

    if !report.cancelled {
        library.mark_root_scanned(&root)?;
    }

    info!(
        "Scan of {:?} {}: {} files, {} new, {} updated, {} unchanged, {} failed, {} removed, {} albums refreshed",
        root,
        if report.cancelled { "cancelled" } else { "finished" },
        report.walked,
        report.inserted,
        report.updated,
        report.unchanged,
        report.failed,
        report.deleted,
        report.albums_recomputed
    );
    Ok(report)
}

fn is_unchanged(library: &Library, file: &Path, path: &str) -> Result<bool, LibraryError> {
    let stored = match library.song_signature(path)? {
        Some(stored) => stored,
        None => return Ok(false),
    };
    Ok(FileSignature::read(file)
        .map(|current| current == stored)
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::AlbumKey;
    use metadata::fixtures::FlacFixture;

    use super::*;
    use crate::test_support::{music_dir, open_temp};

    fn write_track(root: &Path, rel: &str, album: &str, artist: &str, seconds: u32) -> PathBuf {
        let path = root.join(rel);
        FlacFixture::with_seconds(seconds)
            .comment("TITLE", rel)
            .comment("ALBUM", album)
            .comment("ARTIST", artist)
            .write(&path)
            .unwrap();
        path
    }

    fn seed(root: &Path) {
        write_track(root, "X/01.flac", "X", "A", 30);
        write_track(root, "X/02.flac", "X", "A", 45);
        write_track(root, "Y/01.flac", "Y", "B", 12);
        fs::write(root.join("X/broken.flac"), b"not audio at all").unwrap();
    }

    fn album(library: &Library, title: &str, artist: &str) -> common::Album {
        library.get_album(&AlbumKey::new(title, artist).id()).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        total: AtomicUsize,
        processed: AtomicUsize,
        cancel_after: Option<usize>,
    }

    impl ScanObserver for Recorder {
        fn on_started(&self, total: usize) {
            self.total.store(total, Ordering::SeqCst);
        }

        fn on_file_processed(&self, processed: usize) {
            self.processed.store(processed, Ordering::SeqCst);
        }

        fn should_cancel(&self) -> bool {
            match self.cancel_after {
                Some(limit) => self.processed.load(Ordering::SeqCst) >= limit,
                None => false,
            }
        }
    }

    #[test]
    fn scan_builds_albums_and_skips_corrupt_files() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        seed(&root);

        let recorder = Recorder::default();
        let report = run_scan(&library, &root, &ScanOptions::default(), &recorder).unwrap();
        assert_eq!(report.walked, 4);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.failed, 1);
        assert!(!report.cancelled);
        assert_eq!(recorder.total.load(Ordering::SeqCst), 4);
        assert_eq!(recorder.processed.load(Ordering::SeqCst), 4);

        let stats = library.stats().unwrap();
        assert_eq!((stats.albums, stats.songs), (2, 3));
        let x = album(&library, "X", "A");
        assert_eq!(x.song_count, 2);
        assert!((x.total_duration - 75.0).abs() < 0.01);
        assert_eq!(album(&library, "Y", "B").song_count, 1);
        assert!(library.is_root_scanned(&root).unwrap());
    }

    #[test]
    fn rescanning_unchanged_folder_is_idempotent() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        seed(&root);

        run_scan(&library, &root, &ScanOptions::default(), &NoopObserver).unwrap();
        let first = library.list_albums(100, 0).unwrap();

        let options = ScanOptions {
            deletion_aware: true,
            ..ScanOptions::default()
        };
        let report = run_scan(&library, &root, &options, &NoopObserver).unwrap();
        assert_eq!(report.unchanged, 3);
        assert_eq!(report.inserted + report.updated + report.deleted, 0);
        assert_eq!(report.albums_recomputed, 0);
        assert_eq!(library.list_albums(100, 0).unwrap(), first);

        let paths = library.list_song_paths().unwrap();
        let unique: HashSet<&String> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
    }

    #[test]
    fn rescan_removes_deleted_files() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        seed(&root);
        run_scan(&library, &root, &ScanOptions::default(), &NoopObserver).unwrap();

        let options = ScanOptions {
            deletion_aware: true,
            ..ScanOptions::default()
        };
        fs::remove_file(root.join("X/02.flac")).unwrap();
        let report = run_scan(&library, &root, &options, &NoopObserver).unwrap();
        assert_eq!(report.deleted, 1);
        let x = album(&library, "X", "A");
        assert_eq!(x.song_count, 1);
        assert!((x.total_duration - 30.0).abs() < 0.01);

        fs::remove_dir_all(root.join("Y")).unwrap();
        run_scan(&library, &root, &options, &NoopObserver).unwrap();
        assert!(library.get_album(&AlbumKey::new("Y", "B").id()).is_err());
        assert_eq!(library.stats().unwrap().albums, 1);
    }

    #[test]
    fn deletions_stay_inside_the_scanned_root() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        seed(&root);
        let elsewhere = dir.path().join("elsewhere");
        write_track(&elsewhere, "Z/01.flac", "Z", "C", 5);

        run_scan(&library, &root, &ScanOptions::default(), &NoopObserver).unwrap();
        run_scan(&library, &elsewhere, &ScanOptions::default(), &NoopObserver).unwrap();
        let options = ScanOptions {
            deletion_aware: true,
            ..ScanOptions::default()
        };
        let report = run_scan(&library, &root, &options, &NoopObserver).unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(library.stats().unwrap().songs, 4);
    }

    #[test]
    fn cancellation_keeps_committed_work_and_skips_deletions() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        seed(&root);
        run_scan(&library, &root, &ScanOptions::default(), &NoopObserver).unwrap();
        fs::remove_file(root.join("Y/01.flac")).unwrap();
        write_track(&root, "W/01.flac", "W", "D", 3);

        let recorder = Recorder {
            cancel_after: Some(1),
            ..Recorder::default()
        };
        let options = ScanOptions {
            deletion_aware: true,
            ..ScanOptions::default()
        };
        let report = run_scan(&library, &root, &options, &recorder).unwrap();
        assert!(report.cancelled);
        assert_eq!(recorder.processed.load(Ordering::SeqCst), 1);
        assert_eq!(report.deleted, 0);
        // W/01.flac sorts first and was committed before the cancel
        assert_eq!(report.inserted, 1);
        assert_eq!(album(&library, "W", "D").song_count, 1);
        assert_eq!(album(&library, "Y", "B").song_count, 1);
    }

    struct DiesAfter(usize);

    impl ScanObserver for DiesAfter {
        fn on_file_processed(&self, processed: usize) {
            if processed >= self.0 {
                panic!("scanner died after {} files", processed);
            }
        }
    }

    #[test]
    fn interrupted_pass_is_repaired_by_the_next_scan() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        write_track(&root, "X/01.flac", "X", "A", 10);
        write_track(&root, "X/02.flac", "X", "A", 20);
        write_track(&root, "Y/01.flac", "Y", "B", 5);

        let died = panic::catch_unwind(AssertUnwindSafe(|| {
            run_scan(&library, &root, &ScanOptions::default(), &DiesAfter(2))
        }));
        assert!(died.is_err());
        assert_eq!(library.stats().unwrap().songs, 2);
        assert_eq!(library.stats().unwrap().albums, 0);
        assert_eq!(library.dirty_albums().unwrap(), vec![AlbumKey::new("X", "A")]);
        assert!(!library.is_root_scanned(&root).unwrap());

        let options = ScanOptions {
            deletion_aware: true,
            ..ScanOptions::default()
        };
        let report = run_scan(&library, &root, &options, &NoopObserver).unwrap();
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.albums_recomputed, 2);
        assert!(library.dirty_albums().unwrap().is_empty());

        let stats = library.stats().unwrap();
        assert_eq!((stats.albums, stats.songs), (2, 3));
        let x = album(&library, "X", "A");
        assert_eq!(x.song_count, 2);
        assert!((x.total_duration - 30.0).abs() < 0.01);
    }

    #[test]
    fn retagged_file_moves_to_new_album_and_old_album_is_dropped() {
        let (dir, library) = open_temp();
        let root = music_dir(&dir);
        write_track(&root, "X/01.flac", "X", "A", 10);
        write_track(&root, "X/02.flac", "X", "A", 20);
        run_scan(&library, &root, &ScanOptions::default(), &NoopObserver).unwrap();
        let old_id = AlbumKey::new("X", "A").id();
        assert_eq!(library.get_album(&old_id).unwrap().song_count, 2);

        // longer album names change the file size, so the signature moves
        write_track(&root, "X/01.flac", "Retagged", "A", 10);
        write_track(&root, "X/02.flac", "Retagged", "A", 20);
        let options = ScanOptions {
            deletion_aware: true,
            ..ScanOptions::default()
        };
        let report = run_scan(&library, &root, &options, &NoopObserver).unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.albums_recomputed, 2);

        assert!(matches!(
            library.get_album(&old_id),
            Err(LibraryError::NotFound(_))
        ));
        let moved = album(&library, "Retagged", "A");
        assert_eq!(moved.song_count, 2);
        assert!((moved.total_duration - 30.0).abs() < 0.01);
        assert_eq!(library.stats().unwrap().albums, 1);
    }

    #[test]
    fn missing_root_is_fatal_and_commits_nothing() {
        let (dir, library) = open_temp();
        let err = run_scan(
            &library,
            &dir.path().join("missing"),
            &ScanOptions::default(),
            &NoopObserver,
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::FolderUnavailable { .. }));
        assert_eq!(library.stats().unwrap().songs, 0);
        assert!(library.scanned_roots().unwrap().is_empty());
    }
}
