use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Config;
use crate::data::{self, migrations};
use crate::error::IndexError;
use crate::models::event::IndexEvent;
use crate::models::search::SearchResponse;
use crate::models::status::StatusRecord;
use crate::services::reconcile_service;
use crate::services::search_service::{self, SearchCache};
use crate::services::status_service::StatusReporter;
use crate::services::watcher_service::{self, WatcherHandle};
use crate::services::writer_service::{self, DrainBarrier};

/// Bound on waiting for the writer thread at shutdown.
pub const WRITER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The catalog pipeline: one writer thread owning the store's only write
/// handle, an optional filesystem watcher feeding it, and read-only search
/// on top. All mutation goes through the event queue; nothing else ever
/// touches the store with a write handle.
pub struct Catalog {
    config: Config,
    db_path: PathBuf,
    queue: Sender<IndexEvent>,
    writer: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    barrier: Arc<DrainBarrier>,
    write_gen: Arc<AtomicU64>,
    watcher: Mutex<Option<WatcherHandle>>,
    status: StatusReporter,
    cache: SearchCache,
}

impl Catalog {
    /// Bootstrap the store (fatal on failure) and spawn the writer. The
    /// watcher is not started until `start_monitoring`.
    pub fn open(config: Config) -> Result<Self, IndexError> {
        fs::create_dir_all(&config.data_dir)?;
        let db_path = config.db_path();
        let conn = data::open_writable(&db_path)?;
        migrations::run_migrations(&conn)?;
        drop(conn);

        let (queue, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(DrainBarrier::new());
        let write_gen = Arc::new(AtomicU64::new(0));

        let writer = {
            let db_path = db_path.clone();
            let music_root = config.music_root.clone();
            let (stop, barrier, write_gen) = (stop.clone(), barrier.clone(), write_gen.clone());
            std::thread::Builder::new()
                .name("tunedex-writer".to_string())
                .spawn(move || {
                    writer_service::run_writer(db_path, music_root, receiver, stop, barrier, write_gen)
                })?
        };

        info!(
            root = %config.music_root.display(),
            store = %db_path.display(),
            "catalog opened"
        );
        Ok(Self {
            status: StatusReporter::new(config.status_path()),
            config,
            db_path,
            queue,
            writer: Some(writer),
            stop,
            barrier,
            write_gen,
            watcher: Mutex::new(None),
            cache: SearchCache::new(),
        })
    }

    /// Begin feeding filesystem changes into the index. Idempotent.
    pub fn start_monitoring(&self) -> Result<(), IndexError> {
        let mut guard = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(watcher_service::start_watching(
            &self.config.music_root,
            self.queue.clone(),
        )?);
        info!(root = %self.config.music_root.display(), "monitoring started");
        Ok(())
    }

    /// Stop the watcher and the writer. The writer commits applied work
    /// before exiting; events still on the queue are dropped. Both joins
    /// are bounded so shutdown never hangs the process.
    pub fn stop(&mut self) {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            watcher_service::stop_watching(handle);
        }

        self.stop.store(true, Ordering::Relaxed);
        if let Some(writer) = self.writer.take() {
            let deadline = Instant::now() + WRITER_STOP_TIMEOUT;
            while !writer.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(25));
            }
            if writer.is_finished() {
                let _ = writer.join();
            } else {
                warn!(
                    "writer did not stop within {:?}, abandoning shutdown wait",
                    WRITER_STOP_TIMEOUT
                );
            }
        }
    }

    /// Full wipe-and-repopulate of the index. Blocks until the writer has
    /// drained past the completion marker.
    pub fn rebuild(&self) -> Result<(), IndexError> {
        reconcile_service::rebuild(
            &self.config.music_root,
            &self.queue,
            &self.barrier,
            &self.status,
        )
    }

    /// Incremental reconciliation of the set-difference between disk and
    /// store. Blocks until drained.
    pub fn resync(&self) -> Result<(), IndexError> {
        reconcile_service::resync(
            &self.config.music_root,
            &self.db_path,
            &self.queue,
            &self.barrier,
            &self.status,
        )
    }

    /// Grouped, term-annotated search over the index.
    pub fn search(&self, query: &str, limit: usize) -> Result<SearchResponse, IndexError> {
        let key = SearchCache::key(query, limit);
        let write_gen = self.write_gen.load(Ordering::Acquire);
        if let Some(hit) = self.cache.lookup(&key, write_gen) {
            return Ok(hit);
        }
        let response = search_service::search(&self.db_path, query, limit)?;
        self.cache.store(key, &response, write_gen);
        Ok(response)
    }

    /// Progress of an in-flight rebuild/resync; `None` means idle.
    pub fn get_status(&self) -> Option<StatusRecord> {
        self.status.read()
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository;
    use crate::models::status::Phase;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let music_root = dir.path().join("music");
        fs::create_dir_all(&music_root).unwrap();
        let config = Config::with_data_dir(&music_root, dir.path().join("data"));
        let catalog = Catalog::open(config).unwrap();
        (dir, catalog)
    }

    fn add_file(dir: &tempfile::TempDir, rel: &str) {
        let path = dir.path().join("music").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"not a real audio file").unwrap();
    }

    fn remove_file(dir: &tempfile::TempDir, rel: &str) {
        fs::remove_file(dir.path().join("music").join(rel)).unwrap();
    }

    fn stored_count(dir: &tempfile::TempDir) -> i64 {
        let conn = rusqlite::Connection::open(dir.path().join("data/catalog.db")).unwrap();
        repository::count_tracks(&conn).unwrap()
    }

    #[test]
    fn rebuild_indexes_every_supported_file() {
        let (dir, catalog) = setup();
        add_file(&dir, "A/First/one.mp3");
        add_file(&dir, "A/First/two.flac");
        add_file(&dir, "B/Second/three.ogg");
        add_file(&dir, "B/Second/notes.txt");

        catalog.rebuild().unwrap();

        assert_eq!(stored_count(&dir), 3);
        assert!(catalog.get_status().is_none(), "status must clear after rebuild");
    }

    #[test]
    fn rebuild_replaces_removed_store_content() {
        let (dir, catalog) = setup();
        add_file(&dir, "A/Album/one.mp3");
        catalog.rebuild().unwrap();
        assert_eq!(stored_count(&dir), 1);

        remove_file(&dir, "A/Album/one.mp3");
        add_file(&dir, "A/Album/two.mp3");
        catalog.rebuild().unwrap();

        assert_eq!(stored_count(&dir), 1);
        let conn = rusqlite::Connection::open(dir.path().join("data/catalog.db")).unwrap();
        assert!(repository::get_by_path(&conn, "A/Album/two.mp3").unwrap().is_some());
        assert!(repository::get_by_path(&conn, "A/Album/one.mp3").unwrap().is_none());
    }

    #[test]
    fn resync_applies_exactly_the_delta() {
        let (dir, catalog) = setup();
        for i in 0..5 {
            add_file(&dir, &format!("A/Album/track{i}.mp3"));
        }
        catalog.rebuild().unwrap();
        assert_eq!(stored_count(&dir), 5);

        // k = 2 added, m = 1 removed: count must move by exactly k - m.
        add_file(&dir, "B/New/six.mp3");
        add_file(&dir, "B/New/seven.mp3");
        remove_file(&dir, "A/Album/track0.mp3");
        catalog.resync().unwrap();

        assert_eq!(stored_count(&dir), 6);
        assert!(catalog.get_status().is_none());
    }

    #[test]
    fn resync_on_unchanged_tree_changes_nothing() {
        let (dir, catalog) = setup();
        add_file(&dir, "A/Album/one.mp3");
        catalog.rebuild().unwrap();

        catalog.resync().unwrap();
        assert_eq!(stored_count(&dir), 1);
    }

    #[test]
    fn search_finds_rebuilt_tracks_by_filename_stem() {
        let (dir, catalog) = setup();
        // Untagged files index with title = filename stem, artist Unknown.
        add_file(&dir, "Beatles/Abbey Road/Come Together.mp3");
        catalog.rebuild().unwrap();

        let result = catalog.search("come together", 50).unwrap();
        assert_eq!(result.artists.len(), 1);
        assert_eq!(result.artists[0].name, "Unknown");
        assert_eq!(result.artists[0].albums.len(), 1);
        assert_eq!(
            result.artists[0].albums[0].release_dir,
            "Beatles/Abbey Road"
        );
        assert_eq!(result.artists[0].albums[0].track_count, 1);
        assert_eq!(result.terms, vec!["come", "together"]);

        remove_file(&dir, "Beatles/Abbey Road/Come Together.mp3");
        catalog.resync().unwrap();
        let result = catalog.search("come together", 50).unwrap();
        assert!(result.artists.is_empty());
    }

    #[test]
    fn search_cache_does_not_serve_deleted_tracks() {
        let (dir, catalog) = setup();
        add_file(&dir, "A/Album/keeper.mp3");
        catalog.rebuild().unwrap();

        let first = catalog.search("keeper", 50).unwrap();
        assert_eq!(first.artists.len(), 1);
        // Second identical query is a cache hit.
        let second = catalog.search("keeper", 50).unwrap();
        assert_eq!(second.artists.len(), 1);

        remove_file(&dir, "A/Album/keeper.mp3");
        catalog.resync().unwrap();
        let third = catalog.search("keeper", 50).unwrap();
        assert!(third.artists.is_empty(), "stale cache served a deleted track");
    }

    #[test]
    fn status_progress_is_monotonic_during_rebuild() {
        let (dir, catalog) = setup();
        for i in 0..250 {
            add_file(&dir, &format!("A/Album/t{i:03}.mp3"));
        }

        let status_path = dir.path().join("data/status.json");
        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let status_path = status_path.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut seen: Vec<f64> = Vec::new();
                while !done.load(Ordering::Relaxed) {
                    if let Ok(raw) = fs::read_to_string(&status_path) {
                        if let Ok(record) = serde_json::from_str::<StatusRecord>(&raw) {
                            if record.status == Phase::Rebuilding {
                                seen.push(record.progress);
                            }
                        }
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                seen
            })
        };

        catalog.rebuild().unwrap();
        done.store(true, Ordering::Relaxed);
        let seen = reader.join().unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {seen:?}");
        assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(!status_path.exists());
    }

    #[test]
    fn monitoring_picks_up_new_files() {
        let (dir, catalog) = setup();
        catalog.start_monitoring().unwrap();
        catalog.start_monitoring().unwrap(); // idempotent

        add_file(&dir, "new.mp3");

        let deadline = Instant::now() + Duration::from_secs(15);
        let mut found = false;
        while Instant::now() < deadline {
            if stored_count(&dir) == 1 {
                found = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert!(found, "watched file never reached the store");
    }

    #[test]
    fn stop_is_clean_and_reopen_sees_committed_state() {
        let (dir, mut catalog) = setup();
        add_file(&dir, "A/Album/one.mp3");
        catalog.rebuild().unwrap();
        catalog.stop();
        drop(catalog);

        let config = Config::with_data_dir(dir.path().join("music"), dir.path().join("data"));
        let reopened = Catalog::open(config).unwrap();
        let result = reopened.search("one", 50).unwrap();
        assert_eq!(result.artists.len(), 1);
    }

    #[test]
    fn open_fails_fast_on_unusable_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let music_root = dir.path().join("music");
        fs::create_dir_all(&music_root).unwrap();
        // Data dir path collides with an existing file.
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"file, not a directory").unwrap();

        let config = Config::with_data_dir(&music_root, &blocked);
        assert!(Catalog::open(config).is_err());
    }

    #[test]
    fn release_dir_matches_cover_art_lookup_key() {
        let (dir, catalog) = setup();
        add_file(&dir, "A/Album One/a.mp3");
        add_file(&dir, "A/Album Two/b.mp3");
        catalog.rebuild().unwrap();

        let result = catalog.search("release:'A/Album One' a", 50).unwrap();
        let dirs: Vec<&str> = result
            .artists
            .iter()
            .flat_map(|ar| ar.albums.iter())
            .map(|al| al.release_dir.as_str())
            .collect();
        assert_eq!(dirs, vec!["A/Album One"]);
    }
}
