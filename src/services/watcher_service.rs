use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::models::event::IndexEvent;

/// Extensions the catalog considers audio. Everything else, and every
/// directory event, is discarded at the watcher boundary.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav", "wma", "aiff", "ape",
];

/// Per-path coalescing window. Editor-save bursts of modify events within
/// the window collapse into a single event for the final state.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// Bound on the shutdown join; shutdown proceeds (and logs) past it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WatcherHandle {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.iter().any(|&a| a == ext)
        })
        .unwrap_or(false)
}

pub fn is_hidden(rel: &Path) -> bool {
    rel.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
    })
}

/// Map a debounced filesystem path to an index event, or discard it.
/// A path that still exists is (re-)indexed; a vanished one is deleted.
/// An existing directory that happens to carry an audio extension is
/// discarded.
pub fn classify(music_root: &Path, path: &Path) -> Option<IndexEvent> {
    let rel = path.strip_prefix(music_root).ok()?.to_path_buf();
    if is_hidden(&rel) || !is_supported(path) {
        return None;
    }
    if path.is_file() {
        Some(IndexEvent::Index(rel))
    } else if !path.exists() {
        Some(IndexEvent::Delete(rel))
    } else {
        None
    }
}

pub fn start_watching(
    music_root: &Path,
    queue: Sender<IndexEvent>,
) -> Result<WatcherHandle, IndexError> {
    if !music_root.is_dir() {
        return Err(IndexError::Watcher(format!(
            "not a directory: {}",
            music_root.display()
        )));
    }

    let root = music_root.to_path_buf();
    let mut debouncer = new_debouncer(
        DEBOUNCE_WINDOW,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in events {
                    if matches!(
                        event.kind,
                        DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                    ) {
                        if let Some(index_event) = classify(&root, &event.path) {
                            if queue.send(index_event).is_err() {
                                debug!("index queue closed, dropping watch event");
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!("watcher error: {e}");
            }
        },
    )
    .map_err(|e| IndexError::Watcher(e.to_string()))?;

    debouncer
        .watcher()
        .watch(music_root, RecursiveMode::Recursive)
        .map_err(|e| IndexError::Watcher(e.to_string()))?;

    Ok(WatcherHandle {
        _debouncer: debouncer,
    })
}

/// Best-effort shutdown. Dropping the debouncer joins its worker; do that
/// off-thread so a wedged observer cannot hang the process past the bound.
pub fn stop_watching(handle: WatcherHandle) {
    let joiner = std::thread::spawn(move || drop(handle));
    let deadline = Instant::now() + STOP_TIMEOUT;
    while !joiner.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
    }
    if joiner.is_finished() {
        let _ = joiner.join();
    } else {
        warn!(
            "watcher did not stop within {:?}, abandoning shutdown wait",
            STOP_TIMEOUT
        );
    }
}
