use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::data::{self, repository};
use crate::error::IndexError;
use crate::models::event::{IndexEvent, MarkerKind};
use crate::models::status::Phase;
use crate::services::status_service::StatusReporter;
use crate::services::watcher_service::{is_hidden, is_supported};
use crate::services::writer_service::DrainBarrier;

/// How many enqueued files between status refreshes.
pub const STATUS_REFRESH_EVERY: usize = 100;

fn send(queue: &Sender<IndexEvent>, event: IndexEvent) -> Result<(), IndexError> {
    queue
        .send(event)
        .map_err(|_| IndexError::General("index writer is not running".to_string()))
}

/// All supported audio files under the root, as relative paths in walk
/// order. Hidden files and directories are skipped, as are unreadable
/// entries (logged by walkdir's error variant).
pub fn collect_supported_files(music_root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(music_root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("walk error under {}: {e}", music_root.display());
                None
            }
        })
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(music_root) else {
            continue;
        };
        if is_hidden(rel) || !is_supported(path) {
            continue;
        }
        files.push(rel.to_path_buf());
    }
    files
}

/// Wipe and repopulate: clear the store, walk the whole root, enqueue an
/// index event per file, then block until the writer drains past the
/// completion marker.
pub fn rebuild(
    music_root: &Path,
    queue: &Sender<IndexEvent>,
    barrier: &DrainBarrier,
    status: &StatusReporter,
) -> Result<(), IndexError> {
    info!(root = %music_root.display(), "rebuild started");
    status.update(Phase::Rebuilding, 0, -1);
    send(queue, IndexEvent::ClearAll)?;

    let files = collect_supported_files(music_root);
    let total = files.len() as i64;
    status.update(Phase::Rebuilding, 0, total);

    for (i, rel) in files.iter().enumerate() {
        send(queue, IndexEvent::Index(rel.clone()))?;
        if (i + 1) % STATUS_REFRESH_EVERY == 0 {
            status.update(Phase::Rebuilding, (i + 1) as i64, total);
        }
    }
    status.update(Phase::Rebuilding, total, total);

    let gen = barrier.generation();
    send(queue, IndexEvent::Marker(MarkerKind::Rebuild))?;
    barrier.wait_past(gen);

    status.clear();
    info!(total, "rebuild complete");
    Ok(())
}

/// Incremental reconciliation: apply only the set-difference between the
/// filesystem and the store. Rows untouched by the delta are never
/// rewritten, which keeps resync cheap next to a full rebuild.
pub fn resync(
    music_root: &Path,
    db_path: &Path,
    queue: &Sender<IndexEvent>,
    barrier: &DrainBarrier,
    status: &StatusReporter,
) -> Result<(), IndexError> {
    info!(root = %music_root.display(), "resync started");
    status.update(Phase::Resyncing, 0, -1);

    let on_disk: HashSet<String> = collect_supported_files(music_root)
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let in_store: HashSet<String> = {
        let conn = data::open_read_only(db_path)?;
        repository::all_paths(&conn)?.into_iter().collect()
    };

    let mut to_remove: Vec<&String> = in_store.difference(&on_disk).collect();
    let mut to_add: Vec<&String> = on_disk.difference(&in_store).collect();
    to_remove.sort();
    to_add.sort();

    let total = (to_add.len() + to_remove.len()) as i64;
    status.update(Phase::Resyncing, 0, total);

    let mut done = 0i64;
    for path in to_remove {
        send(queue, IndexEvent::Delete(PathBuf::from(path)))?;
        done += 1;
        if done % STATUS_REFRESH_EVERY as i64 == 0 {
            status.update(Phase::Resyncing, done, total);
        }
    }
    for path in to_add {
        send(queue, IndexEvent::Index(PathBuf::from(path)))?;
        done += 1;
        if done % STATUS_REFRESH_EVERY as i64 == 0 {
            status.update(Phase::Resyncing, done, total);
        }
    }
    status.update(Phase::Resyncing, total, total);

    let gen = barrier.generation();
    send(queue, IndexEvent::Marker(MarkerKind::Resync))?;
    barrier.wait_past(gen);

    status.clear();
    info!(total, "resync complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collect_finds_only_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Artist/Album")).unwrap();
        fs::create_dir_all(root.join(".sync")).unwrap();
        fs::write(root.join("Artist/Album/one.mp3"), b"x").unwrap();
        fs::write(root.join("Artist/Album/two.FLAC"), b"x").unwrap();
        fs::write(root.join("Artist/Album/cover.jpg"), b"x").unwrap();
        fs::write(root.join("Artist/Album/.hidden.mp3"), b"x").unwrap();
        fs::write(root.join(".sync/three.mp3"), b"x").unwrap();
        fs::write(root.join("top.ogg"), b"x").unwrap();

        let mut files = collect_supported_files(root);
        files.sort();
        assert_eq!(
            files,
            vec![
                PathBuf::from("Artist/Album/one.mp3"),
                PathBuf::from("Artist/Album/two.FLAC"),
                PathBuf::from("top.ogg"),
            ]
        );
    }

    #[test]
    fn collect_on_empty_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_supported_files(dir.path()).is_empty());
    }
}
