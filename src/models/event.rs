use std::path::PathBuf;

/// Which batch a completion marker terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Rebuild,
    Resync,
}

/// One unit of work on the index queue. Paths are relative to the music
/// root. Events are produced by the watcher or the reconciler, consumed
/// exactly once by the writer, and carry no payload beyond the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// File was created or modified; (re-)read its metadata and upsert.
    Index(PathBuf),
    /// File is gone; remove its row.
    Delete(PathBuf),
    /// Empty the canonical table (the mirror follows via triggers).
    ClearAll,
    /// No data change. Forces an immediate commit and signals the drain
    /// barrier so a blocked rebuild/resync caller can proceed.
    Marker(MarkerKind),
}
