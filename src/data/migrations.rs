use rusqlite::Connection;

use crate::error::IndexError;

// Canonical table plus an external-content FTS5 mirror. The triggers keep
// the mirror row-for-row consistent with `tracks`; the tokenizer folds
// diacritics so "Sigur Ros" finds "Sigur Rós".
const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    filename TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT NOT NULL,
    albumartist TEXT NOT NULL,
    title TEXT NOT NULL,
    genre TEXT NOT NULL,
    year INTEGER,
    duration REAL,
    mtime REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tracks_artist ON tracks(artist COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_tracks_album ON tracks(album COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_tracks_title ON tracks(title COLLATE NOCASE);

CREATE VIRTUAL TABLE IF NOT EXISTS tracks_fts USING fts5(
    path,
    filename,
    artist,
    album,
    albumartist,
    title,
    genre,
    content='tracks',
    content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);

CREATE TRIGGER IF NOT EXISTS tracks_ai AFTER INSERT ON tracks BEGIN
    INSERT INTO tracks_fts(rowid, path, filename, artist, album, albumartist, title, genre)
    VALUES (new.id, new.path, new.filename, new.artist, new.album, new.albumartist, new.title, new.genre);
END;

CREATE TRIGGER IF NOT EXISTS tracks_ad AFTER DELETE ON tracks BEGIN
    INSERT INTO tracks_fts(tracks_fts, rowid, path, filename, artist, album, albumartist, title, genre)
    VALUES ('delete', old.id, old.path, old.filename, old.artist, old.album, old.albumartist, old.title, old.genre);
END;

CREATE TRIGGER IF NOT EXISTS tracks_au AFTER UPDATE ON tracks BEGIN
    INSERT INTO tracks_fts(tracks_fts, rowid, path, filename, artist, album, albumartist, title, genre)
    VALUES ('delete', old.id, old.path, old.filename, old.artist, old.album, old.albumartist, old.title, old.genre);
    INSERT INTO tracks_fts(rowid, path, filename, artist, album, albumartist, title, genre)
    VALUES (new.id, new.path, new.filename, new.artist, new.album, new.albumartist, new.title, new.genre);
END;
";

pub fn run_migrations(conn: &Connection) -> Result<(), IndexError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    backfill_mirror(conn)?;
    Ok(())
}

// Covers first-run against a pre-existing canonical table and recovery
// after a purged mirror: if canonical rows exist but the mirror is empty,
// rebuild the mirror from content in one statement.
fn backfill_mirror(conn: &Connection) -> Result<(), IndexError> {
    let canonical: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
    if canonical == 0 {
        return Ok(());
    }
    let mirror: i64 = conn.query_row("SELECT COUNT(*) FROM tracks_fts", [], |row| row.get(0))?;
    if mirror == 0 {
        conn.execute("INSERT INTO tracks_fts(tracks_fts) VALUES('rebuild')", [])?;
    }
    Ok(())
}
