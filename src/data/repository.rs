use rusqlite::{params, Connection, Row};

use crate::error::IndexError;
use crate::models::search::{FieldFilter, FilterField};
use crate::models::track::Track;

const TRACK_COLUMNS: &str =
    "path, filename, artist, album, albumartist, title, genre, year, duration, mtime";

const TRACK_COLUMNS_T: &str = "t.path, t.filename, t.artist, t.album, t.albumartist, t.title, \
     t.genre, t.year, t.duration, t.mtime";

fn map_track(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        path: row.get(0)?,
        filename: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        albumartist: row.get(4)?,
        title: row.get(5)?,
        genre: row.get(6)?,
        year: row.get(7)?,
        duration: row.get(8)?,
        mtime: row.get(9)?,
    })
}

pub fn upsert_track(conn: &Connection, track: &Track) -> Result<(), IndexError> {
    conn.execute(
        "INSERT INTO tracks (path, filename, artist, album, albumartist, title, genre, year, duration, mtime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(path) DO UPDATE SET
             filename = excluded.filename,
             artist = excluded.artist,
             album = excluded.album,
             albumartist = excluded.albumartist,
             title = excluded.title,
             genre = excluded.genre,
             year = excluded.year,
             duration = excluded.duration,
             mtime = excluded.mtime",
        params![
            track.path,
            track.filename,
            track.artist,
            track.album,
            track.albumartist,
            track.title,
            track.genre,
            track.year,
            track.duration,
            track.mtime,
        ],
    )?;
    Ok(())
}

pub fn delete_by_path(conn: &Connection, path: &str) -> Result<usize, IndexError> {
    let count = conn.execute("DELETE FROM tracks WHERE path = ?1", params![path])?;
    Ok(count)
}

pub fn clear_all(conn: &Connection) -> Result<usize, IndexError> {
    let count = conn.execute("DELETE FROM tracks", [])?;
    Ok(count)
}

pub fn get_by_path(conn: &Connection, path: &str) -> Result<Option<Track>, IndexError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE path = ?1"
    ))?;
    let track = match stmt.query_row(params![path], map_track) {
        Ok(track) => Some(track),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(track)
}

pub fn count_tracks(conn: &Connection) -> Result<i64, IndexError> {
    let count = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
    Ok(count)
}

/// Every relative path currently in the canonical table; the store side of
/// the resync set-diff.
pub fn all_paths(conn: &Connection) -> Result<Vec<String>, IndexError> {
    let mut stmt = conn.prepare("SELECT path FROM tracks ORDER BY path")?;
    let paths = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(paths)
}

fn filter_clause(filter: &FieldFilter, param_index: usize) -> String {
    match filter.field {
        FilterField::Artist => format!(" AND t.artist = ?{param_index} COLLATE NOCASE"),
        FilterField::Album => format!(" AND t.album = ?{param_index} COLLATE NOCASE"),
        // Release directory = path minus "/<filename>"; empty for files at
        // the library root.
        FilterField::Release => format!(
            " AND substr(t.path, 1, length(t.path) - length(t.filename) - 1) = ?{param_index} COLLATE NOCASE"
        ),
    }
}

/// Full-text candidates for a prebuilt FTS5 MATCH expression. Fails with a
/// database error when the expression is not valid FTS5 syntax; the search
/// engine falls back to the substring scan in that case.
pub fn search_match(
    conn: &Connection,
    match_expr: &str,
    filters: &[FieldFilter],
    limit: usize,
) -> Result<Vec<Track>, IndexError> {
    let mut sql = format!(
        "SELECT {TRACK_COLUMNS_T} FROM tracks t JOIN tracks_fts ON tracks_fts.rowid = t.id
         WHERE tracks_fts MATCH ?1"
    );
    let mut values: Vec<String> = vec![match_expr.to_string()];
    for filter in filters {
        sql.push_str(&filter_clause(filter, values.len() + 1));
        values.push(filter.value.clone());
    }
    sql.push_str(&format!(
        " ORDER BY t.artist COLLATE NOCASE, t.path LIMIT {limit}"
    ));

    let mut stmt = conn.prepare(&sql)?;
    let tracks = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), map_track)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tracks)
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Substring scan over the displayable text columns; the fallback when the
/// free terms cannot be expressed as an FTS5 query. Terms are ANDed, each
/// term may match any column. With no terms, only the field filters apply.
pub fn search_substring(
    conn: &Connection,
    terms: &[String],
    filters: &[FieldFilter],
    limit: usize,
) -> Result<Vec<Track>, IndexError> {
    let mut sql = format!("SELECT {TRACK_COLUMNS} FROM tracks t WHERE 1=1");
    let mut values: Vec<String> = Vec::new();
    for term in terms {
        let n = values.len() + 1;
        sql.push_str(&format!(
            " AND (t.artist LIKE ?{n} ESCAPE '\\' OR t.album LIKE ?{n} ESCAPE '\\' \
             OR t.albumartist LIKE ?{n} ESCAPE '\\' OR t.title LIKE ?{n} ESCAPE '\\' \
             OR t.filename LIKE ?{n} ESCAPE '\\')"
        ));
        values.push(format!("%{}%", escape_like(term)));
    }
    for filter in filters {
        sql.push_str(&filter_clause(filter, values.len() + 1));
        values.push(filter.value.clone());
    }
    sql.push_str(&format!(
        " ORDER BY t.artist COLLATE NOCASE, t.path LIMIT {limit}"
    ));

    let mut stmt = conn.prepare(&sql)?;
    let tracks = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), map_track)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tracks)
}

#[cfg(test)]
pub fn mirror_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM tracks_fts", [], |row| row.get(0))
        .unwrap()
}
