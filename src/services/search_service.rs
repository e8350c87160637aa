use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::data::{self, repository};
use crate::error::IndexError;
use crate::models::search::{
    AlbumGroup, ArtistGroup, FieldFilter, FilterField, ParsedQuery, SearchResponse,
};
use crate::models::track::Track;

/// Below this many characters of free text the FTS index is not worth
/// asking; fall through to the substring scan.
pub const MIN_MATCH_CHARS: usize = 2;

const CACHE_MAX_ENTRIES: usize = 64;

fn filter_field(word: &str) -> Option<FilterField> {
    match word.to_ascii_lowercase().as_str() {
        "artist" => Some(FilterField::Artist),
        "album" => Some(FilterField::Album),
        "release" => Some(FilterField::Release),
        _ => None,
    }
}

/// Split a query into lowercased free-text terms and `field:'value'`
/// filters. Quoted values may contain spaces; an unclosed quote consumes
/// the rest of the query. Anything unrecognized stays a free term, so a
/// malformed query degrades instead of failing.
pub fn parse_query(query: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut chars = query.chars().peekable();
    let mut word = String::new();

    let flush = |word: &mut String, parsed: &mut ParsedQuery| {
        if !word.is_empty() {
            parsed.terms.push(word.to_lowercase());
            word.clear();
        }
    };

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            flush(&mut word, &mut parsed);
        } else if c == ':' && chars.peek() == Some(&'\'') {
            match filter_field(&word) {
                Some(field) => {
                    chars.next();
                    let mut value = String::new();
                    for ch in chars.by_ref() {
                        if ch == '\'' {
                            break;
                        }
                        value.push(ch);
                    }
                    if !value.is_empty() {
                        parsed.filters.push(FieldFilter { field, value });
                    }
                    word.clear();
                }
                None => word.push(c),
            }
        } else {
            word.push(c);
        }
    }
    flush(&mut word, &mut parsed);
    parsed
}

/// FTS5 MATCH expression from the free terms: every term quoted (internal
/// quotes doubled), implicit AND between them, and a prefix operator on
/// the final term so search-as-you-type matches partial words. `None` when
/// the terms cannot form a useful expression.
pub fn build_match_expr(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    let has_content = terms.iter().any(|t| t.chars().any(char::is_alphanumeric));
    let total_chars: usize = terms.iter().map(|t| t.chars().count()).sum();
    if !has_content || total_chars < MIN_MATCH_CHARS {
        return None;
    }

    let quoted: Vec<String> = terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    let mut expr = quoted.join(" ");
    expr.push('*');
    Some(expr)
}

/// Fold flat rows (ordered by artist, then path) into the
/// artist → release directory → track hierarchy with counts at each
/// level, so a client can render collapsed summaries cheaply.
pub fn group_tracks(rows: Vec<Track>) -> Vec<ArtistGroup> {
    let mut artists: Vec<ArtistGroup> = Vec::new();
    for track in rows {
        let same_artist = artists
            .last()
            .map(|a| a.name.eq_ignore_ascii_case(&track.artist))
            .unwrap_or(false);
        if !same_artist {
            artists.push(ArtistGroup {
                name: track.artist.clone(),
                album_count: 0,
                albums: Vec::new(),
            });
        }
        let artist = artists.last_mut().expect("pushed above");

        let release_dir = track.release_dir().to_string();
        let same_album = artist
            .albums
            .last()
            .map(|a| a.release_dir == release_dir)
            .unwrap_or(false);
        if !same_album {
            artist.albums.push(AlbumGroup {
                name: track.album.clone(),
                release_dir,
                track_count: 0,
                tracks: Vec::new(),
            });
        }
        let album = artist.albums.last_mut().expect("pushed above");
        album.track_count += 1;
        album.tracks.push(track);
    }
    for artist in &mut artists {
        artist.album_count = artist.albums.len();
    }
    artists
}

/// One search: parse, match (falling back to a substring scan when the
/// expression is unusable or rejected), group. Opens its own short-lived
/// read handle; never blocks on the writer.
pub fn search(db_path: &Path, query: &str, limit: usize) -> Result<SearchResponse, IndexError> {
    let parsed = parse_query(query);
    if limit == 0 || (parsed.terms.is_empty() && parsed.filters.is_empty()) {
        return Ok(SearchResponse {
            artists: Vec::new(),
            terms: parsed.terms,
        });
    }

    let conn = data::open_read_only(db_path)?;
    let rows = match build_match_expr(&parsed.terms) {
        Some(expr) => match repository::search_match(&conn, &expr, &parsed.filters, limit) {
            Ok(rows) => rows,
            Err(e) => {
                debug!("full-text query failed ({e}), falling back to substring scan");
                repository::search_substring(&conn, &parsed.terms, &parsed.filters, limit)?
            }
        },
        None => repository::search_substring(&conn, &parsed.terms, &parsed.filters, limit)?,
    };

    Ok(SearchResponse {
        artists: group_tracks(rows),
        terms: parsed.terms,
    })
}

/// Small per-session result cache so refining a query keystroke by
/// keystroke can reuse prior results. Tagged with the writer's commit
/// generation: any committed mutation invalidates every entry, so stale
/// candidates can never surface deleted tracks.
pub struct SearchCache {
    generation: AtomicU64,
    entries: Mutex<HashMap<String, SearchResponse>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(query: &str, limit: usize) -> String {
        format!("{limit}:{}", query.trim().to_lowercase())
    }

    pub fn lookup(&self, key: &str, write_gen: u64) -> Option<SearchResponse> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.generation.swap(write_gen, Ordering::AcqRel) != write_gen {
            entries.clear();
            return None;
        }
        entries.get(key).cloned()
    }

    pub fn store(&self, key: String, response: &SearchResponse, write_gen: u64) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.generation.load(Ordering::Acquire) != write_gen {
            return;
        }
        if entries.len() >= CACHE_MAX_ENTRIES {
            entries.clear();
        }
        entries.insert(key, response.clone());
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new()
    }
}
