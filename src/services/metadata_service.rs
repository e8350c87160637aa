use std::path::Path;
use std::time::UNIX_EPOCH;

use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::tag::Tag;
use tracing::debug;

use crate::error::IndexError;
use crate::models::track::{Track, UNKNOWN};

fn tag_string(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// Year tags come in many shapes ("1969", "1969-09-26"); take the leading
// digits.
fn parse_year(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Build a track row from a file on disk. Missing or corrupt tags never
/// fail: text fields fall back to "Unknown", the title falls back to the
/// filename stem, and numeric fields stay empty. Only a file that cannot
/// be stat'ed at all is an error (the caller skips the event).
pub fn read_track(abs_path: &Path, rel_path: &str) -> Result<Track, IndexError> {
    let fs_meta = std::fs::metadata(abs_path)
        .map_err(|e| IndexError::Metadata(format!("{}: {e}", abs_path.display())))?;
    let mtime = fs_meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let filename = abs_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(rel_path)
        .to_string();
    let stem = abs_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&filename)
        .to_string();

    let mut track = Track {
        path: rel_path.to_string(),
        filename,
        artist: UNKNOWN.to_string(),
        album: UNKNOWN.to_string(),
        albumartist: UNKNOWN.to_string(),
        title: stem,
        genre: UNKNOWN.to_string(),
        year: None,
        duration: None,
        mtime,
    };

    match lofty::read_from_path(abs_path) {
        Ok(tagged) => {
            track.duration = Some(tagged.properties().duration().as_secs_f64());
            if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
                if let Some(v) = tag_string(tag, &ItemKey::TrackTitle) {
                    track.title = v;
                }
                if let Some(v) = tag_string(tag, &ItemKey::TrackArtist) {
                    track.artist = v;
                }
                if let Some(v) = tag_string(tag, &ItemKey::AlbumTitle) {
                    track.album = v;
                }
                if let Some(v) = tag_string(tag, &ItemKey::AlbumArtist) {
                    track.albumartist = v;
                }
                if let Some(v) = tag_string(tag, &ItemKey::Genre) {
                    track.genre = v;
                }
                track.year = tag
                    .get_string(&ItemKey::Year)
                    .or_else(|| tag.get_string(&ItemKey::RecordingDate))
                    .and_then(parse_year);
            }
        }
        Err(e) => {
            // Unsupported codec or corrupt tags; the fallback row is still
            // indexed so the file remains findable by name.
            debug!(path = rel_path, "tag read failed, using fallbacks: {e}");
        }
    }

    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn unreadable_tags_fall_back_to_filename_stem() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("My Song.mp3");
        fs::write(&file, b"not a real mp3").unwrap();

        let track = read_track(&file, "sub/My Song.mp3").unwrap();
        assert_eq!(track.path, "sub/My Song.mp3");
        assert_eq!(track.filename, "My Song.mp3");
        assert_eq!(track.title, "My Song");
        assert_eq!(track.artist, UNKNOWN);
        assert_eq!(track.album, UNKNOWN);
        assert_eq!(track.albumartist, UNKNOWN);
        assert_eq!(track.genre, UNKNOWN);
        assert_eq!(track.year, None);
        assert!(track.mtime > 0.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.mp3");
        assert!(read_track(&gone, "gone.mp3").is_err());
    }

    #[test]
    fn year_parses_leading_digits() {
        assert_eq!(parse_year("1969"), Some(1969));
        assert_eq!(parse_year("1969-09-26"), Some(1969));
        assert_eq!(parse_year("sometime"), None);
        assert_eq!(parse_year(""), None);
    }
}
