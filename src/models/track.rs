use serde::{Deserialize, Serialize};

/// Placeholder stored in place of missing or unreadable text tags so that
/// every row stays displayable.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub path: String,
    pub filename: String,
    pub artist: String,
    pub album: String,
    pub albumartist: String,
    pub title: String,
    pub genre: String,
    pub year: Option<i64>,
    pub duration: Option<f64>,
    pub mtime: f64,
}

impl Track {
    /// Parent directory of the relative path. Doubles as the album identity
    /// key for grouping and as the cover-art lookup key downstream.
    pub fn release_dir(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: &str) -> Track {
        Track {
            path: path.to_string(),
            filename: "a.mp3".to_string(),
            artist: UNKNOWN.to_string(),
            album: UNKNOWN.to_string(),
            albumartist: UNKNOWN.to_string(),
            title: "a".to_string(),
            genre: UNKNOWN.to_string(),
            year: None,
            duration: None,
            mtime: 0.0,
        }
    }

    #[test]
    fn release_dir_is_parent_of_relative_path() {
        assert_eq!(sample("Artist/Album/a.mp3").release_dir(), "Artist/Album");
        assert_eq!(sample("Album/a.mp3").release_dir(), "Album");
    }

    #[test]
    fn release_dir_of_top_level_file_is_empty() {
        assert_eq!(sample("a.mp3").release_dir(), "");
    }
}
