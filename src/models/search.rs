use serde::{Deserialize, Serialize};

use crate::models::track::Track;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub artists: Vec<ArtistGroup>,
    /// Normalized free-text terms that were matched, for downstream
    /// highlighting.
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistGroup {
    pub name: String,
    pub album_count: usize,
    pub albums: Vec<AlbumGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumGroup {
    pub name: String,
    pub release_dir: String,
    pub track_count: usize,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Artist,
    Album,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: FilterField,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedQuery {
    pub terms: Vec<String>,
    pub filters: Vec<FieldFilter>,
}
