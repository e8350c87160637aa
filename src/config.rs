use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub const DB_FILE: &str = "catalog.db";
pub const STATUS_FILE: &str = "status.json";

/// Where the music lives and where the catalog keeps its own state.
/// Everything under `data_dir` is regenerable: the store via `rebuild()`,
/// the status file is ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub music_root: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Use the platform data directory for catalog state.
    pub fn new(music_root: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dirs = ProjectDirs::from("", "", "tunedex")
            .ok_or_else(|| IndexError::General("could not resolve a data directory".to_string()))?;
        Ok(Self {
            music_root: music_root.into(),
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }

    pub fn with_data_dir(music_root: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_root: music_root.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE)
    }
}
