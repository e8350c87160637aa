//! Indexes a directory tree of audio files into a searchable, continuously
//! synchronized catalog. The route/presentation layer consumes this crate
//! in-process: open a [`Catalog`], `rebuild()` or `resync()` it, start
//! monitoring, and serve `search()` results.

mod catalog;
mod config;
mod data;
mod error;
mod models;
mod services;

pub use catalog::Catalog;
pub use config::Config;
pub use error::IndexError;
pub use models::search::{AlbumGroup, ArtistGroup, SearchResponse};
pub use models::status::{Phase, StatusRecord};
pub use models::track::Track;
