pub mod metadata_service;
pub mod reconcile_service;
pub mod search_service;
pub mod status_service;
pub mod watcher_service;
pub mod writer_service;
