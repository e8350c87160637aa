pub mod migrations;
pub mod repository;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::IndexError;

pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Short-lived read handle, opened per query and closed on drop. WAL mode
/// keeps these from blocking behind the writer's transactions.
pub fn open_read_only(db_path: &Path) -> Result<Connection, IndexError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// The long-lived write handle. Exactly one of these exists at runtime,
/// owned by the writer loop.
pub fn open_writable(db_path: &Path) -> Result<Connection, IndexError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}
