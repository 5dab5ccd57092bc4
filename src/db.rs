use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode},
    ConnectOptions,
};
use tracing::{debug, error, info};

use crate::errors::StoreError;

pub const USER_TABLE: &str = "User";

const CREATE_USER_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS User (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL
    )
"#;

/// Open a connection to the backing file, creating the file and its parent
/// directory if they do not exist yet.
pub async fn connect(path: &Path) -> Result<SqliteConnection, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            error!(error = %e, path = %parent.display(), "create store directory failed");
            StoreError::ConnectionFailure(format!("{}: {e}", parent.display()))
        })?;
    }

    let existed = tokio::fs::try_exists(path).await.unwrap_or(false);
    let conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        // Keep the store a single file on disk.
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .map_err(|e| {
            error!(error = %e, path = %path.display(), "connect to backing store failed");
            StoreError::ConnectionFailure(format!("{}: {e}", path.display()))
        })?;

    if existed {
        debug!(path = %path.display(), "connected to backing store");
    } else {
        info!(path = %path.display(), "backing store created");
    }
    Ok(conn)
}

/// Create the user table if it is absent.
pub async fn create_tables(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query(CREATE_USER_TABLE)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!(error = %e, "create user table failed");
            StoreError::SchemaFailure(e.to_string())
        })?;
    debug!(table = USER_TABLE, "schema ready");
    Ok(())
}
