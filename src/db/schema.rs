//! Database schema definitions
//!
//! Only the fixed tables live here. Selection tables depend on the taxonomy
//! and are created by [`super::provision`].

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| StorageError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StorageError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| StorageError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(TAXONOMY_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create taxonomy tables: {}", e)))?;

    conn.execute_batch(PERSONS_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create persons table: {}", e)))?;

    Ok(())
}

/// Taxonomy tables
const TAXONOMY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Locations (
    Id INTEGER PRIMARY KEY NOT NULL,
    Name TEXT NOT NULL,
    NameTypeId INTEGER,
    Type TEXT NOT NULL,
    ParentId INTEGER,
    ChildId INTEGER NOT NULL,
    Level INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_locations_parent ON Locations(ParentId);

CREATE TABLE IF NOT EXISTS NameTypes (
    NameTypeId INTEGER PRIMARY KEY NOT NULL,
    Name TEXT NOT NULL
);
"#;

/// Persons table (records are managed elsewhere; selection tables do not require a row here)
const PERSONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Persons (
    PersonId INTEGER PRIMARY KEY NOT NULL,
    FirstName TEXT,
    MiddleName TEXT,
    LastName TEXT,
    Email TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('Locations', 'NameTypes', 'Persons')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
