//! SQLite database module for the taxonomy and per-person selections
//!
//! ## Tables
//!
//! - `Locations` - The taxonomy, one row per node
//! - `NameTypes` - Labels for a node's semantic category
//! - `Persons` - People whose selections are tracked
//! - One selection table per materialized node, named after the node, with a
//!   bitmask column per child (see [`provision`])
//!
//! Selection tables are created from data, so they are accessed through the
//! [`schema_ops::SchemaCapability`] trait rather than fixed SQL.

pub mod schema;
pub mod schema_ops;
pub mod locations;
pub mod provision;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StorageError;

/// SQLite database holding the taxonomy and selection tables
pub struct LocationDb {
    conn: Mutex<Connection>,
}

impl LocationDb {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| StorageError::Internal(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(schema::init_schema)
    }

    /// Run one logical operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation that needs a transaction
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let location_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM Locations", [], |row| row.get(0))
                .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

            let name_type_count: i64 = conn
                .query_row("SELECT COUNT(*) FROM NameTypes", [], |row| row.get(0))
                .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

            let selection_tables = schema_ops::SqliteSchema::new(conn)
                .selection_table_names()?
                .len();

            Ok(DbStats {
                location_count: location_count as u64,
                name_type_count: name_type_count as u64,
                selection_table_count: selection_tables as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub location_count: u64,
    pub name_type_count: u64,
    pub selection_table_count: u64,
}

// Re-exports
pub use locations::{NameTypeRow, load_tree, name_type_labels};
pub use provision::{ProvisionSummary, provision_selection_tables};
pub use schema_ops::{SchemaCapability, SqliteSchema, PersonRow};
