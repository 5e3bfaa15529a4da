//! Schema capability over dynamically named selection tables
//!
//! Selection tables and their columns are named after taxonomy nodes, so no
//! query here is known at compile time. The domain layer only talks to the
//! [`SchemaCapability`] trait; [`SqliteSchema`] is the SQLite implementation.
//! Data-driven identifiers are always quoted, the person id is always bound.

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use crate::bitmask::{RawBitmask, StoredBitmask};
use crate::error::StorageError;
use crate::PersonId;

/// Join key present in every selection table
pub const PERSON_ID_COLUMN: &str = "PersonId";

/// Tombstone flag present in every selection table (`0` = active)
pub const IS_DELETED_COLUMN: &str = "IsDeleted";

/// Fixed tables that are never treated as selection tables
pub const BASE_TABLES: &[&str] = &["Locations", "NameTypes", "Persons", "schema_version"];

/// One person's row in a selection table: bitmask column name to raw value
pub type PersonRow = BTreeMap<String, RawBitmask>;

pub fn is_reserved_column(name: &str) -> bool {
    name.eq_ignore_ascii_case(PERSON_ID_COLUMN) || name.eq_ignore_ascii_case(IS_DELETED_COLUMN)
}

pub fn is_base_table(name: &str) -> bool {
    BASE_TABLES.iter().any(|base| base.eq_ignore_ascii_case(name))
}

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Storage operations the selection store needs
pub trait SchemaCapability {
    /// Whether a table with this name exists
    fn table_exists(&self, table: &str) -> Result<bool, StorageError>;

    /// Bitmask columns of a table in declaration order, reserved columns excluded.
    /// Fails with [`StorageError::TableNotFound`] for a missing table.
    fn selection_columns(&self, table: &str) -> Result<Vec<String>, StorageError>;

    /// Every selection table that has at least one bitmask column
    fn selection_tables(&self) -> Result<BTreeMap<String, Vec<String>>, StorageError>;

    /// The person's active row (tombstoned rows count as missing)
    fn person_row(&self, table: &str, person: PersonId) -> Result<Option<PersonRow>, StorageError>;

    /// Bitmask columns holding a non-null value for the person
    fn populated_columns(&self, table: &str, person: PersonId) -> Result<Vec<String>, StorageError>;

    /// Update the person's row in place, or insert it; either way the row ends up active
    fn upsert_bitmask(
        &self,
        table: &str,
        column: &str,
        person: PersonId,
        value: &StoredBitmask,
    ) -> Result<(), StorageError>;

    /// Set the given columns of the person's row back to their defaults.
    /// Returns the number of rows touched.
    fn clear_columns(
        &self,
        table: &str,
        columns: &[String],
        person: PersonId,
    ) -> Result<usize, StorageError>;
}

/// Column metadata from `pragma_table_info`
#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    default: Option<String>,
}

/// [`SchemaCapability`] backed by a SQLite connection
pub struct SqliteSchema<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSchema<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Names of every table carrying a `PersonId` column, base tables excluded
    pub fn selection_table_names(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT m.name FROM sqlite_master m
            WHERE m.type = 'table'
              AND EXISTS (
                  SELECT 1 FROM pragma_table_info(m.name) k
                  WHERE k.name = 'PersonId' COLLATE NOCASE
              )
            ORDER BY m.name
            "#,
        )?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(names.into_iter().filter(|name| !is_base_table(name)).collect())
    }

    fn column_info(&self, table: &str) -> Result<Vec<ColumnInfo>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, dflt_value FROM pragma_table_info(?1) ORDER BY cid")?;

        let columns = stmt
            .query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    default: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(StorageError::TableNotFound(table.to_string()));
        }

        Ok(columns)
    }

    fn read_row(
        &self,
        table: &str,
        person: PersonId,
        active_only: bool,
    ) -> Result<Option<PersonRow>, StorageError> {
        let info = self.column_info(table)?;
        let columns: Vec<&str> = info
            .iter()
            .filter(|c| !is_reserved_column(&c.name))
            .map(|c| c.name.as_str())
            .collect();
        let has_tombstone = info
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(IS_DELETED_COLUMN));

        let mut select = vec![PERSON_ID_COLUMN.to_string()];
        select.extend(columns.iter().map(|c| quote_ident(c)));

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select.join(", "),
            quote_ident(table),
            PERSON_ID_COLUMN
        );
        if active_only && has_tombstone {
            sql.push_str(&format!(" AND COALESCE({}, 0) = 0", IS_DELETED_COLUMN));
        }
        sql.push_str(" LIMIT 1");

        let row = self
            .conn
            .query_row(&sql, params![person], |row| {
                let mut values = PersonRow::new();
                for (i, column) in columns.iter().enumerate() {
                    let value: Value = row.get(i + 1)?;
                    values.insert(column.to_string(), RawBitmask::from(value));
                }
                Ok(values)
            })
            .optional()?;

        Ok(row)
    }
}

impl SchemaCapability for SqliteSchema<'_> {
    fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn selection_columns(&self, table: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .column_info(table)?
            .into_iter()
            .filter(|c| !is_reserved_column(&c.name))
            .map(|c| c.name)
            .collect())
    }

    fn selection_tables(&self) -> Result<BTreeMap<String, Vec<String>>, StorageError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT m.name, p.name FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            WHERE m.type = 'table'
              AND EXISTS (
                  SELECT 1 FROM pragma_table_info(m.name) k
                  WHERE k.name = 'PersonId' COLLATE NOCASE
              )
            ORDER BY m.name, p.cid
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (table, column) in rows {
            if is_base_table(&table) || is_reserved_column(&column) {
                continue;
            }
            tables.entry(table).or_default().push(column);
        }

        Ok(tables)
    }

    fn person_row(&self, table: &str, person: PersonId) -> Result<Option<PersonRow>, StorageError> {
        self.read_row(table, person, true)
    }

    fn populated_columns(&self, table: &str, person: PersonId) -> Result<Vec<String>, StorageError> {
        let Some(row) = self.read_row(table, person, false)? else {
            return Ok(Vec::new());
        };

        Ok(row
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(column, _)| column)
            .collect())
    }

    fn upsert_bitmask(
        &self,
        table: &str,
        column: &str,
        person: PersonId,
        value: &StoredBitmask,
    ) -> Result<(), StorageError> {
        let table = quote_ident(table);
        let column = quote_ident(column);

        let exists: bool = self.conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)", table, PERSON_ID_COLUMN),
            params![person],
            |row| row.get(0),
        )?;

        if exists {
            self.conn.execute(
                &format!(
                    "UPDATE {} SET {} = ?1, {} = 0 WHERE {} = ?2",
                    table, column, IS_DELETED_COLUMN, PERSON_ID_COLUMN
                ),
                params![value, person],
            )?;
        } else {
            self.conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, 0)",
                    table, PERSON_ID_COLUMN, column, IS_DELETED_COLUMN
                ),
                params![person, value],
            )?;
        }

        Ok(())
    }

    fn clear_columns(
        &self,
        table: &str,
        columns: &[String],
        person: PersonId,
    ) -> Result<usize, StorageError> {
        let info = self.column_info(table)?;

        // SQLite has no `SET col = DEFAULT`, so inline each column's declared default
        let assignments: Vec<String> = columns
            .iter()
            .filter_map(|column| {
                info.iter()
                    .find(|c| c.name.eq_ignore_ascii_case(column) && !is_reserved_column(&c.name))
                    .map(|c| {
                        format!(
                            "{} = {}",
                            quote_ident(&c.name),
                            c.default.as_deref().unwrap_or("NULL")
                        )
                    })
            })
            .collect();

        if assignments.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            quote_ident(table),
            assignments.join(", "),
            PERSON_ID_COLUMN
        );

        Ok(self.conn.execute(&sql, params![person])?)
    }
}
