//! Visitlog Store - per-person location selections over a dynamic schema
//!
//! People tick the places they have visited in a deep location taxonomy
//! (continent > country > prefecture > ... > station). Selections are kept as
//! one arbitrary-precision bitmask per parent node, in tables generated from
//! the taxonomy itself.
//!
//! ## Storage Layout
//!
//! ```text
//! Table "ContinentParent"          <- named after the grandparent
//! ┌──────────┬──────┬────────┬───────────┐
//! │ PersonId │ Asia │ Europe │ IsDeleted │  <- one column per parent
//! ├──────────┼──────┼────────┼───────────┤
//! │ 42       │ 0b11 │ NULL   │ 0         │  <- bit i = child with ChildId i
//! └──────────┴──────┴────────┴───────────┘
//! ```
//!
//! Nodes up to `max_materialized_level` get a table. One level below they are
//! only columns, and the level after that exists only as bit positions.
//!
//! ## Modules
//!
//! - [`bitmask`] - Encode, test, decode and normalize bitmasks
//! - [`tree`] - In-memory taxonomy and the table/column indirection
//! - [`store`] - Read, write and cascade-reset selections
//! - [`report`] - Rebuild a person's selected paths
//! - [`view`] - Child listings with selection flags
//! - [`input`] - Anchor and selection payload parsing
//! - [`db`] - SQLite connection, base schema and provisioning
//! - [`services`] - Async orchestration used by the CLI

pub mod bitmask;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod input;
pub mod report;
pub mod services;
pub mod store;
pub mod tree;
pub mod view;

/// Identifier of the person owning a selection row
pub type PersonId = i64;

pub use config::Config;
pub use db::LocationDb;
pub use error::StorageError;
pub use report::PathReconstructor;
pub use services::{SaveOutcome, SelectionService};
pub use store::SelectionStore;
pub use tree::{LocationNode, LocationTree, NodeId};
pub use view::{LocationViewRecord, SelectionViewBuilder};

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures: a small Asia/Europe taxonomy reaching leaf level 7

    use crate::bitmask::ChildId;
    use crate::db::{self, LocationDb, NameTypeRow};
    use crate::tree::{LocationNode, LocationTree, NodeId};

    pub fn node(id: NodeId, name: &str, parent: Option<NodeId>, child_id: ChildId, level: u32) -> LocationNode {
        LocationNode {
            id,
            name: name.to_string(),
            name_type_id: None,
            storage_type: "int".to_string(),
            parent_id: parent,
            child_id,
            level,
        }
    }

    fn typed(mut location: LocationNode, name_type_id: i64) -> LocationNode {
        location.name_type_id = Some(name_type_id);
        location
    }

    pub fn sample_nodes() -> Vec<LocationNode> {
        vec![
            node(100, "ContinentGrandparent", None, 0, 1),
            node(1, "ContinentParent", Some(100), 0, 2),
            typed(node(2, "Asia", Some(1), 0, 3), 1),
            typed(node(3, "Europe", Some(1), 1, 3), 1),
            typed(node(4, "Japan", Some(2), 0, 4), 2),
            typed(node(5, "China", Some(2), 1, 4), 2),
            typed(node(6, "France", Some(3), 0, 4), 2),
            typed(node(7, "Tokyo Metropolis", Some(4), 0, 5), 3),
            typed(node(8, "Osaka", Some(4), 1, 5), 3),
            typed(node(9, "Shinjuku", Some(7), 0, 6), 4),
            typed(node(10, "Shibuya", Some(7), 1, 6), 4),
            typed(node(11, "Kabukicho", Some(9), 0, 7), 9),
            typed(node(12, "Nishi-Shinjuku", Some(9), 1, 7), 9),
            typed(node(13, "Dogenzaka", Some(10), 0, 7), 9),
        ]
    }

    pub fn sample_tree() -> LocationTree {
        LocationTree::build(sample_nodes(), " > ").unwrap()
    }

    pub fn sample_name_types() -> Vec<NameTypeRow> {
        [(1, "Continent"), (2, "Country"), (3, "Prefecture"), (4, "Ward")]
            .into_iter()
            .map(|(name_type_id, name)| NameTypeRow { name_type_id, name: name.to_string() })
            .collect()
    }

    /// In-memory database seeded with the sample taxonomy and provisioned tables
    pub fn sample_db() -> (LocationDb, LocationTree) {
        let db = LocationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            db::locations::replace_locations(conn, &sample_nodes())?;
            db::locations::upsert_name_types(conn, &sample_name_types())?;
            Ok(())
        })
        .unwrap();

        let tree = db.with_conn(|conn| db::load_tree(conn, " > ")).unwrap();
        db.with_conn(|conn| db::provision_selection_tables(conn, &tree, 5)).unwrap();
        (db, tree)
    }
}
