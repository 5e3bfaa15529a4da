//! Per-report cache of selection table layout and one person's rows
//!
//! Built fresh for each report and dropped with it. Table columns and the leaf
//! children of the last column level are gathered up front; person rows are
//! fetched the first time a table is visited.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::db::{PersonRow, SchemaCapability};
use crate::error::StorageError;
use crate::tree::{LocationNode, LocationTree, NodeId};
use crate::PersonId;

pub struct HierarchyCache<'a, S: SchemaCapability> {
    schema: &'a S,
    tree: &'a LocationTree,
    person: PersonId,
    table_columns: BTreeMap<String, Vec<String>>,
    leaves: HashMap<NodeId, Vec<&'a LocationNode>>,
    rows: HashMap<String, Option<PersonRow>>,
}

impl<'a, S: SchemaCapability> HierarchyCache<'a, S> {
    pub fn build(
        schema: &'a S,
        tree: &'a LocationTree,
        person: PersonId,
        leaf_parent_level: u32,
    ) -> Result<Self, StorageError> {
        let leaves = tree
            .nodes()
            .into_iter()
            .filter(|node| node.level == leaf_parent_level)
            .map(|node| (node.id, tree.children_of(node.id).collect()))
            .collect();

        Ok(Self {
            schema,
            tree,
            person,
            table_columns: schema.selection_tables()?,
            leaves,
            rows: HashMap::new(),
        })
    }

    /// Number of selection tables with at least one bitmask column
    pub fn table_count(&self) -> usize {
        self.table_columns.len()
    }

    /// Bitmask columns of `table`, `None` for unknown or column-less tables
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.table_columns.get(table).map(Vec::as_slice)
    }

    pub fn path(&self, id: NodeId) -> Option<&'a str> {
        self.tree.hierarchy_path(id)
    }

    /// Leaves under a node of the last column level, ordered by `ChildId`
    pub fn leaf_children(&self, id: NodeId) -> &[&'a LocationNode] {
        self.leaves.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// The person's active row in `table`. A failed fetch is logged and
    /// remembered as missing.
    pub fn row(&mut self, table: &str) -> Option<&PersonRow> {
        if !self.rows.contains_key(table) {
            let row = match self.schema.person_row(table, self.person) {
                Ok(row) => row,
                Err(e) => {
                    warn!(table = %table, person = self.person, error = %e, "Failed to read selection row");
                    None
                }
            };
            self.rows.insert(table.to_string(), row);
        }
        self.rows.get(table).and_then(Option::as_ref)
    }
}
