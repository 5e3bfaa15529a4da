//! Selection store: read, write and cascade-reset per-person bitmasks
//!
//! The store never touches SQL directly. It resolves nodes to storage slots
//! through the [`LocationTree`] and goes through [`SchemaCapability`] for
//! everything else, so a missing table, row or column simply reads as
//! "nothing selected".

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use num_bigint::BigUint;
use serde::Serialize;
use tracing::{debug, warn};

use crate::bitmask::{self, ChildId, StoredBitmask};
use crate::db::SchemaCapability;
use crate::error::StorageError;
use crate::tree::{LocationTree, NodeId};
use crate::PersonId;

/// Outcome of [`SelectionStore::write`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub written: u64,
    /// Parents without a storage slot or whose table does not exist
    pub skipped: u64,
    pub failed: u64,
}

/// Outcome of [`SelectionStore::reset_unselected`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub columns_cleared: u64,
    pub tables_visited: u64,
    pub branches_abandoned: u64,
}

pub struct SelectionStore<'a, S: SchemaCapability> {
    schema: &'a S,
    tree: &'a LocationTree,
    max_materialized_level: u32,
}

impl<'a, S: SchemaCapability> SelectionStore<'a, S> {
    pub fn new(schema: &'a S, tree: &'a LocationTree, max_materialized_level: u32) -> Self {
        Self {
            schema,
            tree,
            max_materialized_level,
        }
    }

    /// Bitmasks stored for the named parents.
    ///
    /// A name shared by several nodes resolves to the lowest id; callers that
    /// know the ids should use [`Self::read_parents`].
    pub fn read<I, N>(&self, person: PersonId, parent_names: I) -> Result<HashMap<String, BigUint>, StorageError>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let mut ids = Vec::new();
        for name in parent_names {
            let name = name.as_ref();
            match self.tree.find_by_name(name) {
                Some(parent) => ids.push(parent.id),
                None => debug!(parent = %name, "Unknown parent name"),
            }
        }

        Ok(self
            .read_parents(person, &ids)?
            .into_iter()
            .filter_map(|(id, mask)| self.tree.get(id).map(|parent| (parent.name.clone(), mask)))
            .collect())
    }

    /// Bitmasks stored for the given parents, keyed by parent id.
    ///
    /// One row fetch per distinct grandparent table. Parents whose table, row
    /// or column is missing are left out of the result.
    pub fn read_parents(&self, person: PersonId, parent_ids: &[NodeId]) -> Result<HashMap<NodeId, BigUint>, StorageError> {
        let mut by_table: BTreeMap<String, Vec<(NodeId, String)>> = BTreeMap::new();
        for id in parent_ids {
            let Some(slot) = self.tree.bitmask_slot(*id) else {
                debug!(parent = id, "No storage slot for parent");
                continue;
            };
            by_table.entry(slot.table).or_default().push((*id, slot.column));
        }

        let mut masks = HashMap::new();
        for (table, parents) in by_table {
            if !self.schema.table_exists(&table)? {
                continue;
            }

            let row = match self.schema.person_row(&table, person) {
                Ok(Some(row)) => row,
                Ok(None) => continue,
                Err(e) => {
                    warn!(table = %table, person, error = %e, "Failed to read selection row");
                    continue;
                }
            };

            for (id, column) in parents {
                if let Some(raw) = row.get(&column) {
                    masks.insert(id, bitmask::normalize(raw));
                }
            }
        }

        Ok(masks)
    }

    /// Store one bitmask per parent. Each parent is written independently;
    /// a failure is logged and the remaining parents still go through.
    pub fn write(&self, person: PersonId, selections: &BTreeMap<NodeId, BTreeSet<ChildId>>) -> WriteSummary {
        let mut summary = WriteSummary::default();

        for (parent_id, child_ids) in selections {
            let Some(slot) = self.tree.bitmask_slot(*parent_id) else {
                debug!(parent = parent_id, "Parent has no grandparent; nothing to store");
                summary.skipped += 1;
                continue;
            };

            match self.schema.table_exists(&slot.table) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(table = %slot.table, "Selection table missing; skipping write");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(table = %slot.table, error = %e, "Failed to probe selection table");
                    summary.failed += 1;
                    continue;
                }
            }

            let mask = bitmask::encode(child_ids.iter().copied());
            let stored = StoredBitmask::from(&mask);
            match self.schema.upsert_bitmask(&slot.table, &slot.column, person, &stored) {
                Ok(()) => summary.written += 1,
                Err(e) => {
                    warn!(
                        table = %slot.table,
                        column = %slot.column,
                        person,
                        error = %e,
                        "Failed to write selection"
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Clear everything recorded below children of `parent_id` that are no
    /// longer selected.
    ///
    /// The parent's own table holds one column per child; a non-null column
    /// means that child had selections of its own. Columns of children missing
    /// from `now_selected` are cleared, then each such child's table is
    /// cleared for this person, and so on down the hierarchy.
    pub fn reset_unselected(
        &self,
        person: PersonId,
        parent_id: NodeId,
        now_selected: &BTreeSet<String>,
    ) -> Result<ResetSummary, StorageError> {
        let parent = self
            .tree
            .get(parent_id)
            .ok_or_else(|| StorageError::NotFound(format!("location {}", parent_id)))?;

        let mut summary = ResetSummary::default();

        let previous = match self.populated(&parent.name, person) {
            Ok(Some(columns)) => columns,
            Ok(None) => return Ok(summary),
            Err(e) => {
                warn!(table = %parent.name, person, error = %e, "Reset abandoned");
                summary.branches_abandoned += 1;
                return Ok(summary);
            }
        };
        summary.tables_visited += 1;

        let stale: Vec<String> = previous
            .into_iter()
            .filter(|column| !now_selected.contains(column))
            .collect();
        if stale.is_empty() {
            return Ok(summary);
        }

        if let Err(e) = self.schema.clear_columns(&parent.name, &stale, person) {
            warn!(table = %parent.name, person, error = %e, "Failed to clear deselected children");
            summary.branches_abandoned += 1;
            return Ok(summary);
        }
        summary.columns_cleared += stale.len() as u64;

        // One step per level below the parent; tables stop at the materialization level
        let max_depth = self.max_materialized_level + 1;
        let mut visited: HashSet<String> = HashSet::from([parent.name.clone()]);
        let mut worklist: VecDeque<(String, u32)> = stale.into_iter().map(|table| (table, 1)).collect();

        while let Some((table, depth)) = worklist.pop_front() {
            if depth > max_depth || !visited.insert(table.clone()) {
                continue;
            }

            let populated = match self.populated(&table, person) {
                Ok(Some(columns)) if !columns.is_empty() => columns,
                Ok(_) => continue,
                Err(e) => {
                    warn!(table = %table, person, error = %e, "Reset branch abandoned");
                    summary.branches_abandoned += 1;
                    continue;
                }
            };
            summary.tables_visited += 1;

            if let Err(e) = self.schema.clear_columns(&table, &populated, person) {
                warn!(table = %table, person, error = %e, "Reset branch abandoned");
                summary.branches_abandoned += 1;
                continue;
            }
            summary.columns_cleared += populated.len() as u64;

            worklist.extend(populated.into_iter().map(|column| (column, depth + 1)));
        }

        debug!(
            parent = parent_id,
            person,
            cleared = summary.columns_cleared,
            tables = summary.tables_visited,
            "Reset deselected children"
        );

        Ok(summary)
    }

    /// Populated columns of the person's row, or `None` if the table is missing
    fn populated(&self, table: &str, person: PersonId) -> Result<Option<Vec<String>>, StorageError> {
        if !self.schema.table_exists(table)? {
            return Ok(None);
        }
        Ok(Some(self.schema.populated_columns(table, person)?))
    }
}
