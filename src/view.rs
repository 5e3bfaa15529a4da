//! Child listings with selection flags
//!
//! For every anchor (a parent node) the view lists the anchor's children and
//! whether each one is ticked in the person's stored bitmask for the anchor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitmask;
use crate::config::Config;
use crate::db::SchemaCapability;
use crate::error::StorageError;
use crate::store::SelectionStore;
use crate::tree::{LocationNode, LocationTree, NodeId};
use crate::PersonId;

/// One child row of the selection view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationViewRecord {
    pub child_id: bitmask::ChildId,
    pub child_location_id: NodeId,
    pub child_name: String,
    pub parent_id: NodeId,
    pub parent_name: String,
    pub type_label: String,
    pub is_selected: bool,
    pub person_id: PersonId,
}

pub struct SelectionViewBuilder<'a, S: SchemaCapability> {
    store: SelectionStore<'a, S>,
    tree: &'a LocationTree,
    labels: &'a HashMap<i64, String>,
    unknown_label: &'a str,
}

impl<'a, S: SchemaCapability> SelectionViewBuilder<'a, S> {
    pub fn new(
        schema: &'a S,
        tree: &'a LocationTree,
        labels: &'a HashMap<i64, String>,
        config: &'a Config,
    ) -> Self {
        Self {
            store: SelectionStore::new(schema, tree, config.max_materialized_level),
            tree,
            labels,
            unknown_label: &config.unknown_type_label,
        }
    }

    /// Records for every child of every anchor, in anchor order then `ChildId`.
    /// Anchors without a grandparent, or unknown ids, contribute nothing.
    pub fn build(&self, person: PersonId, anchors: &[NodeId]) -> Result<Vec<LocationViewRecord>, StorageError> {
        let parents: Vec<&LocationNode> = anchors
            .iter()
            .filter_map(|id| {
                let parent = self.tree.get(*id);
                if parent.is_none() {
                    debug!(anchor = id, "Unknown anchor id");
                }
                parent
            })
            .filter(|parent| self.tree.bitmask_slot(parent.id).is_some())
            .collect();

        if parents.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<NodeId> = parents.iter().map(|parent| parent.id).collect();
        let masks = self.store.read_parents(person, &ids)?;

        let mut records = Vec::new();
        for parent in parents {
            let mask = masks.get(&parent.id);
            for child in self.tree.children_of(parent.id) {
                records.push(LocationViewRecord {
                    child_id: child.child_id,
                    child_location_id: child.id,
                    child_name: child.name.clone(),
                    parent_id: parent.id,
                    parent_name: parent.name.clone(),
                    type_label: self.type_label(child),
                    is_selected: mask.is_some_and(|mask| bitmask::test(mask, child.child_id)),
                    person_id: person,
                });
            }
        }

        Ok(records)
    }

    fn type_label(&self, node: &LocationNode) -> String {
        node.name_type_id
            .and_then(|id| self.labels.get(&id))
            .cloned()
            .unwrap_or_else(|| self.unknown_label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, LocationDb, SqliteSchema};
    use crate::testing::{node, sample_db};
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_view_flags_selected_children() {
        let (db, tree) = sample_db();
        let labels = db.with_conn(db::name_type_labels).unwrap();
        let config = Config::default();

        db.with_conn(|conn| {
            let schema = SqliteSchema::new(conn);
            SelectionStore::new(&schema, &tree, 5).write(9, &BTreeMap::from([(4, BTreeSet::from([1]))]));

            let view = SelectionViewBuilder::new(&schema, &tree, &labels, &config);
            let records = view.build(9, &[4, 1])?;

            let summary: Vec<_> = records
                .iter()
                .map(|r| (r.parent_name.as_str(), r.child_name.as_str(), r.is_selected))
                .collect();
            assert_eq!(
                summary,
                vec![
                    ("Japan", "Tokyo Metropolis", false),
                    ("Japan", "Osaka", true),
                    ("ContinentParent", "Asia", false),
                    ("ContinentParent", "Europe", false),
                ]
            );
            assert_eq!(records[0].type_label, "Prefecture");
            assert_eq!(records[2].type_label, "Continent");
            assert!(records.iter().all(|r| r.person_id == 9));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unknown_type_label_and_anchors() {
        let (db, tree) = sample_db();
        let labels = db.with_conn(db::name_type_labels).unwrap();
        let config = Config::default();

        db.with_conn(|conn| {
            let schema = SqliteSchema::new(conn);
            let view = SelectionViewBuilder::new(&schema, &tree, &labels, &config);

            // Shinjuku's leaves carry a name type with no label
            let records = view.build(1, &[9])?;
            assert_eq!(records.len(), 2);
            assert!(records.iter().all(|r| r.type_label == "Unknown NameType"));
            assert_eq!(records[1].child_location_id, 12);

            // The root has no grandparent and 404 does not exist
            assert!(view.build(1, &[100, 404])?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_same_named_parents_read_their_own_tables() {
        // Two towns called Springfield, one per state
        let nodes = vec![
            node(1, "Country", None, 0, 1),
            node(2, "StateA", Some(1), 0, 2),
            node(3, "StateB", Some(1), 1, 2),
            node(4, "Springfield", Some(2), 0, 3),
            node(5, "Springfield", Some(3), 0, 3),
            node(6, "ElmA", Some(4), 0, 4),
            node(7, "ElmB", Some(5), 0, 4),
        ];
        let db = LocationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| db::locations::replace_locations(conn, &nodes)).unwrap();
        let tree = db.with_conn(|conn| db::load_tree(conn, " > ")).unwrap();
        db.with_conn(|conn| db::provision_selection_tables(conn, &tree, 5)).unwrap();
        let labels = HashMap::new();
        let config = Config::default();

        db.with_conn(|conn| {
            let schema = SqliteSchema::new(conn);
            let summary = SelectionStore::new(&schema, &tree, 5).write(1, &BTreeMap::from([(5, BTreeSet::from([0]))]));
            assert_eq!(summary.written, 1);

            let view = SelectionViewBuilder::new(&schema, &tree, &labels, &config);
            let flags: Vec<_> = view
                .build(1, &[5, 4])?
                .iter()
                .map(|r| (r.child_name.clone(), r.is_selected))
                .collect();
            assert_eq!(flags, vec![("ElmB".to_string(), true), ("ElmA".to_string(), false)]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = LocationViewRecord {
            child_id: 0,
            child_location_id: 4,
            child_name: "Japan".into(),
            parent_id: 2,
            parent_name: "Asia".into(),
            type_label: "Country".into(),
            is_selected: true,
            person_id: 1,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["childLocationId"], 4);
        assert_eq!(json["isSelected"], true);
        assert_eq!(json["typeLabel"], "Country");
    }
}
