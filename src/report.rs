//! Rebuild the set of paths a person has selected
//!
//! Walks the selection tables breadth-first from the taxonomy roots. In a
//! table named after node `T`, the column for child `c` says what was picked
//! below `c`:
//!
//! - null or absent: `c` was picked with nothing below it if `T`'s own mask
//!   has `c`'s bit set, otherwise `c` was not picked
//! - zero: `c` was picked with nothing below it, so its path is reported
//! - non-zero above the leaf-parent level: descend into the table named `c`
//! - non-zero at the leaf-parent level: the set bits name the picked leaves

use std::collections::{BTreeSet, HashSet, VecDeque};

use num_bigint::BigUint;
use tracing::debug;

use crate::bitmask;
use crate::cache::HierarchyCache;
use crate::config::Config;
use crate::db::SchemaCapability;
use crate::error::StorageError;
use crate::tree::{LocationNode, LocationTree, NodeId};
use crate::PersonId;

/// Table still to visit
#[derive(Debug, Clone)]
struct WorkItem {
    /// Node the table is named after
    node: NodeId,
    table: String,
    /// Which children the node's parent recorded as picked; unknown for roots
    picked: Option<BigUint>,
}

pub struct PathReconstructor<'a, S: SchemaCapability> {
    schema: &'a S,
    tree: &'a LocationTree,
    leaf_parent_level: u32,
}

impl<'a, S: SchemaCapability> PathReconstructor<'a, S> {
    /// Hierarchy paths come from `tree`, so its separator is the one reported
    pub fn new(schema: &'a S, tree: &'a LocationTree, leaf_parent_level: u32) -> Self {
        Self {
            schema,
            tree,
            leaf_parent_level,
        }
    }

    pub fn from_config(schema: &'a S, tree: &'a LocationTree, config: &Config) -> Self {
        Self::new(schema, tree, config.leaf_parent_level())
    }

    /// Every selected path for `person`, deduplicated and sorted
    pub fn reconstruct(&self, person: PersonId) -> Result<BTreeSet<String>, StorageError> {
        let mut cache = HierarchyCache::build(self.schema, self.tree, person, self.leaf_parent_level)?;
        let mut paths = BTreeSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<WorkItem> = VecDeque::new();

        for root in self.tree.roots() {
            if visited.insert(root.name.clone()) {
                queue.push_back(WorkItem {
                    node: root.id,
                    table: root.name.clone(),
                    picked: None,
                });
            }
        }

        while let Some(item) = queue.pop_front() {
            let Some(columns) = cache.columns(&item.table).map(<[String]>::to_vec) else {
                continue;
            };
            let row = cache.row(&item.table).cloned().unwrap_or_default();

            for column in columns {
                let Some(child) = self.child_named(item.node, &column) else {
                    debug!(table = %item.table, column = %column, "Column has no matching location");
                    continue;
                };

                let Some(raw) = row.get(&column).filter(|raw| !raw.is_null()) else {
                    let picked = item
                        .picked
                        .as_ref()
                        .is_some_and(|mask| bitmask::test(mask, child.child_id));
                    if picked {
                        paths.extend(cache.path(child.id).map(str::to_string));
                    }
                    continue;
                };

                let mask = bitmask::normalize(raw);

                if bitmask::is_zero(&mask) {
                    paths.extend(cache.path(child.id).map(str::to_string));
                } else if child.level < self.leaf_parent_level {
                    if visited.insert(child.name.clone()) {
                        queue.push_back(WorkItem {
                            node: child.id,
                            table: child.name.clone(),
                            picked: Some(mask),
                        });
                    }
                } else {
                    let leaves = cache.leaf_children(child.id);
                    for leaf in bitmask::decode(&mask, leaves, |leaf| leaf.child_id) {
                        paths.extend(cache.path(leaf.id).map(str::to_string));
                    }
                }
            }
        }

        debug!(person, paths = paths.len(), tables = visited.len(), "Reconstructed selection paths");
        Ok(paths)
    }

    fn child_named(&self, parent: NodeId, name: &str) -> Option<&'a LocationNode> {
        self.tree.children_of(parent).find(|child| child.name == name)
    }
}

/// Selected paths for `person` as a sorted list
pub fn report_paths<S: SchemaCapability>(
    schema: &S,
    tree: &LocationTree,
    config: &Config,
    person: PersonId,
) -> Result<Vec<String>, StorageError> {
    Ok(PathReconstructor::from_config(schema, tree, config)
        .reconstruct(person)?
        .into_iter()
        .collect())
}
