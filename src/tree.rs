//! In-memory location taxonomy
//!
//! Built once from the `Locations` table and read-only afterwards. Besides
//! plain navigation the tree owns the storage indirection: a node's selection
//! bit is recorded two levels up, in the table named after its grandparent and
//! the column named after its parent.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bitmask::ChildId;
use crate::error::StorageError;

/// Global location identifier
pub type NodeId = i64;

/// One entry of the taxonomy (continent, country, ..., leaf station)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocationNode {
    pub id: NodeId,
    /// Display label, also the physical table/column name
    pub name: String,
    #[serde(default)]
    pub name_type_id: Option<i64>,
    /// Declared column type when this node is materialized as a column
    #[serde(rename = "Type", default = "default_storage_type")]
    pub storage_type: String,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    /// Bit position inside the parent's bitmask
    pub child_id: ChildId,
    pub level: u32,
}

fn default_storage_type() -> String {
    "int".to_string()
}

/// Physical location of one bitmask
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageSlot {
    pub table: String,
    pub column: String,
}

/// Read-only taxonomy with precomputed children and hierarchy paths
#[derive(Debug, Clone)]
pub struct LocationTree {
    nodes: HashMap<NodeId, LocationNode>,
    /// Child ids per parent, ordered by `ChildId`
    children: HashMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
    paths: HashMap<NodeId, String>,
}

impl LocationTree {
    /// Build the tree, validating ids, parents, sibling bit positions and levels.
    ///
    /// Levels must grow by exactly one from parent to child, which also rules
    /// out cycles in the parent links.
    pub fn build(nodes: Vec<LocationNode>, separator: &str) -> Result<Self, StorageError> {
        let mut by_id: HashMap<NodeId, LocationNode> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if by_id.contains_key(&node.id) {
                return Err(StorageError::Taxonomy(format!("duplicate location id {}", node.id)));
            }
            by_id.insert(node.id, node);
        }

        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut roots = Vec::new();

        for node in by_id.values() {
            let Some(parent_id) = node.parent_id else {
                roots.push(node.id);
                continue;
            };

            let parent = by_id.get(&parent_id).ok_or_else(|| {
                StorageError::Taxonomy(format!(
                    "location {} references unknown parent {}",
                    node.id, parent_id
                ))
            })?;

            if node.level != parent.level + 1 {
                return Err(StorageError::Taxonomy(format!(
                    "location {} has level {} but its parent {} has level {}",
                    node.id, node.level, parent.id, parent.level
                )));
            }

            children.entry(parent_id).or_default().push(node.id);
        }

        roots.sort_unstable();

        for (parent_id, ids) in children.iter_mut() {
            ids.sort_by_key(|id| (by_id[id].child_id, *id));
            if let Some(pair) = ids
                .windows(2)
                .find(|pair| by_id[&pair[0]].child_id == by_id[&pair[1]].child_id)
            {
                return Err(StorageError::Taxonomy(format!(
                    "locations {} and {} share child id {} under parent {}",
                    pair[0], pair[1], by_id[&pair[0]].child_id, parent_id
                )));
            }
        }

        let mut ordered: Vec<&LocationNode> = by_id.values().collect();
        ordered.sort_by_key(|node| node.id);
        let mut by_name = HashMap::with_capacity(ordered.len());
        for node in ordered {
            if let Some(existing) = by_name.get(&node.name) {
                warn!(
                    name = %node.name,
                    kept = *existing,
                    ignored = node.id,
                    "Duplicate location name; table lookups use the lowest id"
                );
                continue;
            }
            by_name.insert(node.name.clone(), node.id);
        }

        let mut paths = HashMap::with_capacity(by_id.len());
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for root in &roots {
            paths.insert(*root, by_id[root].name.clone());
            queue.push_back(*root);
        }
        while let Some(id) = queue.pop_front() {
            let Some(kids) = children.get(&id) else {
                continue;
            };
            let prefix = paths[&id].clone();
            for kid in kids {
                paths.insert(*kid, format!("{}{}{}", prefix, separator, by_id[kid].name));
                queue.push_back(*kid);
            }
        }

        debug!(nodes = by_id.len(), roots = roots.len(), "Built location tree");

        Ok(Self {
            nodes: by_id,
            children,
            roots,
            by_name,
            paths,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&LocationNode> {
        self.nodes.get(&id)
    }

    /// All nodes ordered by level, then id
    pub fn nodes(&self) -> Vec<&LocationNode> {
        let mut nodes: Vec<&LocationNode> = self.nodes.values().collect();
        nodes.sort_by_key(|node| (node.level, node.id));
        nodes
    }

    /// Nodes without a parent, ordered by id
    pub fn roots(&self) -> impl Iterator<Item = &LocationNode> + '_ {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&LocationNode> {
        self.by_name.get(name).and_then(|id| self.nodes.get(id))
    }

    pub fn parent_of(&self, id: NodeId) -> Option<&LocationNode> {
        self.get(id)?.parent_id.and_then(|pid| self.nodes.get(&pid))
    }

    pub fn grandparent_of(&self, id: NodeId) -> Option<&LocationNode> {
        self.parent_of(id).and_then(|parent| self.parent_of(parent.id))
    }

    /// Direct children ordered by `ChildId`
    pub fn children_of(&self, id: NodeId) -> impl Iterator<Item = &LocationNode> + '_ {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.nodes.get(child))
    }

    pub fn level_of(&self, id: NodeId) -> Option<u32> {
        self.get(id).map(|node| node.level)
    }

    /// Root-to-node label path
    pub fn hierarchy_path(&self, id: NodeId) -> Option<&str> {
        self.paths.get(&id).map(String::as_str)
    }

    /// Bits needed to store the selection of `id`'s children
    pub fn child_bit_width(&self, id: NodeId) -> u64 {
        self.children_of(id)
            .map(|child| u64::from(child.child_id) + 1)
            .max()
            .unwrap_or(0)
    }

    /// Where the bitmask of `parent_id`'s children is stored: the column named
    /// after the parent, in the table named after the parent's own parent.
    pub fn bitmask_slot(&self, parent_id: NodeId) -> Option<StorageSlot> {
        let parent = self.get(parent_id)?;
        let grandparent = self.parent_of(parent_id)?;
        Some(StorageSlot {
            table: grandparent.name.clone(),
            column: parent.name.clone(),
        })
    }

    /// Where `node_id`'s own selection bit is stored
    pub fn resolve_table_column(&self, node_id: NodeId) -> Option<StorageSlot> {
        let parent = self.parent_of(node_id)?;
        self.bitmask_slot(parent.id)
    }
}
