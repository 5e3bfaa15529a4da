//! Parsing of anchor selectors and selection payloads

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitmask::ChildId;
use crate::error::StorageError;
use crate::tree::{LocationTree, NodeId};

/// Raw selection payload: parent id to `childId|childLocationId` tokens
pub type SelectionPayload = BTreeMap<NodeId, Vec<String>>;

/// Anchor ids from a comma-separated list. Unparsable entries are ignored and
/// duplicates dropped; an empty selector falls back to `default_anchor`.
pub fn parse_anchor_ids(raw: Option<&str>, default_anchor: NodeId) -> Vec<NodeId> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return vec![default_anchor];
    }

    let mut seen = BTreeSet::new();
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            match part.parse::<NodeId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    if !part.is_empty() {
                        debug!(anchor = %part, "Ignoring unparsable anchor id");
                    }
                    None
                }
            }
        })
        .filter(|id| seen.insert(*id))
        .collect()
}

/// One ticked child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedChild {
    pub child_id: ChildId,
    pub child_location_id: NodeId,
}

impl SelectedChild {
    fn parse(token: &str, delimiter: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidInput(format!("malformed selection token '{}'", token));
        let (child_id, location_id) = token.split_once(delimiter).ok_or_else(invalid)?;
        Ok(Self {
            child_id: child_id.trim().parse().map_err(|_| invalid())?,
            child_location_id: location_id.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Validated payload, grouped by parent. A parent with no ticked children
/// stays in the map so its bitmask is written as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSelection {
    pub parents: BTreeMap<NodeId, Vec<SelectedChild>>,
}

impl ParsedSelection {
    /// Child ids per parent, ready for [`crate::store::SelectionStore::write`]
    pub fn child_ids(&self) -> BTreeMap<NodeId, BTreeSet<ChildId>> {
        self.parents
            .iter()
            .map(|(parent, children)| (*parent, children.iter().map(|c| c.child_id).collect()))
            .collect()
    }

    /// Check every parent exists and every token names one of its children
    /// at the right bit position
    pub fn validate(&self, tree: &LocationTree) -> Result<(), StorageError> {
        for (parent_id, children) in &self.parents {
            if tree.get(*parent_id).is_none() {
                return Err(StorageError::InvalidInput(format!("unknown parent location {}", parent_id)));
            }

            for selected in children {
                let known = tree
                    .get(selected.child_location_id)
                    .filter(|child| child.parent_id == Some(*parent_id))
                    .is_some_and(|child| child.child_id == selected.child_id);
                if !known {
                    return Err(StorageError::InvalidInput(format!(
                        "location {} with child id {} is not a child of {}",
                        selected.child_location_id, selected.child_id, parent_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Comma-joined child location ids, used as the anchors of the next view
    pub fn next_anchor_ids(&self) -> String {
        self.parents
            .values()
            .flatten()
            .map(|child| child.child_location_id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse a selection payload.
///
/// Returns `Ok(None)` when nothing is selected at all: no payload, or only
/// empty tokens. A token that is not `childId<delimiter>childLocationId` is
/// an [`StorageError::InvalidInput`].
pub fn parse_selection(
    payload: Option<&SelectionPayload>,
    delimiter: &str,
) -> Result<Option<ParsedSelection>, StorageError> {
    let Some(payload) = payload else {
        return Ok(None);
    };

    let any_token = payload
        .values()
        .flatten()
        .any(|token| !token.trim().is_empty());
    if !any_token {
        return Ok(None);
    }

    let mut parents = BTreeMap::new();
    for (parent, tokens) in payload {
        let children = tokens
            .iter()
            .map(|token| token.trim())
            .filter(|token| !token.is_empty())
            .map(|token| SelectedChild::parse(token, delimiter))
            .collect::<Result<Vec<_>, _>>()?;
        parents.insert(*parent, children);
    }

    Ok(Some(ParsedSelection { parents }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: &[(NodeId, &[&str])]) -> SelectionPayload {
        entries
            .iter()
            .map(|(parent, tokens)| (*parent, tokens.iter().map(|t| t.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_anchor_ids() {
        assert_eq!(parse_anchor_ids(None, 1), vec![1]);
        assert_eq!(parse_anchor_ids(Some("  "), 1), vec![1]);
        assert_eq!(parse_anchor_ids(Some("4, 2,x,,4"), 1), vec![4, 2]);
        assert!(parse_anchor_ids(Some("x,y"), 1).is_empty());
    }

    #[test]
    fn test_nothing_selected() {
        assert_eq!(parse_selection(None, "|").unwrap(), None);
        assert_eq!(parse_selection(Some(&SelectionPayload::new()), "|").unwrap(), None);
        assert_eq!(parse_selection(Some(&payload(&[(2, &["", " "]), (3, &[])])), "|").unwrap(), None);
    }

    #[test]
    fn test_parse_groups_by_parent() {
        let parsed = parse_selection(Some(&payload(&[(2, &["0|4", "1|5"]), (3, &[""])])), "|")
            .unwrap()
            .unwrap();

        let ids = parsed.child_ids();
        assert_eq!(ids[&2], BTreeSet::from([0, 1]));
        // Parent with nothing ticked is kept so it is written as zero
        assert!(ids[&3].is_empty());
        assert_eq!(parsed.next_anchor_ids(), "4,5");
    }

    #[test]
    fn test_validate_against_tree() {
        fn parse(entries: &[(NodeId, &[&str])]) -> ParsedSelection {
            parse_selection(Some(&payload(entries)), "|").unwrap().unwrap()
        }
        let tree = crate::testing::sample_tree();

        assert!(parse(&[(2, &["0|4", "1|5"]), (4, &["1|8"])]).validate(&tree).is_ok());

        // Unknown parent, bit outside the family, location under another parent,
        // and a bit that belongs to a sibling
        for bad in [
            parse(&[(999, &["0|4"])]),
            parse(&[(4, &["200|8"])]),
            parse(&[(4, &["4294967295|8"])]),
            parse(&[(2, &["0|7"])]),
            parse(&[(4, &["0|8"])]),
        ] {
            assert!(matches!(bad.validate(&tree), Err(StorageError::InvalidInput(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_malformed_token_is_invalid_input() {
        for bad in ["7", "a|4", "0|b", "0;4"] {
            let result = parse_selection(Some(&payload(&[(2, &[bad])])), "|");
            assert!(matches!(result, Err(StorageError::InvalidInput(_))), "token {bad:?}");
        }
    }
}
