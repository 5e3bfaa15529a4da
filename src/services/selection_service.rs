//! Selection service - view, save and report flows
//!
//! Owns the shared database, the loaded taxonomy and the name type labels.
//! Every flow runs on the blocking pool and holds the connection lock only
//! for its own duration.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{self, LocationDb, NameTypeRow, ProvisionSummary, SqliteSchema};
use crate::error::StorageError;
use crate::input::{parse_anchor_ids, parse_selection, SelectionPayload};
use crate::report::report_paths;
use crate::store::{ResetSummary, SelectionStore, WriteSummary};
use crate::tree::{LocationNode, LocationTree};
use crate::view::{LocationViewRecord, SelectionViewBuilder};
use crate::PersonId;

/// Result of a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SaveOutcome {
    /// The payload ticked nothing; no storage was touched
    NothingSelected,
    #[serde(rename_all = "camelCase")]
    Saved {
        /// Anchors for the next view: the ticked children's location ids
        next_anchor_ids: String,
        written: WriteSummary,
        reset: ResetSummary,
    },
}

/// Result of a taxonomy import
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub locations: usize,
    pub name_types: usize,
    pub provision: ProvisionSummary,
}

/// Run a database operation on the blocking pool
async fn blocking<F, T>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Internal(format!("Blocking task failed: {}", e)))?
}

/// Replace the taxonomy and name types, then provision selection tables.
///
/// The taxonomy is validated before anything is written.
pub async fn import_taxonomy(
    db: Arc<LocationDb>,
    config: Arc<Config>,
    nodes: Vec<LocationNode>,
    name_types: Vec<NameTypeRow>,
) -> Result<ImportSummary, StorageError> {
    blocking(move || {
        let tree = LocationTree::build(nodes.clone(), &config.path_separator)?;

        let locations = db.with_conn_mut(|conn| db::locations::replace_locations(conn, &nodes))?;
        let name_types = db.with_conn_mut(|conn| db::locations::upsert_name_types(conn, &name_types))?;
        let provision = db.with_conn(|conn| {
            db::provision_selection_tables(conn, &tree, config.max_materialized_level)
        })?;

        info!(locations, name_types, created = provision.created, "Imported taxonomy");
        Ok(ImportSummary {
            locations,
            name_types,
            provision,
        })
    })
    .await
}

/// Selection service for business logic
#[derive(Clone)]
pub struct SelectionService {
    db: Arc<LocationDb>,
    tree: Arc<LocationTree>,
    labels: Arc<HashMap<i64, String>>,
    config: Arc<Config>,
}

impl SelectionService {
    pub fn new(
        db: Arc<LocationDb>,
        tree: Arc<LocationTree>,
        labels: Arc<HashMap<i64, String>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            tree,
            labels,
            config,
        }
    }

    /// Load the taxonomy and labels stored in `db`
    pub async fn load(db: Arc<LocationDb>, config: Arc<Config>) -> Result<Self, StorageError> {
        let (tree, labels) = {
            let db = db.clone();
            let separator = config.path_separator.clone();
            blocking(move || {
                db.with_conn(|conn| {
                    Ok((db::load_tree(conn, &separator)?, db::name_type_labels(conn)?))
                })
            })
            .await?
        };

        debug!(nodes = tree.len(), labels = labels.len(), "Loaded selection service");
        Ok(Self::new(db, Arc::new(tree), Arc::new(labels), config))
    }

    pub fn tree(&self) -> &LocationTree {
        &self.tree
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Children of each anchor with their selection flags
    pub async fn view(&self, person: PersonId, anchors: Option<String>) -> Result<Vec<LocationViewRecord>, StorageError> {
        let service = self.clone();
        blocking(move || {
            let anchor_ids = parse_anchor_ids(anchors.as_deref(), service.config.default_anchor_id);
            service.db.with_conn(|conn| {
                let schema = SqliteSchema::new(conn);
                SelectionViewBuilder::new(&schema, &service.tree, &service.labels, &service.config)
                    .build(person, &anchor_ids)
            })
        })
        .await
    }

    /// Every selected hierarchy path, sorted
    pub async fn report(&self, person: PersonId) -> Result<Vec<String>, StorageError> {
        let service = self.clone();
        blocking(move || {
            service.db.with_conn(|conn| {
                let schema = SqliteSchema::new(conn);
                report_paths(&schema, &service.tree, &service.config, person)
            })
        })
        .await
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Store a selection payload.
    ///
    /// For each parent in the payload, branches below children that are no
    /// longer ticked are cleared first, then the parent's bitmask is written.
    pub async fn save(&self, person: PersonId, payload: Option<SelectionPayload>) -> Result<SaveOutcome, StorageError> {
        let Some(parsed) = parse_selection(payload.as_ref(), &self.config.token_delimiter)? else {
            debug!(person, "Nothing selected; storage untouched");
            return Ok(SaveOutcome::NothingSelected);
        };

        parsed.validate(&self.tree)?;

        let service = self.clone();
        blocking(move || {
            let selections = parsed.child_ids();

            let (written, reset) = service.db.with_conn(|conn| {
                let schema = SqliteSchema::new(conn);
                let store = SelectionStore::new(&schema, &service.tree, service.config.max_materialized_level);

                let mut reset = ResetSummary::default();
                for (parent_id, child_ids) in &selections {
                    let now_selected: BTreeSet<String> = service
                        .tree
                        .children_of(*parent_id)
                        .filter(|child| child_ids.contains(&child.child_id))
                        .map(|child| child.name.clone())
                        .collect();
                    let summary = store.reset_unselected(person, *parent_id, &now_selected)?;
                    reset.columns_cleared += summary.columns_cleared;
                    reset.tables_visited += summary.tables_visited;
                    reset.branches_abandoned += summary.branches_abandoned;
                }

                Ok((store.write(person, &selections), reset))
            })?;

            info!(
                person,
                written = written.written,
                skipped = written.skipped,
                failed = written.failed,
                cleared = reset.columns_cleared,
                "Saved selection"
            );

            Ok(SaveOutcome::Saved {
                next_anchor_ids: parsed.next_anchor_ids(),
                written,
                reset,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_db, sample_name_types, sample_nodes};

    fn payload(entries: &[(i64, &[&str])]) -> SelectionPayload {
        entries
            .iter()
            .map(|(parent, tokens)| (*parent, tokens.iter().map(|t| t.to_string()).collect()))
            .collect()
    }

    async fn service() -> SelectionService {
        let (db, _tree) = sample_db();
        SelectionService::load(Arc::new(db), Arc::new(Config::default())).await.unwrap()
    }

    #[tokio::test]
    async fn test_save_then_view_and_report() {
        let service = service().await;

        let outcome = service
            .save(1, Some(payload(&[(1, &["0|2"]), (2, &["0|4"]), (4, &["1|8"])])))
            .await
            .unwrap();
        let SaveOutcome::Saved { next_anchor_ids, written, .. } = outcome else {
            panic!("expected a save");
        };
        assert_eq!(next_anchor_ids, "2,4,8");
        assert_eq!(written.written, 3);

        let records = service.view(1, Some(next_anchor_ids)).await.unwrap();
        let selected: Vec<_> = records
            .iter()
            .filter(|r| r.is_selected)
            .map(|r| r.child_name.as_str())
            .collect();
        assert_eq!(selected, vec!["Japan", "Osaka"]);

        let report = service.report(1).await.unwrap();
        assert_eq!(report, vec!["ContinentGrandparent > ContinentParent > Asia > Japan > Osaka"]);
    }

    #[tokio::test]
    async fn test_save_nothing_selected() {
        let service = service().await;
        assert_eq!(service.save(1, None).await.unwrap(), SaveOutcome::NothingSelected);
        assert_eq!(
            service.save(1, Some(payload(&[(2, &["", ""])]))).await.unwrap(),
            SaveOutcome::NothingSelected
        );
        assert!(service.report(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_bad_input() {
        let service = service().await;
        assert!(matches!(
            service.save(1, Some(payload(&[(2, &["zero|4"])]))).await,
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            service.save(1, Some(payload(&[(999, &["0|4"])]))).await,
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_foreign_child_before_writing() {
        let service = service().await;
        let result = service
            .save(1, Some(payload(&[(2, &["0|4"]), (4, &["200|8"])])))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));

        // The valid parent in the same payload was not written either
        let view = service.view(1, Some("2".into())).await.unwrap();
        assert!(view.iter().all(|r| !r.is_selected));
    }

    #[tokio::test]
    async fn test_resave_clears_deselected_branch() {
        let service = service().await;
        service
            .save(
                1,
                Some(payload(&[(1, &["0|2"]), (2, &["0|4"]), (4, &["0|7"]), (7, &["0|9"]), (9, &["1|12"])])),
            )
            .await
            .unwrap();
        assert_eq!(
            service.report(1).await.unwrap(),
            vec!["ContinentGrandparent > ContinentParent > Asia > Japan > Tokyo Metropolis > Shinjuku > Nishi-Shinjuku"]
        );

        // Japan now has only Osaka ticked; everything under Tokyo goes
        let outcome = service.save(1, Some(payload(&[(4, &["1|8"])]))).await.unwrap();
        let SaveOutcome::Saved { reset, .. } = outcome else {
            panic!("expected a save");
        };
        assert!(reset.columns_cleared >= 2);

        let view = service.view(1, Some("7".into())).await.unwrap();
        assert!(view.iter().all(|r| !r.is_selected));
    }

    #[tokio::test]
    async fn test_import_taxonomy_rejects_invalid_tree() {
        let db = Arc::new(LocationDb::open_in_memory().unwrap());
        let config = Arc::new(Config::default());

        let mut nodes = sample_nodes();
        nodes[4].level = 9;
        let result = import_taxonomy(db.clone(), config.clone(), nodes, sample_name_types()).await;
        assert!(matches!(result, Err(StorageError::Taxonomy(_))));
        assert_eq!(db.stats().unwrap().location_count, 0);

        let summary = import_taxonomy(db.clone(), config, sample_nodes(), sample_name_types())
            .await
            .unwrap();
        assert_eq!(summary.locations, 14);
        assert_eq!(summary.provision.created, 9);
    }
}
