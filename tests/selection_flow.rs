//! Integration tests for the import, save, view and report flows
//!
//! Each test works on a file-backed database in a temporary directory and
//! reopens it where persistence matters.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;
use visitlog_store::db::locations::{load_locations_file, load_name_types_file};
use visitlog_store::input::SelectionPayload;
use visitlog_store::services::import_taxonomy;
use visitlog_store::{Config, LocationDb, SaveOutcome, SelectionService};

const TAXONOMY: &str = r#"[
    {"Id": 100, "Name": "ContinentGrandparent", "ParentId": null, "ChildId": 0, "Level": 1},
    {"Id": 1, "Name": "ContinentParent", "ParentId": 100, "ChildId": 0, "Level": 2},
    {"Id": 2, "Name": "Asia", "NameTypeId": 1, "ParentId": 1, "ChildId": 0, "Level": 3},
    {"Id": 3, "Name": "Europe", "NameTypeId": 1, "ParentId": 1, "ChildId": 1, "Level": 3},
    {"Id": 4, "Name": "Japan", "NameTypeId": 2, "ParentId": 2, "ChildId": 0, "Level": 4},
    {"Id": 6, "Name": "France", "NameTypeId": 2, "ParentId": 3, "ChildId": 0, "Level": 4},
    {"Id": 7, "Name": "Tokyo Metropolis", "NameTypeId": 3, "ParentId": 4, "ChildId": 0, "Level": 5},
    {"Id": 8, "Name": "Osaka", "NameTypeId": 3, "ParentId": 4, "ChildId": 1, "Level": 5},
    {"Id": 9, "Name": "Shinjuku", "NameTypeId": 4, "ParentId": 7, "ChildId": 0, "Level": 6},
    {"Id": 11, "Name": "Kabukicho", "ParentId": 9, "ChildId": 0, "Level": 7},
    {"Id": 12, "Name": "Nishi-Shinjuku", "ParentId": 9, "ChildId": 1, "Level": 7}
]"#;

const NAME_TYPES: &str = r#"[
    {"NameTypeId": 1, "Name": "Continent"},
    {"NameTypeId": 2, "Name": "Country"},
    {"NameTypeId": 3, "Name": "Prefecture"},
    {"NameTypeId": 4, "Name": "Ward"}
]"#;

/// Write the fixture files and import them into a fresh storage directory
async fn setup() -> (TempDir, Arc<Config>) {
    let temp_dir = TempDir::new().unwrap();
    let taxonomy_path = temp_dir.path().join("locations.json");
    let name_types_path = temp_dir.path().join("name_types.json");
    std::fs::write(&taxonomy_path, TAXONOMY).unwrap();
    std::fs::write(&name_types_path, NAME_TYPES).unwrap();

    let mut config = Config::default();
    config.storage_dir = temp_dir.path().to_path_buf();
    let config = Arc::new(config);

    let db = Arc::new(LocationDb::open(&config.database_path()).unwrap());
    let summary = import_taxonomy(
        db,
        config.clone(),
        load_locations_file(&taxonomy_path).unwrap(),
        load_name_types_file(&name_types_path).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(summary.locations, 11);
    assert_eq!(summary.name_types, 4);
    assert!(summary.provision.errors.is_empty());

    (temp_dir, config)
}

async fn open_service(config: &Arc<Config>) -> SelectionService {
    let db = Arc::new(LocationDb::open(&config.database_path()).unwrap());
    SelectionService::load(db, config.clone()).await.unwrap()
}

fn payload(entries: &[(i64, &[&str])]) -> SelectionPayload {
    entries
        .iter()
        .map(|(parent, tokens)| (*parent, tokens.iter().map(|t| t.to_string()).collect()))
        .collect::<BTreeMap<_, _>>()
}

#[tokio::test]
async fn test_walkthrough_from_root_to_leaves() {
    let (_temp, config) = setup().await;
    let service = open_service(&config).await;

    // First page: the default anchor lists the continents
    let first = service.view(1, None).await.unwrap();
    let names: Vec<_> = first.iter().map(|r| r.child_name.as_str()).collect();
    assert_eq!(names, vec!["Asia", "Europe"]);
    assert!(first.iter().all(|r| !r.is_selected));
    assert_eq!(first[0].type_label, "Continent");

    let mut anchors = None;
    for step in [
        payload(&[(1, &["0|2"])]),
        payload(&[(2, &["0|4"])]),
        payload(&[(4, &["0|7", "1|8"])]),
        payload(&[(7, &["0|9"])]),
        payload(&[(9, &["1|12"])]),
    ] {
        match service.save(1, Some(step)).await.unwrap() {
            SaveOutcome::Saved { next_anchor_ids, written, .. } => {
                assert_eq!(written.failed, 0);
                anchors = Some(next_anchor_ids);
            }
            SaveOutcome::NothingSelected => panic!("expected a save"),
        }
    }
    assert_eq!(anchors.as_deref(), Some("12"));

    // Reopen to make sure everything was persisted
    let service = open_service(&config).await;
    assert_eq!(
        service.report(1).await.unwrap(),
        vec![
            "ContinentGrandparent > ContinentParent > Asia > Japan > Osaka",
            "ContinentGrandparent > ContinentParent > Asia > Japan > Tokyo Metropolis > Shinjuku > Nishi-Shinjuku",
        ]
    );

    let leaves = service.view(1, Some("9".into())).await.unwrap();
    let selected: Vec<_> = leaves.iter().filter(|r| r.is_selected).map(|r| r.child_location_id).collect();
    assert_eq!(selected, vec![12]);
    assert_eq!(leaves[0].type_label, "Unknown NameType");
}

#[tokio::test]
async fn test_deselecting_prunes_report() {
    let (_temp, config) = setup().await;
    let service = open_service(&config).await;

    service
        .save(
            5,
            Some(payload(&[(1, &["0|2", "1|3"]), (2, &["0|4"]), (3, &["0|6"]), (4, &["0|7"]), (7, &["0|9"])])),
        )
        .await
        .unwrap();
    let before = service.report(5).await.unwrap();
    assert!(before.iter().any(|p| p.ends_with("Tokyo Metropolis > Shinjuku")));
    assert!(before.iter().any(|p| p.ends_with("Europe > France")));

    // Untick Asia; Europe stays
    service.save(5, Some(payload(&[(1, &["1|3"])]))).await.unwrap();
    assert_eq!(
        service.report(5).await.unwrap(),
        vec!["ContinentGrandparent > ContinentParent > Europe > France"]
    );

    // Another person is unaffected by either save
    assert!(service.report(6).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_payload_leaves_storage_untouched() {
    let (_temp, config) = setup().await;
    let service = open_service(&config).await;

    service.save(2, Some(payload(&[(1, &["0|2"])]))).await.unwrap();
    let before = service.report(2).await.unwrap();

    let outcome = service.save(2, Some(payload(&[(1, &[""])]))).await.unwrap();
    assert_eq!(outcome, SaveOutcome::NothingSelected);
    assert_eq!(service.report(2).await.unwrap(), before);
}
