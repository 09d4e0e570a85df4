use dielectric_core::db::open_db_in_memory;
use dielectric_core::{
    DielectricRecord, DielectricRepository, DielectricTensors, Material, MaterialRepository,
    RepoError, SqliteDielectricRepository, SqliteMaterialRepository, StaleMaterialQuery, Structure,
};
use rusqlite::Connection;

fn material(material_id: &str, band_gap: f64, last_updated: i64) -> Material {
    Material {
        material_id: material_id.to_string(),
        band_gap,
        structure: Structure::new(
            [[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]],
            vec![("Si", [0.0, 0.0, 0.0])],
        ),
        task_ids: vec![format!("{material_id}-task")],
        last_updated,
    }
}

fn record(material_id: &str) -> DielectricRecord {
    let eye = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    DielectricRecord {
        material_id: material_id.to_string(),
        task_id: format!("{material_id}-task"),
        dielectric: DielectricTensors {
            ionic: eye,
            electronic: eye,
            total: [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]],
            e_total: 2.0 / 3.0,
            e_ionic: 1.0 / 3.0,
            e_electronic: 1.0 / 3.0,
        },
        piezo: None,
    }
}

fn stale(conn: &Connection, query: &StaleMaterialQuery) -> Vec<String> {
    SqliteMaterialRepository::new(conn).find_stale(query).unwrap()
}

#[test]
fn materials_without_records_are_stale_in_id_order() {
    let conn = open_db_in_memory().unwrap();
    let materials = SqliteMaterialRepository::new(&conn);
    for id in ["mp-3", "mp-1", "mp-2"] {
        materials.upsert_material(&material(id, 1.0, 10)).unwrap();
    }

    assert_eq!(
        stale(&conn, &StaleMaterialQuery::default()),
        vec!["mp-1", "mp-2", "mp-3"]
    );
}

#[test]
fn small_band_gap_is_never_selected() {
    let conn = open_db_in_memory().unwrap();
    let materials = SqliteMaterialRepository::new(&conn);
    materials.upsert_material(&material("mp-metal", 0.0, 10)).unwrap();
    materials.upsert_material(&material("mp-edge", 0.1, 10)).unwrap();
    materials.upsert_material(&material("mp-gap", 0.1001, 10)).unwrap();

    assert_eq!(stale(&conn, &StaleMaterialQuery::default()), vec!["mp-gap"]);

    let strict = StaleMaterialQuery {
        band_gap_threshold: 2.0,
        material_ids: None,
    };
    assert!(stale(&conn, &strict).is_empty());
}

#[test]
fn record_newer_than_material_is_fresh_until_material_changes() {
    let conn = open_db_in_memory().unwrap();
    let materials = SqliteMaterialRepository::new(&conn);
    let target = SqliteDielectricRepository::new(&conn);

    materials.upsert_material(&material("mp-1", 1.0, 100)).unwrap();
    target.upsert_record(&record("mp-1"), 200).unwrap();
    assert!(stale(&conn, &StaleMaterialQuery::default()).is_empty());

    // Equal timestamps are not stale.
    materials.upsert_material(&material("mp-1", 1.0, 200)).unwrap();
    assert!(stale(&conn, &StaleMaterialQuery::default()).is_empty());

    materials.upsert_material(&material("mp-1", 1.0, 201)).unwrap();
    assert_eq!(stale(&conn, &StaleMaterialQuery::default()), vec!["mp-1"]);
}

#[test]
fn material_id_filter_restricts_candidates() {
    let conn = open_db_in_memory().unwrap();
    let materials = SqliteMaterialRepository::new(&conn);
    for id in ["mp-1", "mp-2", "mp-3"] {
        materials.upsert_material(&material(id, 1.0, 10)).unwrap();
    }

    let query = StaleMaterialQuery {
        material_ids: Some(vec!["mp-3".to_string(), "mp-1".to_string(), "mp-9".to_string()]),
        ..StaleMaterialQuery::default()
    };
    assert_eq!(stale(&conn, &query), vec!["mp-1", "mp-3"]);

    let empty = StaleMaterialQuery {
        material_ids: Some(Vec::new()),
        ..StaleMaterialQuery::default()
    };
    assert!(stale(&conn, &empty).is_empty());
}

#[test]
fn summary_roundtrip_and_malformed_structure() {
    let conn = open_db_in_memory().unwrap();
    let materials = SqliteMaterialRepository::new(&conn);
    let source = material("mp-1", 1.0, 10);
    materials.upsert_material(&source).unwrap();

    assert_eq!(materials.get_summary("mp-1").unwrap(), Some(source.summary()));
    assert_eq!(materials.get_summary("mp-404").unwrap(), None);

    conn.execute(
        "UPDATE materials SET structure = '{\"lattice\": 3}' WHERE material_id = 'mp-1';",
        [],
    )
    .unwrap();
    let err = materials.get_summary("mp-1").unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
    assert!(!err.is_fatal());
}

#[test]
fn record_upsert_replaces_whole_record() {
    let conn = open_db_in_memory().unwrap();
    let target = SqliteDielectricRepository::new(&conn);

    let mut first = record("mp-1");
    first.piezo = Some(dielectric_core::PiezoRecord {
        piezoelectric_tensor: [[0.1; 6]; 3],
        eij_max: 0.1,
    });
    target.upsert_record(&first, 5).unwrap();
    target.upsert_record(&record("mp-1"), 6).unwrap();

    let stored = target.get_record("mp-1").unwrap().unwrap();
    assert_eq!(stored.record, record("mp-1"));
    assert!(stored.record.piezo.is_none());
    assert_eq!(stored.last_updated, 6);
    assert_eq!(target.count_records().unwrap(), 1);
}
