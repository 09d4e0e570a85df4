use dielectric_core::db::open_db_in_memory;
use dielectric_core::{
    BuildConfig, BuildLogContext, CalcOutput, Calculation, DielectricBuilder,
    DielectricRepository, Material, MaterialRepository, OutcarOutput, SqliteDielectricRepository,
    SqliteMaterialRepository, SqliteTaskRepository, Structure, TaskDoc, TaskRepository,
    invariant_scalar, BUILDER_NAME,
};
use rusqlite::Connection;

type SqliteBuilder<'conn> = DielectricBuilder<
    SqliteMaterialRepository<'conn>,
    SqliteTaskRepository<'conn>,
    SqliteDielectricRepository<'conn>,
>;

fn builder(conn: &Connection, config: BuildConfig) -> SqliteBuilder<'_> {
    DielectricBuilder::new(
        SqliteMaterialRepository::new(conn),
        SqliteTaskRepository::new(conn),
        SqliteDielectricRepository::new(conn),
        config,
    )
}

fn diag(value: f64) -> [[f64; 3]; 3] {
    [[value, 0.0, 0.0], [0.0, value, 0.0], [0.0, 0.0, value]]
}

fn polar_structure() -> Structure {
    Structure::new(
        [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]],
        vec![("Ga", [0.0, 0.0, 0.0]), ("As", [0.25, 0.25, 0.25])],
    )
}

fn centrosymmetric_structure() -> Structure {
    Structure::new(
        [[4.1, 0.0, 0.0], [0.0, 4.1, 0.0], [0.0, 0.0, 4.1]],
        vec![("Cs", [0.0, 0.0, 0.0]), ("Cl", [0.5, 0.5, 0.5])],
    )
}

fn dielectric_task(task_id: &str, last_updated: i64, piezo: Option<[[f64; 6]; 3]>) -> TaskDoc {
    let mut task = TaskDoc::new(task_id, last_updated);
    task.task_type = Some("GGA Static Dielectric".to_string());
    task.calcs_reversed = vec![Calculation {
        output: CalcOutput {
            epsilon_ionic: Some(diag(1.0)),
            epsilon_static: Some(diag(2.0)),
            outcar: piezo.map(|tensor| OutcarOutput {
                piezo_tensor: Some(tensor),
                piezo_ionic_tensor: Some([[0.0; 6]; 3]),
            }),
        },
    }];
    task
}

fn seed(conn: &Connection, material_id: &str, structure: Structure, tasks: &[TaskDoc], at: i64) {
    let task_repo = SqliteTaskRepository::new(conn);
    for task in tasks {
        task_repo.upsert_task(task).unwrap();
    }
    SqliteMaterialRepository::new(conn)
        .upsert_material(&Material {
            material_id: material_id.to_string(),
            band_gap: 1.5,
            structure,
            task_ids: tasks.iter().map(|task| task.task_id.clone()).collect(),
            last_updated: at,
        })
        .unwrap();
}

fn run(conn: &Connection, config: BuildConfig) -> dielectric_core::BuildReport {
    builder(conn, config)
        .run(BuildLogContext::start(BUILDER_NAME))
        .unwrap()
}

#[test]
fn polar_material_gets_dielectric_and_piezo_record() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        "mp-1",
        polar_structure(),
        &[dielectric_task("mp-1", 1_000, Some([[0.0; 6]; 3]))],
        1_000,
    );

    let report = run(&conn, BuildConfig::default());
    assert_eq!(report.candidates, 1);
    assert_eq!(report.upserted, vec!["mp-1"]);
    assert!(report.failures.is_empty());

    let stored = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap();
    let record = stored.record;
    assert_eq!(record.task_id, "mp-1");
    assert_eq!(record.dielectric.total, diag(3.0));
    assert!((record.dielectric.e_total - 1.0).abs() < 1e-12);
    assert!((record.dielectric.e_ionic - 1.0 / 3.0).abs() < 1e-12);
    assert!((record.dielectric.e_electronic - 2.0 / 3.0).abs() < 1e-12);
    let piezo = record.piezo.expect("polar structure carries piezo");
    assert_eq!(piezo.eij_max, 0.0);
    assert!(stored.last_updated >= 1_000);
}

#[test]
fn newest_of_two_tasks_supplies_the_record() {
    let conn = open_db_in_memory().unwrap();
    // Older dielectric task without any outcar block.
    let mut older = dielectric_task("mp-100", 1_000, None);
    older.calcs_reversed[0].output.epsilon_ionic = Some(diag(7.0));
    let mut newer = dielectric_task("mp-101", 2_000, Some([[0.0; 6]; 3]));
    newer.calcs_reversed[0].output.epsilon_ionic = Some(diag(2.0));
    newer.calcs_reversed[0].output.epsilon_static = Some(diag(1.0));
    seed(&conn, "mp-1", polar_structure(), &[older, newer], 2_000);

    let report = run(&conn, BuildConfig::default());
    assert_eq!(report.upserted, vec!["mp-1"]);
    assert!(report.failures.is_empty());

    let record = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap()
        .record;
    assert_eq!(record.task_id, "mp-101");
    assert_eq!(record.dielectric.ionic, diag(2.0));
    assert_eq!(record.dielectric.electronic, diag(1.0));
    assert_eq!(record.dielectric.total, diag(3.0));
    assert_eq!(
        record.dielectric.e_total,
        invariant_scalar(&diag(3.0)).unwrap()
    );
    let piezo = record.piezo.expect("polar structure carries piezo");
    assert_eq!(piezo.eij_max, 0.0);
    assert_eq!(piezo.piezoelectric_tensor, [[0.0; 6]; 3]);
}

#[test]
fn second_run_without_source_changes_writes_nothing() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        "mp-1",
        centrosymmetric_structure(),
        &[dielectric_task("mp-1", 10, None)],
        10,
    );

    run(&conn, BuildConfig::default());
    let first = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap();

    let report = run(&conn, BuildConfig::default());
    assert_eq!(report.candidates, 0);
    assert!(report.upserted.is_empty());

    let second = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn source_timestamp_in_the_future_still_settles_after_one_run() {
    let conn = open_db_in_memory().unwrap();
    let far_future = i64::MAX / 2;
    seed(
        &conn,
        "mp-1",
        centrosymmetric_structure(),
        &[dielectric_task("mp-1", 10, None)],
        far_future,
    );

    assert_eq!(run(&conn, BuildConfig::default()).upserted, vec!["mp-1"]);
    let stored = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_updated, far_future);
    assert_eq!(run(&conn, BuildConfig::default()).candidates, 0);
}

#[test]
fn material_without_dielectric_task_is_skipped() {
    let conn = open_db_in_memory().unwrap();
    let mut relax = TaskDoc::new("mp-2", 10);
    relax.task_type = Some("GGA Structure Optimization".to_string());
    seed(&conn, "mp-2", polar_structure(), &[relax], 10);

    let report = run(&conn, BuildConfig::default());
    assert_eq!(report.skipped, vec!["mp-2"]);
    assert!(report.upserted.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(
        SqliteDielectricRepository::new(&conn).count_records().unwrap(),
        0
    );
}

#[test]
fn centrosymmetric_material_has_no_piezo() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        "mp-3",
        centrosymmetric_structure(),
        &[dielectric_task("mp-3", 10, Some([[0.4; 6]; 3]))],
        10,
    );

    run(&conn, BuildConfig::default());
    let stored = SqliteDielectricRepository::new(&conn)
        .get_record("mp-3")
        .unwrap()
        .unwrap();
    assert!(stored.record.piezo.is_none());
}

#[test]
fn malformed_material_fails_alone() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        "mp-1",
        centrosymmetric_structure(),
        &[dielectric_task("mp-1", 10, None)],
        10,
    );
    seed(
        &conn,
        "mp-2",
        centrosymmetric_structure(),
        &[dielectric_task("mp-2", 10, None)],
        10,
    );
    conn.execute(
        "UPDATE materials SET structure = 'not json' WHERE material_id = 'mp-1';",
        [],
    )
    .unwrap();

    let report = run(&conn, BuildConfig::default());
    assert_eq!(report.upserted, vec!["mp-2"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].material_id, "mp-1");
    assert_eq!(report.failures[0].task_id, None);
}

#[test]
fn failed_rebuild_keeps_previous_record_and_retries() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        "mp-1",
        centrosymmetric_structure(),
        &[dielectric_task("mp-1", 10, None)],
        10,
    );
    run(&conn, BuildConfig::default());
    let before = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap();

    let mut broken = dielectric_task("mp-7", before.last_updated + 1, None);
    broken.calcs_reversed[0].output.epsilon_ionic = None;
    seed(
        &conn,
        "mp-1",
        centrosymmetric_structure(),
        &[dielectric_task("mp-1", 10, None), broken],
        before.last_updated + 1,
    );

    let report = run(&conn, BuildConfig::default());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].task_id.as_deref(), Some("mp-7"));
    assert!(report.failures[0].message.contains("epsilon_ionic"));

    let after = SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
    assert_eq!(run(&conn, BuildConfig::default()).candidates, 1);
}

#[test]
fn parallel_run_builds_every_candidate() {
    let conn = open_db_in_memory().unwrap();
    let ids: Vec<String> = (1..=7).map(|n| format!("mp-{n}")).collect();
    for (n, id) in ids.iter().enumerate() {
        let structure = if n % 2 == 0 {
            polar_structure()
        } else {
            centrosymmetric_structure()
        };
        seed(
            &conn,
            id,
            structure,
            &[dielectric_task(id, 10, Some([[0.0; 6]; 3]))],
            10,
        );
    }

    let config = BuildConfig {
        parallelism: 3,
        ..BuildConfig::default()
    };
    let report = run(&conn, config);
    assert_eq!(report.candidates, ids.len());
    assert_eq!(report.upserted, ids);
    assert_eq!(
        SqliteDielectricRepository::new(&conn).count_records().unwrap(),
        ids.len() as u64
    );
}

#[test]
fn material_filter_limits_the_run() {
    let conn = open_db_in_memory().unwrap();
    for id in ["mp-1", "mp-2"] {
        seed(
            &conn,
            id,
            centrosymmetric_structure(),
            &[dielectric_task(id, 10, None)],
            10,
        );
    }

    let config = BuildConfig {
        material_ids: Some(vec!["mp-2".to_string()]),
        ..BuildConfig::default()
    };
    assert_eq!(run(&conn, config).upserted, vec!["mp-2"]);
    assert!(SqliteDielectricRepository::new(&conn)
        .get_record("mp-1")
        .unwrap()
        .is_none());
}
