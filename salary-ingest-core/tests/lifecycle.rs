use salary_ingest_core::contract::ProcessingResult;
use salary_ingest_core::lifecycle::FileLifecycle;
use salary_ingest_core::reader::read_table;
use salary_ingest_core::table::{Table, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn lifecycle(root: &Path) -> FileLifecycle {
    FileLifecycle::new(root.join("temp"), root.join("processed"), 55000.0)
}

fn result_for(original: &Path, total: usize, filtered: usize) -> ProcessingResult {
    let mut r = ProcessingResult::started(original);
    r.records_processed = total;
    r.filtered_by_salary = filtered;
    r
}

#[test]
fn persisted_artifact_reads_back_unchanged() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());
    let original = dir.path().join("staff.csv");
    let table = Table::from_rows(
        vec!["id".into(), "name".into(), "salary".into()],
        vec![
            vec![Value::Int(3), Value::Str("C, Jr.".into()), Value::Float(120000.0)],
            vec![Value::Int(5), Value::Null, Value::Float(99000.5)],
        ],
    )
    .unwrap();

    let path = lc.persist(&table, &original, &result_for(&original, 4, 2)).unwrap();

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("salary_filtered_staff_total4_filtered2_"), "{name}");
    assert!(name.ends_with(".csv"));
    assert_eq!(path.parent().unwrap(), dir.path().join("temp"));

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# Filtered by salary (> 55000)\n"));
    assert!(text.contains("# Source file: staff.csv\n"));
    assert!(text.contains("# Records kept: 2\n"));
    assert!(text.contains("120000.0"));

    let back = read_table(&path).unwrap();
    assert_eq!(back, table);
}

#[test]
fn hash_leading_cells_survive_the_artifact() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());
    let original = dir.path().join("teams.csv");
    let table = Table::from_rows(
        vec!["team".into(), "salary".into()],
        vec![
            vec![Value::Str("#1 core".into()), Value::Int(90000)],
            vec![Value::Str("ops".into()), Value::Int(80000)],
        ],
    )
    .unwrap();

    let path = lc.persist(&table, &original, &result_for(&original, 2, 0)).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"#1 core\",90000\n"), "{text}");
    let back = read_table(&path).unwrap();
    assert_eq!(back.num_rows(), table.num_rows());
    assert_eq!(back, table);
}

#[test]
fn artifacts_for_the_same_source_get_distinct_names() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());
    let original = dir.path().join("staff.csv");
    let table = Table::from_rows(vec!["salary".into()], vec![vec![Value::Int(60000)]]).unwrap();
    let r = result_for(&original, 1, 0);

    let a = lc.persist(&table, &original, &r).unwrap();
    let b = lc.persist(&table, &original, &r).unwrap();
    assert_ne!(a, b);
}

#[test]
fn header_only_artifact_for_empty_table() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());
    let original = dir.path().join("empty.csv");
    let table = Table::from_rows(vec!["id".into(), "salary".into()], vec![]).unwrap();

    let path = lc.persist(&table, &original, &result_for(&original, 0, 0)).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.ends_with("#\nid,salary\n"), "{text}");
}

#[test]
fn archive_moves_source_and_never_overwrites() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());

    let mut archived = Vec::new();
    for body in ["first", "second", "third"] {
        let original = dir.path().join("report.csv");
        fs::write(&original, body).unwrap();
        let target = lc.archive(&original).unwrap();
        assert!(!original.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), body);
        archived.push(target);
    }

    assert_eq!(archived[0].file_name().unwrap(), "report.csv");
    assert_ne!(archived[1], archived[0]);
    assert_ne!(archived[2], archived[1]);
    for path in &archived {
        assert!(path.starts_with(lc.archive_root()));
        assert!(path.to_string_lossy().ends_with(".csv"));
    }
}

#[test]
fn archive_of_missing_source_fails() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());
    assert!(lc.archive(&dir.path().join("absent.csv")).is_err());
}

#[test]
fn discard_tolerates_missing_artifact() {
    let dir = tempdir().unwrap();
    let lc = lifecycle(dir.path());
    let artifact = dir.path().join("salary_filtered_x.csv");
    fs::write(&artifact, "x").unwrap();

    lc.discard(&artifact);
    assert!(!artifact.exists());
    lc.discard(&artifact);
}
