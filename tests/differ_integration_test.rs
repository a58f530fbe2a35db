//! End-to-end tests for the standard differ.
//!
//! Tests cover:
//! - Empty diff detection
//! - Single update / insert+delete ordering
//! - Trailing-column ALTER handling
//! - Full dump and drop paths
//! - Index reconciliation
//! - Schema-mismatch rebuild
//! - NULL primary keys under declared-PK mode
//! - Replay round-trips (execute(diff(A,B)) on copy(A) == B)

use rusqlite::types::Value;
use rusqlite::Connection;
use sqlite_mirror::differ::{DiffConfig, Differ};
use sqlite_mirror::schema::SchemaMode;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

fn make_db(dir: &TempDir, name: &str, sql: &str) -> PathBuf {
    let path = dir.path().join(name);
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(sql).unwrap();
    path
}

fn diff(old: &Path, new: &Path) -> String {
    Differ::new(DiffConfig::default()).diff(old, new).unwrap()
}

fn diff_with(old: &Path, new: &Path, config: DiffConfig) -> String {
    Differ::new(config).diff(old, new).unwrap()
}

/// All rows of all tables, sorted, for content comparison.
fn snapshot(path: &Path) -> Vec<(String, Vec<Vec<String>>)> {
    let conn = Connection::open(path).unwrap();
    let mut tables: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_schema WHERE type='table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
    };
    tables.sort();
    tables
        .into_iter()
        .map(|t| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM \"{t}\"")).unwrap();
            let n = stmt.column_count();
            let mut rows: Vec<Vec<String>> = stmt
                .query_map([], |row| {
                    let mut vals = Vec::with_capacity(n);
                    for i in 0..n {
                        vals.push(format!("{:?}", row.get::<_, Value>(i).unwrap()));
                    }
                    Ok(vals)
                })
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
            rows.sort();
            (t, rows)
        })
        .collect()
}

/// Replay `patch` onto the database at `path`.
fn replay(path: &Path, patch: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(patch).unwrap();
}

// =============================================================================
// Policy matrix
// =============================================================================

#[test]
fn identical_databases_produce_empty_diff() {
    let dir = TempDir::new().unwrap();
    let sql = "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT); INSERT INTO t VALUES(1,'a');";
    let a = make_db(&dir, "a.db", sql);
    let b = make_db(&dir, "b.db", sql);
    assert_eq!(diff(&a, &b), "");
}

#[test]
fn single_changed_cell_yields_one_update() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT); INSERT INTO t VALUES(1,'a');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT); INSERT INTO t VALUES(1,'b');",
    );
    assert_eq!(diff(&a, &b), "UPDATE t SET y='b' WHERE x=1;\n");
}

#[test]
fn insert_and_delete_come_out_in_pk_order() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT);
         INSERT INTO t VALUES(1,'a'),(2,'b');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT);
         INSERT INTO t VALUES(1,'a'),(3,'c');",
    );
    assert_eq!(
        diff(&a, &b),
        "DELETE FROM t WHERE x=2;\nINSERT INTO t(x,y) VALUES(3,'c');\n"
    );
}

#[test]
fn trailing_column_becomes_alter_before_row_diff() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT); INSERT INTO t VALUES(1,'a');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT, z INT); INSERT INTO t VALUES(1,'a',5);",
    );
    let patch = diff(&a, &b);
    assert_eq!(patch, "ALTER TABLE t ADD COLUMN z;\nUPDATE t SET z=5 WHERE x=1;\n");

    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn table_missing_from_target_is_dropped() {
    let dir = TempDir::new().unwrap();
    let a = make_db(&dir, "a.db", "CREATE TABLE gone(x INT); INSERT INTO gone VALUES(9);");
    let b = make_db(&dir, "b.db", "CREATE TABLE kept(x INT);");
    let patch = diff(&a, &b);
    assert!(patch.contains("DROP TABLE gone;"));
    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn table_missing_from_source_is_fully_dumped() {
    let dir = TempDir::new().unwrap();
    let a = make_db(&dir, "a.db", "CREATE TABLE existing(x INT);");
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE existing(x INT);
         CREATE TABLE fresh(id INTEGER PRIMARY KEY, v TEXT);
         CREATE INDEX fresh_v ON fresh(v);
         INSERT INTO fresh VALUES(1,'one'),(2,'two');",
    );
    let patch = diff(&a, &b);
    assert!(patch.contains("CREATE TABLE fresh"));
    assert!(patch.contains("INSERT INTO fresh(id,v) VALUES(1,'one');"));
    assert!(patch.contains("CREATE INDEX fresh_v ON fresh(v);"));

    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn incompatible_schema_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT); INSERT INTO t VALUES(1,'a');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, renamed TEXT); INSERT INTO t VALUES(1,'a');",
    );
    let patch = diff(&a, &b);
    assert!(patch.starts_with("DROP TABLE t; -- due to schema mismatch\n"));
    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

// =============================================================================
// Index reconciliation
// =============================================================================

#[test]
fn indexes_are_dropped_and_created_to_match_target() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT);
         CREATE INDEX old_idx ON t(y);",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT);
         CREATE INDEX new_idx ON t(y, x);",
    );
    let patch = diff(&a, &b);
    let drop_pos = patch.find("DROP INDEX old_idx;").expect("drop missing");
    let create_pos = patch.find("CREATE INDEX new_idx ON t(y, x);").expect("create missing");
    assert!(drop_pos < create_pos);
    replay(&a, &patch);

    let conn = Connection::open(&a).unwrap();
    let names: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_schema WHERE type='index' ORDER BY name")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(names, ["new_idx"]);
}

// =============================================================================
// Rowid and WITHOUT ROWID tables
// =============================================================================

#[test]
fn rowid_table_diff_addresses_rows_by_rowid() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(a TEXT, b TEXT); INSERT INTO t VALUES('k','old');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(a TEXT, b TEXT); INSERT INTO t VALUES('k','new');",
    );
    let patch = diff(&a, &b);
    assert_eq!(patch, "UPDATE t SET b='new' WHERE rowid=1;\n");
    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn without_rowid_composite_key_round_trips() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(a TEXT, b INT, v REAL, PRIMARY KEY(b, a)) WITHOUT ROWID;
         INSERT INTO t VALUES('x',1,0.5),('y',2,1.5);",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(a TEXT, b INT, v REAL, PRIMARY KEY(b, a)) WITHOUT ROWID;
         INSERT INTO t VALUES('x',1,2.5),('z',3,3.5);",
    );
    let patch = diff(&a, &b);
    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

// =============================================================================
// Declared-PK mode
// =============================================================================

#[test]
fn null_pk_rows_are_invisible_in_schema_pk_mode() {
    let dir = TempDir::new().unwrap();
    // TEXT PRIMARY KEY on a rowid table admits NULL keys.
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(k TEXT PRIMARY KEY, v INT);
         INSERT INTO t VALUES('a',1),(NULL,99);",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(k TEXT PRIMARY KEY, v INT);
         INSERT INTO t VALUES('a',1);",
    );
    let config = DiffConfig { schema_mode: SchemaMode::SchemaPk, ..Default::default() };
    assert_eq!(diff_with(&a, &b, config), "");
}

#[test]
fn schema_pk_mode_addresses_rows_by_declared_key() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(k TEXT PRIMARY KEY, v INT); INSERT INTO t VALUES('a',1);",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(k TEXT PRIMARY KEY, v INT); INSERT INTO t VALUES('a',2);",
    );
    let config = DiffConfig { schema_mode: SchemaMode::SchemaPk, ..Default::default() };
    assert_eq!(diff_with(&a, &b, config), "UPDATE t SET v=2 WHERE k='a';\n");
}

// =============================================================================
// Determinism and round-trips
// =============================================================================

#[test]
fn diff_output_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y, z);
         INSERT INTO t VALUES(1,'a',x'00ff'),(2,2.5,NULL),(3,NULL,'s');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, y, z);
         INSERT INTO t VALUES(1,'b',x'00ff'),(3,NULL,'s'),(4,0.25,x'');",
    );
    assert_eq!(diff(&a, &b), diff(&a, &b));
}

#[test]
fn mixed_type_diff_round_trips() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, i INT, r REAL, s TEXT, b BLOB);
         INSERT INTO t VALUES(1, 10, 1.5, 'one', x'0102');
         INSERT INTO t VALUES(2, NULL, NULL, NULL, NULL);
         INSERT INTO t VALUES(3, -7, 2.0, 'it''s', x'');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(x INTEGER PRIMARY KEY, i INT, r REAL, s TEXT, b BLOB);
         INSERT INTO t VALUES(1, 10, 1.5, 'one', x'0102');
         INSERT INTO t VALUES(2, 5, 0.125, 'filled', x'deadbeef');
         INSERT INTO t VALUES(4, NULL, 3.25, 'new
line', NULL);",
    );
    let patch = diff(&a, &b);
    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn two_nulls_compare_equal() {
    let dir = TempDir::new().unwrap();
    let sql = "CREATE TABLE t(x INTEGER PRIMARY KEY, y TEXT);
               INSERT INTO t VALUES(1,NULL);";
    let a = make_db(&dir, "a.db", sql);
    let b = make_db(&dir, "b.db", sql);
    assert_eq!(diff(&a, &b), "");
}

#[test]
fn quoted_identifiers_survive_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE \"select\"(\"order\" INTEGER PRIMARY KEY, \"my col\" TEXT);
         INSERT INTO \"select\" VALUES(1,'v');",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE \"select\"(\"order\" INTEGER PRIMARY KEY, \"my col\" TEXT);
         INSERT INTO \"select\" VALUES(1,'w'),(2,'x');",
    );
    let patch = diff(&a, &b);
    assert!(patch.contains("\"select\""));
    replay(&a, &patch);
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn unaddressable_table_is_skipped() {
    let dir = TempDir::new().unwrap();
    let a = make_db(
        &dir,
        "a.db",
        "CREATE TABLE t(rowid TEXT, _rowid_ TEXT, oid TEXT);
         INSERT INTO t VALUES('a','b','c');
         CREATE TABLE u(x INTEGER PRIMARY KEY);",
    );
    let b = make_db(
        &dir,
        "b.db",
        "CREATE TABLE t(rowid TEXT, _rowid_ TEXT, oid TEXT);
         CREATE TABLE u(x INTEGER PRIMARY KEY);
         INSERT INTO u VALUES(1);",
    );
    // The unaddressable table contributes nothing; the healthy one diffs.
    assert_eq!(diff(&a, &b), "INSERT INTO u(x) VALUES(1);\n");
}
