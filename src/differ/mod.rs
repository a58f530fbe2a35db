//! Differential patch generation.
//!
//! The driver opens the primary as `main` and attaches the backup as `aux`,
//! walks the sorted union of table names from both catalogs, and hands each
//! table to the selected per-table differ. The standard differ emits plain
//! DML/DDL; the RBU differ emits staging-table rows for a resumable bulk
//! update. Output is a statement stream that, replayed against a copy of
//! `main`, produces `aux`.

mod rbu;
mod standard;

pub use rbu::RbuDiffer;
pub use standard::StandardDiffer;

use crate::journal::JournalWriter;
use crate::schema::SchemaMode;
use anyhow::{Context, Result};
use rusqlite::{Connection, LoadExtensionGuard};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Debug bit: dump column-name resolution per table.
pub const DEBUG_COLUMN_NAMES: u32 = 1 << 0;
/// Debug bit: print the generated diff SQL instead of executing it.
pub const DEBUG_DIFF_SQL: u32 = 1 << 1;

/// Configuration for a diff run, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct DiffConfig {
    /// How primary keys are resolved.
    pub schema_mode: SchemaMode,
    /// Emit RBU staging rows instead of direct DML.
    pub rbu: bool,
    /// Wrap each non-empty diff in BEGIN TRANSACTION/COMMIT.
    pub transaction: bool,
    /// Diagnostic bitset (DEBUG_* constants).
    pub debug: u32,
    /// Progress output on stderr.
    pub verbose: bool,
    /// Extension libraries to load into the connection.
    pub extensions: Vec<PathBuf>,
}

/// Connection plus configuration handed to per-table differs.
pub struct DiffContext<'a> {
    pub conn: &'a Connection,
    pub config: &'a DiffConfig,
}

/// A per-table diff strategy. Appends statements to `out` that reconcile
/// `table` from the `main` schema to the `aux` schema.
pub trait TableDiffer {
    fn diff_table(&self, ctx: &DiffContext<'_>, table: &str, out: &mut String) -> Result<()>;
}

/// Drives a diff between two database files.
pub struct Differ {
    config: DiffConfig,
    table_differ: Box<dyn TableDiffer>,
}

impl Differ {
    pub fn new(mut config: DiffConfig) -> Self {
        let table_differ: Box<dyn TableDiffer> = if config.rbu {
            // RBU staging rows address rows by declared key, never by an
            // engine-internal one.
            config.schema_mode = SchemaMode::SchemaPk;
            Box::new(RbuDiffer)
        } else {
            Box::new(StandardDiffer)
        };
        Differ { config, table_differ }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compute the statement stream transforming `main_db` into `aux_db`.
    pub fn diff(&self, main_db: &Path, aux_db: &Path) -> Result<String> {
        let conn = self.open(main_db, aux_db)?;
        let ctx = DiffContext { conn: &conn, config: &self.config };
        let mut out = String::new();
        for table in table_names(&conn)? {
            if self.config.verbose {
                eprintln!("diffing table {table}");
            }
            self.table_differ.diff_table(&ctx, &table, &mut out)?;
        }
        Ok(out)
    }

    /// Diff and append the result to `journal`. Returns the offset of the
    /// first statement of the appended diff, or `None` when the databases
    /// match.
    pub fn diff_to_journal<W: Write>(
        &self,
        main_db: &Path,
        aux_db: &Path,
        journal: &mut JournalWriter<W>,
    ) -> Result<Option<u64>> {
        let body = self.diff(main_db, aux_db)?;
        Ok(journal.append_diff(&body, self.config.transaction)?)
    }

    /// Open `main_db`, load any configured extensions, and attach `aux_db`
    /// as `aux`. Both files are probed against the catalog so a garbage
    /// file fails here rather than mid-diff.
    fn open(&self, main_db: &Path, aux_db: &Path) -> Result<Connection> {
        let conn = Connection::open(main_db)
            .with_context(|| format!("cannot open database {}", main_db.display()))?;
        probe(&conn, "main")
            .with_context(|| format!("{} is not a valid database", main_db.display()))?;

        if !self.config.extensions.is_empty() {
            unsafe {
                let _guard = LoadExtensionGuard::new(&conn)?;
                for path in &self.config.extensions {
                    conn.load_extension(path, None).with_context(|| {
                        format!("cannot load extension {}", path.display())
                    })?;
                }
            }
        }

        let aux = aux_db.to_string_lossy();
        conn.execute("ATTACH DATABASE ?1 AS aux", [aux.as_ref()])
            .with_context(|| format!("cannot attach database {}", aux_db.display()))?;
        probe(&conn, "aux")
            .with_context(|| format!("{} is not a valid database", aux_db.display()))?;
        Ok(conn)
    }
}

fn probe(conn: &Connection, db: &str) -> Result<()> {
    let sql = format!("SELECT count(*) FROM {db}.sqlite_schema");
    conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

/// Sorted union of non-virtual table names from both catalogs.
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM main.sqlite_schema \
         WHERE type='table' AND sql NOT LIKE 'CREATE VIRTUAL%' \
         UNION \
         SELECT name FROM aux.sqlite_schema \
         WHERE type='table' AND sql NOT LIKE 'CREATE VIRTUAL%' \
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}
