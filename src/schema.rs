//! Table metadata resolution.
//!
//! Answers two questions the differs depend on: what are a table's columns
//! with the primary key first (and is that key the implicit rowid), and do
//! the two attached schemas declare the table identically.

use crate::ident::quote_ident;
use crate::value::quote_text;
use anyhow::{Context, Result};
use rusqlite::Connection;

/// How the primary key of a table is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// The engine-reported true PK: the declared key for WITHOUT ROWID
    /// tables and INTEGER PRIMARY KEY columns, the hidden rowid otherwise.
    #[default]
    TruePk,
    /// The declared PRIMARY KEY clause, falling back to the hidden rowid
    /// only when no PK is declared. Required for RBU staging output.
    SchemaPk,
}

/// Resolved column list for one table in one attached schema.
///
/// `names` holds quoted identifiers ready for SQL interpolation, primary
/// key columns first in declared order. When the key is the hidden rowid,
/// `names[0]` is whichever of `rowid`/`_rowid_`/`oid` does not collide with
/// a declared column.
#[derive(Debug, Clone)]
pub struct TableColumns {
    pub names: Vec<String>,
    pub n_pk: usize,
    pub implicit_rowid: bool,
}

impl TableColumns {
    /// Primary-key column names.
    pub fn pk(&self) -> &[String] {
        &self.names[..self.n_pk]
    }

    /// Non-key column names.
    pub fn non_pk(&self) -> &[String] {
        &self.names[self.n_pk..]
    }
}

/// Resolve the ordered column list for `table` in attached schema `db`
/// (`main` or `aux`).
///
/// Returns `Ok(None)` when the table needs the hidden rowid but declares
/// columns named `rowid`, `_rowid_`, and `oid` all at once; such a table
/// cannot be addressed row-by-row and the caller must skip it.
pub fn table_columns(
    conn: &Connection,
    db: &str,
    table: &str,
    mode: SchemaMode,
) -> Result<Option<TableColumns>> {
    let (true_pk, n_pk) = match mode {
        SchemaMode::TruePk => true_pk_shape(conn, db, table)?,
        SchemaMode::SchemaPk => schema_pk_shape(conn, db, table)?,
    };

    // Walk table metadata: PK columns land at their declared ordinals,
    // everything else is appended in declared order.
    let mut slots: Vec<Option<String>> = vec![None; n_pk];
    let sql = format!("PRAGMA {}.table_info({})", db, quote_text(table));
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("reading column info for table {table}"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let pk_ord: i64 = row.get(5)?;
        if true_pk && pk_ord > 0 && (pk_ord as usize) <= n_pk {
            slots[pk_ord as usize - 1] = Some(quote_ident(&name));
        } else {
            slots.push(Some(quote_ident(&name)));
        }
    }

    let implicit_rowid = n_pk == 1 && slots[0].is_none();
    if implicit_rowid {
        match rowid_alias(&slots) {
            Some(alias) => slots[0] = Some(alias.to_string()),
            None => return Ok(None),
        }
    }

    let names: Vec<String> = slots.into_iter().flatten().collect();
    if names.len() < n_pk {
        // Declared PK ordinal pointed past the column list; treat the
        // table as unaddressable rather than emit broken SQL.
        return Ok(None);
    }
    Ok(Some(TableColumns { names, n_pk, implicit_rowid }))
}

/// Determine PK shape from the engine's index metadata.
///
/// Returns `(true_pk, n_pk)`: whether declared PK ordinals in table_info
/// are authoritative, and how many key columns lead the list.
fn true_pk_shape(conn: &Connection, db: &str, table: &str) -> Result<(bool, usize)> {
    // Find the index whose origin is the PRIMARY KEY clause.
    let mut pk_index: Option<String> = None;
    let sql = format!("PRAGMA {}.index_list({})", db, quote_text(table));
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("reading index list for table {table}"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let origin: String = row.get(3)?;
        if origin.eq_ignore_ascii_case("pk") {
            pk_index = Some(row.get(1)?);
            break;
        }
    }
    drop(rows);
    drop(stmt);

    let Some(idx) = pk_index else {
        // No PK index: either an INTEGER PRIMARY KEY (aliasing the rowid,
        // so table_info's ordinal is honest) or no declared key at all.
        return Ok((true, 1));
    };

    // A WITHOUT ROWID table's PK index carries only key columns. If the
    // index has auxiliary columns, the rowid is the real key.
    let mut n_col = 0usize;
    let mut n_key = 0usize;
    let sql = format!("PRAGMA {}.index_xinfo({})", db, quote_text(&idx));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        n_col += 1;
        let is_key: i64 = row.get(5)?;
        if is_key != 0 {
            n_key += 1;
        }
    }
    if n_col == n_key {
        Ok((true, n_key))
    } else {
        Ok((false, 1))
    }
}

/// Determine PK shape from the declared PRIMARY KEY clause alone.
fn schema_pk_shape(conn: &Connection, db: &str, table: &str) -> Result<(bool, usize)> {
    let sql = format!("PRAGMA {}.table_info({})", db, quote_text(table));
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut n = 0usize;
    while let Some(row) = rows.next()? {
        let pk_ord: i64 = row.get(5)?;
        if pk_ord > 0 {
            n += 1;
        }
    }
    if n > 0 {
        Ok((true, n))
    } else {
        Ok((false, 1))
    }
}

/// Pick the first rowid alias that no declared column shadows.
fn rowid_alias(slots: &[Option<String>]) -> Option<&'static str> {
    ["rowid", "_rowid_", "oid"].into_iter().find(|alias| {
        !slots
            .iter()
            .flatten()
            .any(|name| name.eq_ignore_ascii_case(alias))
    })
}

/// True when `table` exists with identical declared SQL in both attached
/// schemas. Missing on either side counts as a mismatch.
pub fn schemas_match(conn: &Connection, table: &str) -> Result<bool> {
    let fetch = |db: &str| -> Result<Option<String>> {
        let sql = format!(
            "SELECT sql FROM {db}.sqlite_schema WHERE type='table' AND name=?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([table])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    };
    match (fetch("main")?, fetch("aux")?) {
        (Some(a), Some(b)) => Ok(a == b),
        _ => Ok(false),
    }
}

/// True when `table` is present (as a regular table) in attached schema `db`.
pub fn table_exists(conn: &Connection, db: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {db}.sqlite_schema WHERE type='table' AND name=?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let exists = stmt.query([table])?.next()?.is_some();
    Ok(exists)
}
