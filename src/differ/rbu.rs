//! Table differ emitting RBU staging rows.
//!
//! Instead of direct DML, each changed table yields a
//! `CREATE TABLE IF NOT EXISTS 'data_<table>'` statement and one staging
//! row per difference. The trailing `rbu_control` column carries `0` for
//! inserts, `1` for deletes, and for updates a string with one character
//! per column: `.` unchanged, `x` changed, `f` changed and expressed as a
//! binary delta against the old blob value.

use super::{DiffContext, TableDiffer, DEBUG_COLUMN_NAMES, DEBUG_DIFF_SQL};
use crate::delta;
use crate::ident::quote_ident;
use crate::schema::{schemas_match, table_columns, SchemaMode, TableColumns};
use crate::value::{literal, quote_text, write_literal};
use anyhow::{bail, Result};
use rusqlite::types::ValueRef;

pub struct RbuDiffer;

impl TableDiffer for RbuDiffer {
    fn diff_table(&self, ctx: &DiffContext<'_>, table: &str, out: &mut String) -> Result<()> {
        let conn = ctx.conn;

        // Staging rows are applied by key on an unchanged schema; a
        // mismatch cannot be papered over here.
        if !schemas_match(conn, table)? {
            bail!("schema changed for table {table}: RBU diffs require identical schemas");
        }

        // Row addressing must follow the declared PRIMARY KEY.
        let cols = table_columns(conn, "main", table, SchemaMode::SchemaPk)?;
        if ctx.config.debug & DEBUG_COLUMN_NAMES != 0 {
            match &cols {
                Some(c) => eprintln!(
                    "columns of {table}: [{}] nPk={} rowid={}",
                    c.names.join(", "),
                    c.n_pk,
                    c.implicit_rowid
                ),
                None => eprintln!("columns of {table}: no usable PK"),
            }
        }
        let Some(cols) = cols else {
            eprintln!("skipping table {table}: no usable PK (all rowid aliases collide)");
            return Ok(());
        };

        let sql = rbu_query(&cols, table);
        if ctx.config.debug & DEBUG_DIFF_SQL != 0 {
            println!("SQL for {table}:\n{sql}");
            return Ok(());
        }

        emit_staging_rows(ctx, &cols, table, &sql, out)
    }
}

/// Escaped table name for the single-quoted `data_` naming convention.
fn staging_name(table: &str) -> String {
    format!("'data_{}'", table.replace('\'', "''"))
}

/// The `CREATE TABLE IF NOT EXISTS 'data_<table>'` statement. An implicit
/// rowid key surfaces as a synthetic leading `rbu_rowid` column.
fn staging_create(cols: &TableColumns, table: &str) -> String {
    let mut stmt = format!("CREATE TABLE IF NOT EXISTS {}(", staging_name(table));
    if cols.implicit_rowid {
        stmt.push_str("rbu_rowid, ");
        stmt.push_str(&cols.names[1..].join(", "));
    } else {
        stmt.push_str(&cols.names.join(", "));
    }
    stmt.push_str(", rbu_control);\n");
    stmt
}

/// Build the staging query.
///
/// Result shape: every table column (new values, PK first), then
/// `rbu_control`, then the old value of every non-PK column (NULL outside
/// the update branch) so blob shrinkage can diff old against new.
fn rbu_query(cols: &TableColumns, table: &str) -> String {
    let id = quote_ident(table);
    let n_pk = cols.n_pk;
    let pk = cols.pk();
    let non_pk = cols.non_pk();
    let mut sql = String::new();

    let pk_join = pk
        .iter()
        .map(|c| format!("n.{c}=o.{c}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let pk_not_null: String = pk
        .iter()
        .map(|c| format!(" AND n.{c} IS NOT NULL"))
        .collect();
    let null_data: String = non_pk.iter().map(|_| ", NULL").collect();

    // Inserted rows: full new values, control 0.
    sql.push_str("SELECT ");
    sql.push_str(
        &cols
            .names
            .iter()
            .map(|c| format!("n.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
    );
    sql.push_str(", 0");
    sql.push_str(&null_data);
    sql.push_str(&format!(
        " FROM aux.{id} AS n WHERE NOT EXISTS(SELECT 1 FROM main.{id} AS o WHERE {pk_join})"
    ));
    sql.push_str(&pk_not_null);

    // Deleted rows: key only, control 1.
    sql.push_str("\nUNION ALL\nSELECT ");
    sql.push_str(
        &pk.iter()
            .map(|c| format!("n.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
    );
    sql.push_str(&null_data);
    sql.push_str(", 1");
    sql.push_str(&null_data);
    sql.push_str(&format!(
        " FROM main.{id} AS n WHERE NOT EXISTS(SELECT 1 FROM aux.{id} AS o WHERE {pk_join})"
    ));
    sql.push_str(&pk_not_null);

    // Updated rows: changed values only, plus the per-column control
    // string. All-key tables cannot have updates.
    if !non_pk.is_empty() {
        sql.push_str("\nUNION ALL\nSELECT ");
        sql.push_str(
            &pk.iter()
                .map(|c| format!("n.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        for c in non_pk {
            sql.push_str(&format!(", CASE WHEN n.{c} IS o.{c} THEN NULL ELSE n.{c} END"));
        }
        // Key columns contribute fixed '.' placeholders unless the key is
        // the synthetic rbu_rowid, which has no control character.
        let dots = if cols.implicit_rowid { String::new() } else { ".".repeat(n_pk) };
        sql.push_str(&format!(", '{dots}'"));
        for c in non_pk {
            sql.push_str(&format!(
                " || CASE WHEN n.{c} IS o.{c} THEN '.' ELSE 'x' END"
            ));
        }
        sql.push_str(" AS rbu_control");
        for c in non_pk {
            sql.push_str(&format!(", o.{c}"));
        }
        sql.push_str(&format!(
            " FROM main.{id} AS o, aux.{id} AS n WHERE {pk_join} AND rbu_control LIKE '%x%'"
        ));
    }

    sql.push_str("\nORDER BY ");
    for i in 1..=n_pk {
        if i > 1 {
            sql.push_str(", ");
        }
        sql.push_str(&i.to_string());
    }
    sql.push(';');
    sql
}

fn emit_staging_rows(
    ctx: &DiffContext<'_>,
    cols: &TableColumns,
    table: &str,
    sql: &str,
    out: &mut String,
) -> Result<()> {
    let n_total = cols.names.len();
    let n_pk = cols.n_pk;
    let insert_prefix = format!("INSERT INTO {} VALUES(", staging_name(table));

    let mut stmt = ctx.conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut first = true;
    while let Some(row) = rows.next()? {
        if first {
            out.push_str(&staging_create(cols, table));
            first = false;
        }

        let mut values: Vec<String> = Vec::with_capacity(n_total + 1);
        let control = match row.get_ref(n_total)? {
            ValueRef::Integer(op) => {
                // Insert or delete: values go out verbatim.
                for i in 0..n_total {
                    values.push(literal(row.get_ref(i)?));
                }
                op.to_string()
            }
            ValueRef::Text(t) => {
                let mut control = t.to_vec();
                for i in 0..n_pk {
                    values.push(literal(row.get_ref(i)?));
                }
                for t_idx in 0..n_total - n_pk {
                    let i = n_pk + t_idx;
                    let new = row.get_ref(i)?;
                    let old = row.get_ref(n_total + 1 + t_idx)?;
                    let ctrl_pos = if cols.implicit_rowid { t_idx } else { i };
                    values.push(shrink_blob(old, new, &mut control, ctrl_pos));
                }
                quote_text(std::str::from_utf8(&control)?)
            }
            other => bail!("unexpected rbu_control value {other:?} for table {table}"),
        };
        values.push(control);

        out.push_str(&insert_prefix);
        out.push_str(&values.join(","));
        out.push_str(");\n");
    }
    Ok(())
}

/// Render an updated cell, replacing a changed blob with a binary delta
/// against its old value when that is strictly smaller. A shrunk cell's
/// control character flips from `x` to `f`.
fn shrink_blob(
    old: ValueRef<'_>,
    new: ValueRef<'_>,
    control: &mut [u8],
    ctrl_pos: usize,
) -> String {
    if let (ValueRef::Blob(old), ValueRef::Blob(new)) = (old, new) {
        if control[ctrl_pos] == b'x' {
            let d = delta::create(old, new);
            if d.len() < new.len() {
                control[ctrl_pos] = b'f';
                let mut s = String::new();
                write_literal(&mut s, ValueRef::Blob(&d));
                return s;
            }
        }
    }
    literal(new)
}
