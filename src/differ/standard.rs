//! Row-level table differ emitting direct DML/DDL.
//!
//! For each table the policy is: drop it, dump it, extend it with trailing
//! columns, or row-diff it, depending on where it exists and whether the
//! declared column lists agree. The row diff is a single three-branch
//! `UNION ALL` query (changed/deleted/inserted) executed against both
//! attached schemas at once, ordered by primary-key position so output is
//! deterministic.

use super::{DiffContext, TableDiffer, DEBUG_COLUMN_NAMES, DEBUG_DIFF_SQL};
use crate::ident::quote_ident;
use crate::schema::{table_columns, table_exists, SchemaMode, TableColumns};
use crate::value::write_literal;
use anyhow::Result;
use rusqlite::Connection;

pub struct StandardDiffer;

impl TableDiffer for StandardDiffer {
    fn diff_table(&self, ctx: &DiffContext<'_>, table: &str, out: &mut String) -> Result<()> {
        let conn = ctx.conn;
        let id = quote_ident(table);

        let in_main = table_exists(conn, "main", table)?;
        let in_aux = table_exists(conn, "aux", table)?;
        if !in_aux {
            if in_main {
                out.push_str(&format!("DROP TABLE {id};\n"));
            }
            return Ok(());
        }
        if !in_main {
            return dump_table(ctx, table, out);
        }

        let cols_main = table_columns(conn, "main", table, ctx.config.schema_mode)?;
        let cols_aux = table_columns(conn, "aux", table, ctx.config.schema_mode)?;
        if ctx.config.debug & DEBUG_COLUMN_NAMES != 0 {
            dump_column_resolution(table, cols_main.as_ref(), cols_aux.as_ref());
        }
        let (Some(a), Some(b)) = (cols_main, cols_aux) else {
            eprintln!("skipping table {table}: no usable PK (all rowid aliases collide)");
            return Ok(());
        };

        // Length of the common column prefix.
        let mut n = 0;
        while n < a.names.len()
            && n < b.names.len()
            && a.names[n].eq_ignore_ascii_case(&b.names[n])
        {
            n += 1;
        }

        if a.n_pk != b.n_pk || n < a.names.len() {
            // Reordered, renamed, or dropped columns: rebuild the table.
            out.push_str(&format!("DROP TABLE {id}; -- due to schema mismatch\n"));
            return dump_table(ctx, table, out);
        }

        // The backup may lag behind by trailing columns only.
        for extra in &b.names[n..] {
            out.push_str(&format!("ALTER TABLE {id} ADD COLUMN {extra};\n"));
        }

        let sql = row_diff_query(&a, &b, &id, ctx.config.schema_mode);
        if ctx.config.debug & DEBUG_DIFF_SQL != 0 {
            println!("SQL for {id}:\n{sql}");
            return Ok(());
        }

        drop_obsolete_indexes(conn, table, out)?;
        emit_row_diff(conn, &sql, &a, &b, &id, out)?;
        create_missing_indexes(conn, table, out)?;
        Ok(())
    }
}

/// Build the three-branch comparison query.
///
/// Result shape: PK columns, an `op` column (1=changed, 2=deleted,
/// 3=inserted), then a `(changed?, new_value)` pair per non-PK column of
/// the `aux` table. Comparisons use `IS NOT` so two NULLs compare equal.
fn row_diff_query(a: &TableColumns, b: &TableColumns, id: &str, mode: SchemaMode) -> String {
    let n_pk = a.n_pk;
    let n_main = a.names.len();
    let pk = a.pk();
    let mut sql = String::new();

    let pk_join = pk
        .iter()
        .map(|c| format!("A.{c}=B.{c}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    if b.names.len() > n_pk {
        sql.push_str("SELECT ");
        for (i, c) in pk.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("B.{c}"));
        }
        sql.push_str(", 1");
        for (i, c) in b.names.iter().enumerate().skip(n_pk) {
            if i < n_main {
                sql.push_str(&format!(", A.{c} IS NOT B.{c}, B.{c}"));
            } else {
                // Column freshly added on the aux side; main has no A.{c}.
                sql.push_str(&format!(", B.{c} IS NOT NULL, B.{c}"));
            }
        }
        sql.push_str(&format!(" FROM main.{id} A, aux.{id} B WHERE {pk_join} AND ("));
        for (i, c) in b.names.iter().enumerate().skip(n_pk) {
            if i > n_pk {
                sql.push_str(" OR ");
            }
            if i < n_main {
                sql.push_str(&format!("A.{c} IS NOT B.{c}"));
            } else {
                sql.push_str(&format!("B.{c} IS NOT NULL"));
            }
        }
        sql.push_str(")\n UNION ALL\n");
    }

    // Deleted rows.
    sql.push_str("SELECT ");
    for (i, c) in pk.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!("A.{c}"));
    }
    sql.push_str(", 2");
    for _ in n_pk..b.names.len() {
        sql.push_str(", NULL, NULL");
    }
    sql.push_str(&format!(
        " FROM main.{id} A WHERE NOT EXISTS(SELECT 1 FROM aux.{id} B WHERE {pk_join})"
    ));
    if mode == SchemaMode::SchemaPk {
        for c in pk {
            sql.push_str(&format!(" AND A.{c} IS NOT NULL"));
        }
    }
    sql.push_str("\n UNION ALL\n");

    // Inserted rows.
    sql.push_str("SELECT ");
    for (i, c) in pk.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!("B.{c}"));
    }
    sql.push_str(", 3");
    for c in &b.names[n_pk..] {
        sql.push_str(&format!(", 1, B.{c}"));
    }
    sql.push_str(&format!(
        " FROM aux.{id} B WHERE NOT EXISTS(SELECT 1 FROM main.{id} A WHERE {pk_join})"
    ));
    if mode == SchemaMode::SchemaPk {
        for c in pk {
            sql.push_str(&format!(" AND B.{c} IS NOT NULL"));
        }
    }

    sql.push_str("\n ORDER BY ");
    for i in 1..=n_pk {
        if i > 1 {
            sql.push_str(", ");
        }
        sql.push_str(&i.to_string());
    }
    sql.push(';');
    sql
}

/// Execute the comparison query and write one statement per result row.
fn emit_row_diff(
    conn: &Connection,
    sql: &str,
    a: &TableColumns,
    b: &TableColumns,
    id: &str,
    out: &mut String,
) -> Result<()> {
    let n_pk = a.n_pk;
    let n_data = b.names.len() - n_pk;
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let op: i64 = row.get(n_pk)?;
        match op {
            1 => {
                out.push_str(&format!("UPDATE {id} SET "));
                let mut first = true;
                for t in 0..n_data {
                    let flag: i64 = row.get(n_pk + 1 + 2 * t)?;
                    if flag == 0 {
                        continue;
                    }
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    out.push_str(&b.names[n_pk + t]);
                    out.push('=');
                    write_literal(out, row.get_ref(n_pk + 2 + 2 * t)?);
                }
                out.push_str(" WHERE ");
                write_pk_predicate(out, a, row, n_pk)?;
                out.push_str(";\n");
            }
            3 => {
                out.push_str(&format!("INSERT INTO {id}({}) VALUES(", b.names.join(",")));
                for i in 0..n_pk {
                    if i > 0 {
                        out.push(',');
                    }
                    write_literal(out, row.get_ref(i)?);
                }
                for t in 0..n_data {
                    out.push(',');
                    write_literal(out, row.get_ref(n_pk + 2 + 2 * t)?);
                }
                out.push_str(");\n");
            }
            _ => {
                out.push_str(&format!("DELETE FROM {id} WHERE "));
                write_pk_predicate(out, a, row, n_pk)?;
                out.push_str(";\n");
            }
        }
    }
    Ok(())
}

fn write_pk_predicate(
    out: &mut String,
    a: &TableColumns,
    row: &rusqlite::Row<'_>,
    n_pk: usize,
) -> Result<()> {
    for (i, c) in a.pk().iter().enumerate() {
        if i > 0 {
            out.push_str(" AND ");
        }
        out.push_str(c);
        out.push('=');
        write_literal(out, row.get_ref(i)?);
    }
    Ok(())
}

/// Full dump of a table that exists only in `aux`: declared schema, every
/// row, then its indexes.
fn dump_table(ctx: &DiffContext<'_>, table: &str, out: &mut String) -> Result<()> {
    let conn = ctx.conn;
    let id = quote_ident(table);

    let mut stmt =
        conn.prepare("SELECT sql FROM aux.sqlite_schema WHERE type='table' AND name=?1")?;
    let mut rows = stmt.query([table])?;
    if let Some(row) = rows.next()? {
        let schema: String = row.get(0)?;
        out.push_str(&schema);
        out.push_str(";\n");
    }
    drop(rows);
    drop(stmt);

    let cols = table_columns(conn, "aux", table, ctx.config.schema_mode)?;
    let (select, insert_prefix) = match &cols {
        Some(c) => {
            let mut select = format!("SELECT {} FROM aux.{id} ORDER BY ", c.names.join(", "));
            for i in 1..=c.n_pk {
                if i > 1 {
                    select.push_str(", ");
                }
                select.push_str(&i.to_string());
            }
            (select, format!("INSERT INTO {id}({}) VALUES", c.names.join(",")))
        }
        // No addressable key; dump in storage order.
        None => (
            format!("SELECT * FROM aux.{id}"),
            format!("INSERT INTO {id} VALUES"),
        ),
    };

    let mut stmt = conn.prepare(&select)?;
    let n_col = stmt.column_count();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        out.push_str(&insert_prefix);
        for i in 0..n_col {
            out.push(if i == 0 { '(' } else { ',' });
            write_literal(out, row.get_ref(i)?);
        }
        out.push_str(");\n");
    }
    drop(rows);
    drop(stmt);

    let mut stmt = conn.prepare(
        "SELECT sql FROM aux.sqlite_schema \
         WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL",
    )?;
    let mut rows = stmt.query([table])?;
    while let Some(row) = rows.next()? {
        let sql: String = row.get(0)?;
        out.push_str(&sql);
        out.push_str(";\n");
    }
    Ok(())
}

/// Indexes present on `main` whose SQL no longer appears on `aux` get
/// dropped ahead of the row diff.
fn drop_obsolete_indexes(conn: &Connection, table: &str, out: &mut String) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT name FROM main.sqlite_schema \
         WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL \
           AND sql NOT IN (SELECT sql FROM aux.sqlite_schema \
                            WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL)",
    )?;
    let mut rows = stmt.query([table])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        out.push_str(&format!("DROP INDEX {};\n", quote_ident(&name)));
    }
    Ok(())
}

/// Indexes present on `aux` but absent from `main` are recreated verbatim
/// after the row diff.
fn create_missing_indexes(conn: &Connection, table: &str, out: &mut String) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM aux.sqlite_schema \
         WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL \
           AND sql NOT IN (SELECT sql FROM main.sqlite_schema \
                            WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL)",
    )?;
    let mut rows = stmt.query([table])?;
    while let Some(row) = rows.next()? {
        let sql: String = row.get(0)?;
        out.push_str(&sql);
        out.push_str(";\n");
    }
    Ok(())
}

fn dump_column_resolution(
    table: &str,
    main: Option<&TableColumns>,
    aux: Option<&TableColumns>,
) {
    for (db, cols) in [("main", main), ("aux", aux)] {
        match cols {
            Some(c) => eprintln!(
                "columns of {db}.{table}: [{}] nPk={} rowid={}",
                c.names.join(", "),
                c.n_pk,
                c.implicit_rowid
            ),
            None => eprintln!("columns of {db}.{table}: no usable PK"),
        }
    }
}
