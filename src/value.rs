//! SQL literal rendering for result-set values.
//!
//! Every cell that ends up in a generated patch statement passes through
//! here: integers as plain decimal, floats in their shortest round-trip
//! form, text single-quoted with internal quotes doubled, blobs as
//! lowercase-hex `x'..'` literals, and NULL as the keyword.

use rusqlite::types::ValueRef;

/// Append the SQL-literal form of `v` to `out`.
pub fn write_literal(out: &mut String, v: ValueRef<'_>) {
    match v {
        ValueRef::Null => out.push_str("NULL"),
        ValueRef::Integer(i) => {
            out.push_str(&i.to_string());
        }
        ValueRef::Real(r) => write_real(out, r),
        ValueRef::Text(t) => {
            // Invalid UTF-8 cannot come back from SQLite text columns we
            // wrote ourselves; replace defensively rather than abort.
            let s = String::from_utf8_lossy(t);
            out.push('\'');
            for c in s.chars() {
                if c == '\'' {
                    out.push_str("''");
                } else {
                    out.push(c);
                }
            }
            out.push('\'');
        }
        ValueRef::Blob(b) => {
            out.push_str("x'");
            out.push_str(&hex::encode(b));
            out.push('\'');
        }
    }
}

/// Render a value as a standalone literal string.
pub fn literal(v: ValueRef<'_>) -> String {
    let mut s = String::new();
    write_literal(&mut s, v);
    s
}

/// Quote a string as an SQL text literal (single quotes doubled).
pub fn quote_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    write_literal(&mut out, ValueRef::Text(s.as_bytes()));
    out
}

fn write_real(out: &mut String, r: f64) {
    if r.is_infinite() {
        // SQLite's canonical literal for out-of-range reals.
        out.push_str(if r > 0.0 { "1e999" } else { "-1e999" });
        return;
    }
    let s = r.to_string();
    out.push_str(&s);
    // Keep REAL affinity: "1" would round-trip as an integer.
    if !s.contains(['.', 'e', 'E']) {
        out.push_str(".0");
    }
}
