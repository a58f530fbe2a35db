//! SCN-journal writing and replay.
//!
//! Each database has an append-only UTF-8 journal of SQL patches. A diff is
//! recorded as a `-- <timestamp>` comment line followed by its statements,
//! optionally bracketed by `BEGIN TRANSACTION;`/`COMMIT;`. The writer hands
//! back the byte offset of the first statement so the applier can resume
//! replay exactly where the newest diff begins.

use anyhow::{bail, Context, Result};
use chrono::Local;
use rusqlite::Connection;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Timestamp format used for journal headers, local time.
const TIMESTAMP_FORMAT: &str = "%d %B %Y %I:%M:%S %p";

/// Append-only journal writer that tracks its own byte offset.
pub struct JournalWriter<W: Write> {
    w: W,
    offset: u64,
}

impl JournalWriter<File> {
    /// Open (or create) the journal at `path` in append mode.
    pub fn append_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("cannot open journal {}", path.display()))?;
        let offset = file.metadata()?.len();
        Ok(JournalWriter { w: file, offset })
    }
}

impl JournalWriter<io::Stdout> {
    /// Journal to standard output. Offsets are counted from zero.
    pub fn stdout() -> Self {
        JournalWriter { w: io::stdout(), offset: 0 }
    }
}

impl<W: Write> JournalWriter<W> {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.w.write_all(s.as_bytes())?;
        self.offset += s.len() as u64;
        Ok(())
    }

    /// Append one diff: timestamp header, then `body` (optionally wrapped
    /// in a transaction). Returns the offset of the first statement, or
    /// `None` when the body is empty. The brackets are never counted as
    /// content, so an empty diff appends only the header line.
    pub fn append_diff(&mut self, body: &str, transaction: bool) -> io::Result<Option<u64>> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        self.write_str(&format!("-- {stamp}\n"))?;
        let fstart = self.offset;
        if body.is_empty() {
            self.w.flush()?;
            return Ok(None);
        }
        if transaction {
            self.write_str("BEGIN TRANSACTION;\n")?;
        }
        self.write_str(body)?;
        if transaction {
            self.write_str("COMMIT;\n")?;
        }
        self.w.flush()?;
        Ok(Some(fstart))
    }

    /// Current end-of-journal offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Outcome of a journal replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyStats {
    pub applied: usize,
    pub failed: usize,
}

/// Replay journal statements from `offset` onto the database at `db`.
///
/// Individual statement failures are logged and skipped; replaying a patch
/// twice is expected to produce such warnings for non-idempotent statements.
pub fn apply_journal(db: &Path, journal: &Path, offset: u64, verbose: bool) -> Result<ApplyStats> {
    let mut file = File::open(journal)
        .with_context(|| format!("cannot open journal {}", journal.display()))?;
    let len = file.metadata()?.len();
    if offset > len {
        bail!(
            "offset {offset} is past the end of {} ({len} bytes)",
            journal.display()
        );
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut text = String::new();
    file.read_to_string(&mut text)
        .with_context(|| format!("journal {} is not valid UTF-8", journal.display()))?;

    let conn = Connection::open(db)
        .with_context(|| format!("cannot open database {}", db.display()))?;

    let mut stats = ApplyStats::default();
    for stmt in split_statements(&text) {
        let stmt = stmt.trim();
        if stmt.is_empty() || stmt.starts_with("--") {
            continue;
        }
        match conn.execute_batch(stmt) {
            Ok(()) => {
                stats.applied += 1;
                if verbose {
                    eprintln!("applied: {stmt}");
                }
            }
            Err(e) => {
                stats.failed += 1;
                eprintln!("warning: statement failed ({e}): {stmt}");
            }
        }
    }
    Ok(stats)
}

/// Split journal text into statements at newlines, but never inside a
/// quoted string, since statements may carry embedded newlines in text literals
/// and quoted identifiers. A newline only ends a statement when the text
/// accumulated so far is complete: a `;`-terminated statement, a comment
/// line, or blank. Catalog schema statements dumped verbatim may span
/// several lines.
pub fn split_statements(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut pos = 0usize;
    let mut quote: Option<u8> = None;

    while pos < bytes.len() {
        match quote {
            Some(q) => match memchr::memchr(q, &bytes[pos..]) {
                Some(rel) => {
                    // A doubled quote reads as close-then-reopen, which
                    // nets out to the same state.
                    quote = None;
                    pos += rel + 1;
                }
                None => {
                    pos = bytes.len();
                }
            },
            None => match memchr::memchr3(b'\n', b'\'', b'"', &bytes[pos..]) {
                Some(rel) => {
                    let i = pos + rel;
                    match bytes[i] {
                        b'\n' => {
                            if is_complete(&text[start..i]) {
                                out.push(&text[start..i]);
                                start = i + 1;
                            }
                        }
                        q => quote = Some(q),
                    }
                    pos = i + 1;
                }
                None => {
                    pos = bytes.len();
                }
            },
        }
    }
    if start < bytes.len() {
        out.push(&text[start..]);
    }
    out
}

fn is_complete(chunk: &str) -> bool {
    let t = chunk.trim();
    t.is_empty() || t.starts_with("--") || t.ends_with(';')
}
