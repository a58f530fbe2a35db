//! Change controller: filesystem events in, patched replicas out.
//!
//! Watches a primary directory (non-recursively) for database writes. Each
//! qualifying event resolves to a `(primary, backup, journal)` path triple;
//! the differ appends a patch to the journal and the applier replays it
//! onto the backup. Events are handled strictly in delivery order, one at
//! a time. Interruption is a flag set from the signal handler and checked
//! between events; the first Ctrl-C ends the loop cleanly.

use crate::differ::Differ;
use crate::journal::{apply_journal, JournalWriter};
use anyhow::{bail, Context, Result};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Which filesystem events trigger a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventMask {
    /// A writable file descriptor was closed; the write is complete.
    #[default]
    CloseWrite,
    /// File content changed. The writer may still hold the engine's file
    /// lock, so handling waits 250 ms before diffing.
    Modify,
}

impl FromStr for EventMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "close_write" => Ok(Self::CloseWrite),
            "modify" => Ok(Self::Modify),
            _ => Err(format!("Unknown event mask: {s}. Use: close_write, modify")),
        }
    }
}

/// Settle time before diffing on a bare modify event.
const MODIFY_SETTLE: Duration = Duration::from_millis(250);

/// How often the loop wakes up to check the interrupt flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct WatchController {
    dir: PathBuf,
    mask: EventMask,
    differ: Differ,
    verbose: bool,
}

impl WatchController {
    pub fn new(dir: PathBuf, mask: EventMask, differ: Differ) -> Self {
        let verbose = differ.config().verbose;
        WatchController { dir, mask, differ, verbose }
    }

    /// Watch until interrupted. Returns `Ok(())` on a clean Ctrl-C exit.
    pub fn run(&self) -> Result<()> {
        fs::create_dir_all(self.dir.join("backup"))
            .with_context(|| format!("cannot create {}/backup", self.dir.display()))?;
        fs::create_dir_all(self.dir.join("patches"))
            .with_context(|| format!("cannot create {}/patches", self.dir.display()))?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("cannot install interrupt handler")?;

        let (tx, rx) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(tx).context("cannot create filesystem watcher")?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("cannot watch {}", self.dir.display()))?;

        if self.verbose {
            eprintln!("watching {}", self.dir.display());
        }

        while !interrupted.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => self.handle_event(&event)?,
                Ok(Err(e)) => bail!("watch error: {e}"),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => bail!("watcher channel closed"),
            }
        }
        if self.verbose {
            eprintln!("interrupted, exiting");
        }
        Ok(())
    }

    fn wants(&self, kind: &EventKind) -> bool {
        match self.mask {
            EventMask::CloseWrite => {
                matches!(kind, EventKind::Access(AccessKind::Close(AccessMode::Write)))
            }
            EventMask::Modify => matches!(kind, EventKind::Modify(_)),
        }
    }

    fn handle_event(&self, event: &Event) -> Result<()> {
        if !self.wants(&event.kind) {
            return Ok(());
        }
        // Only the first path of a delivered event is handled; the
        // diff+apply cycle below may invalidate anything batched after it.
        let Some(path) = event.paths.first() else {
            return Ok(());
        };
        if path.parent() != Some(self.dir.as_path()) || !path.is_file() {
            return Ok(());
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        if name.contains("-journal") {
            return Ok(());
        }
        if self.mask == EventMask::Modify {
            thread::sleep(MODIFY_SETTLE);
        }
        self.sync_one(name)
    }

    /// Diff `<dir>/<name>` against its backup and replay the patch.
    fn sync_one(&self, name: &str) -> Result<()> {
        let (primary, backup, patch) = replica_paths(&self.dir, name);

        if self.verbose {
            eprintln!("change detected: {name}");
        }
        let mut journal = JournalWriter::append_file(&patch)?;
        match self.differ.diff_to_journal(&backup, &primary, &mut journal)? {
            Some(offset) => {
                let stats = apply_journal(&backup, &patch, offset, self.verbose)?;
                if self.verbose {
                    eprintln!(
                        "{name}: applied {} statement(s), {} failed",
                        stats.applied, stats.failed
                    );
                }
            }
            None => {
                if self.verbose {
                    eprintln!("{name}: no differences");
                }
            }
        }
        Ok(())
    }
}

/// Resolve the path triple for a primary database name.
pub fn replica_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf, PathBuf) {
    (
        dir.join(name),
        dir.join("backup").join(name),
        dir.join("patches").join(name),
    )
}
