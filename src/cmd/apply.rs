use crate::journal::apply_journal;
use std::path::PathBuf;

pub fn run(db: PathBuf, journal: PathBuf, offset: u64, verbose: bool) -> anyhow::Result<()> {
    if !db.exists() {
        anyhow::bail!("Database does not exist: {}", db.display());
    }
    if !journal.exists() {
        anyhow::bail!("Journal does not exist: {}", journal.display());
    }

    let stats = apply_journal(&db, &journal, offset, verbose)?;
    eprintln!("applied {} statement(s), {} failed", stats.applied, stats.failed);
    Ok(())
}
