use crate::differ::{DiffConfig, Differ};
use crate::journal::JournalWriter;
use std::path::PathBuf;

pub fn run(
    old: PathBuf,
    new: PathBuf,
    output: Option<PathBuf>,
    config: DiffConfig,
) -> anyhow::Result<()> {
    if !old.exists() {
        anyhow::bail!("Old database does not exist: {}", old.display());
    }
    if !new.exists() {
        anyhow::bail!("New database does not exist: {}", new.display());
    }

    let verbose = config.verbose;
    let differ = Differ::new(config);
    let result = match output {
        Some(path) => {
            let mut journal = JournalWriter::append_file(&path)?;
            differ.diff_to_journal(&old, &new, &mut journal)?
        }
        None => {
            let mut journal = JournalWriter::stdout();
            differ.diff_to_journal(&old, &new, &mut journal)?
        }
    };

    if verbose {
        match result {
            Some(offset) => eprintln!("patch recorded at offset {offset}"),
            None => eprintln!("no differences"),
        }
    }
    Ok(())
}
