use crate::differ::{DiffConfig, Differ};
use crate::watcher::{EventMask, WatchController};
use std::path::PathBuf;

pub fn run(dir: PathBuf, event: String, config: DiffConfig) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mask: EventMask = event
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let controller = WatchController::new(dir, mask, Differ::new(config));
    controller.run()
}
