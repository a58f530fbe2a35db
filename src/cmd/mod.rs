mod apply;
mod diff;
mod watch;

use crate::differ::DiffConfig;
use crate::schema::SchemaMode;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

const AFTER_HELP: &str = "\x1b[1mCommon workflows:\x1b[0m
  Print the patch that turns backup.db into live.db:
    sqlite-mirror diff backup.db live.db

  Record the patch in a journal and replay it:
    sqlite-mirror diff backup.db live.db -o patches/live.db
    sqlite-mirror apply backup.db patches/live.db --offset 0

  Keep every replica under data/ in sync:
    sqlite-mirror watch data/ --transaction -v

\x1b[1mMore info:\x1b[0m
  Run 'sqlite-mirror <command> --help' for command-specific options.";

#[derive(Parser)]
#[command(name = "sqlite-mirror")]
#[command(version)]
#[command(
    about = "Maintains live replicas of SQLite databases via differential SQL patch journals"
)]
#[command(after_help = AFTER_HELP)]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

// Help heading constants for consistency
const INPUT_OUTPUT: &str = "Input/Output";
const MODE: &str = "Mode";
const BEHAVIOR: &str = "Behavior";
const OUTPUT_FORMAT: &str = "Output";

#[derive(Subcommand)]
pub enum Commands {
    /// Compute the SQL patch that transforms one database into another
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  sqlite-mirror diff backup.db live.db
  sqlite-mirror diff backup.db live.db -o patches/live.db --transaction
  sqlite-mirror diff backup.db live.db --rbu")]
    Diff {
        /// Source database (the copy the patch will be applied to)
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        old: PathBuf,

        /// Target database (what the source should become)
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        new: PathBuf,

        /// Append the patch to this journal file instead of stdout
        #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        output: Option<PathBuf>,

        /// Emit RBU staging-table rows instead of direct DML
        #[arg(long, help_heading = MODE)]
        rbu: bool,

        /// Resolve primary keys from the declared PRIMARY KEY clause
        #[arg(long, help_heading = MODE)]
        primarykey: bool,

        /// Wrap the patch in BEGIN TRANSACTION/COMMIT
        #[arg(long, help_heading = BEHAVIOR)]
        transaction: bool,

        /// Load an extension library before diffing (repeatable)
        #[arg(short = 'L', long = "lib", value_name = "PATH", help_heading = BEHAVIOR)]
        lib: Vec<PathBuf>,

        /// Diagnostic bits: 1 = dump column resolution, 2 = print diff SQL
        #[arg(long, value_name = "BITS", default_value_t = 0, help_heading = OUTPUT_FORMAT)]
        debug: u32,

        /// Show progress output
        #[arg(short, long, help_heading = OUTPUT_FORMAT)]
        verbose: bool,
    },

    /// Replay a patch journal onto a database
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  sqlite-mirror apply backup.db patches/live.db
  sqlite-mirror apply backup.db patches/live.db --offset 1024")]
    Apply {
        /// Database to patch
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        db: PathBuf,

        /// Journal file holding the recorded patches
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        journal: PathBuf,

        /// Byte offset to start replaying from
        #[arg(long, default_value_t = 0, help_heading = BEHAVIOR)]
        offset: u64,

        /// Print each statement as it is applied
        #[arg(short, long, help_heading = OUTPUT_FORMAT)]
        verbose: bool,
    },

    /// Watch a directory of databases and keep their replicas in sync
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  sqlite-mirror watch data/
  sqlite-mirror watch data/ --event modify --transaction -v

Replicas live in <dir>/backup/, patch journals in <dir>/patches/.")]
    Watch {
        /// Directory holding the primary databases
        #[arg(value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        dir: PathBuf,

        /// Filesystem event that triggers a diff: close_write, modify
        #[arg(long, default_value = "close_write", help_heading = BEHAVIOR)]
        event: String,

        /// Emit RBU staging-table rows instead of direct DML
        #[arg(long, help_heading = MODE)]
        rbu: bool,

        /// Resolve primary keys from the declared PRIMARY KEY clause
        #[arg(long, help_heading = MODE)]
        primarykey: bool,

        /// Wrap each patch in BEGIN TRANSACTION/COMMIT
        #[arg(long, help_heading = BEHAVIOR)]
        transaction: bool,

        /// Load an extension library before diffing (repeatable)
        #[arg(short = 'L', long = "lib", value_name = "PATH", help_heading = BEHAVIOR)]
        lib: Vec<PathBuf>,

        /// Diagnostic bits: 1 = dump column resolution, 2 = print diff SQL
        #[arg(long, value_name = "BITS", default_value_t = 0, help_heading = OUTPUT_FORMAT)]
        debug: u32,

        /// Report each event and patch on stderr
        #[arg(short, long, help_heading = OUTPUT_FORMAT)]
        verbose: bool,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Diff {
            old,
            new,
            output,
            rbu,
            primarykey,
            transaction,
            lib,
            debug,
            verbose,
        } => diff::run(
            old,
            new,
            output,
            diff_config(rbu, primarykey, transaction, lib, debug, verbose),
        ),
        Commands::Apply { db, journal, offset, verbose } => {
            apply::run(db, journal, offset, verbose)
        }
        Commands::Watch {
            dir,
            event,
            rbu,
            primarykey,
            transaction,
            lib,
            debug,
            verbose,
        } => watch::run(
            dir,
            event,
            diff_config(rbu, primarykey, transaction, lib, debug, verbose),
        ),
    }
}

fn diff_config(
    rbu: bool,
    primarykey: bool,
    transaction: bool,
    lib: Vec<PathBuf>,
    debug: u32,
    verbose: bool,
) -> DiffConfig {
    DiffConfig {
        schema_mode: if primarykey { SchemaMode::SchemaPk } else { SchemaMode::TruePk },
        rbu,
        transaction,
        debug,
        verbose,
        extensions: lib,
    }
}
