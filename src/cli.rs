use std::path::PathBuf;

use clap::Parser;

/// Move each fixture file into its own module directory and initialize it.
#[derive(Parser, Debug)]
#[command(
    name = "relocate-fixtures",
    version,
    about = "Relocate test fixtures into per-fixture modules"
)]
pub struct Cli {
    /// Root of the fixture tree (defaults to the current directory).
    #[arg()]
    pub root: Option<PathBuf>,
    /// Explicit config file; skips discovery.
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,
    /// Prefix joined with the target name to form the module identifier.
    #[arg(long = "base-module")]
    pub base_module: Option<String>,
    /// Extension suffix stripped from file names.
    #[arg(long = "extension")]
    pub extension: Option<String>,
    /// Initializer command, whitespace separated (e.g. "go mod init").
    #[arg(long = "init-command")]
    pub init_command: Option<String>,
    /// Additional file names that are never relocated.
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
    /// Skip items that fail to move or list instead of aborting the run.
    #[arg(short = 'k', long = "keep-going")]
    pub keep_going: bool,
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Initializer tokens from `--init-command`, if given.
    pub fn init_argv(&self) -> Option<Vec<String>> {
        self.init_command
            .as_deref()
            .map(|raw| raw.split_whitespace().map(str::to_owned).collect())
    }
}

/// Helper entry point so `main` can stay minimal.
pub fn parse() -> Cli {
    Cli::parse()
}
