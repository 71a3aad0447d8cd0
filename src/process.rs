use std::process::{Command as ProcessCommand, ExitStatus};

use anyhow::{Context, Result, bail};
use camino::Utf8Path;

/// Exit status of a finished external command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Runs an external command to completion in a given working directory.
pub trait ProcessRunner {
    fn run(&mut self, argv: &[String], cwd: &Utf8Path) -> Result<ExitOutcome>;
}

/// Spawns real processes, inheriting stdout and stderr.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&mut self, argv: &[String], cwd: &Utf8Path) -> Result<ExitOutcome> {
        let Some((program, args)) = argv.split_first() else {
            bail!("invalid initializer command: empty argv");
        };
        let status = ProcessCommand::new(program)
            .args(args)
            .current_dir(cwd)
            .status()
            .with_context(|| format!("executing `{}` in {}", format_command(argv), cwd))?;
        Ok(status.into())
    }
}

pub fn format_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.chars().any(|c| c.is_whitespace()) {
                let escaped = arg.replace('"', "\\\"");
                format!("\"{}\"", escaped)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
