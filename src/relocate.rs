//! Moves fixture files into per-fixture module directories.
//!
//! The whole tree is listed before anything is moved, so directories created
//! (or filled) during the run are never mistaken for input.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::config::FailurePolicy;
use crate::process::{ProcessRunner, format_command};

#[derive(Clone, Debug)]
pub struct RelocateOptions {
    /// Prefix of every module identifier, e.g. `example.com/fixtures/`.
    pub base_module: String,
    /// Suffix stripped from file names to form the target module name.
    pub extension: String,
    /// Initializer argv; the module identifier is appended as the last argument.
    pub initializer: Vec<String>,
    pub excluded: BTreeSet<String>,
    pub on_error: FailurePolicy,
    pub dry_run: bool,
}

/// Tally of a run. In a dry run `relocated` counts planned moves.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RelocationReport {
    pub directories_visited: usize,
    pub relocated: usize,
    pub excluded: usize,
    pub not_regular: usize,
    pub dir_create_failures: usize,
    pub move_failures: usize,
    pub traversal_failures: usize,
    pub spawn_failures: usize,
    pub init_failures: usize,
}

impl RelocationReport {
    /// Items skipped because of an error under [`FailurePolicy::Skip`].
    pub fn error_skips(&self) -> usize {
        self.move_failures + self.traversal_failures + self.spawn_failures
    }
}

/// Files of one directory as they were before the run touched anything.
#[derive(Debug)]
struct DirSnapshot {
    dir: Utf8PathBuf,
    files: Vec<String>,
}

/// Name of the directory a fixture moves into: `foo.go` -> `foo`, `bar` -> `bar`.
pub fn target_module_name<'a>(file_name: &'a str, extension: &str) -> &'a str {
    match file_name.strip_suffix(extension) {
        Some(stem) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

pub fn module_identifier(base_module: &str, module_name: &str) -> String {
    format!("{base_module}{module_name}")
}

/// Relocate every candidate file below `root`, writing progress to `out`.
pub fn relocate<R, W>(
    root: &Utf8Path,
    options: &RelocateOptions,
    runner: &mut R,
    out: &mut W,
) -> Result<RelocationReport>
where
    R: ProcessRunner,
    W: Write,
{
    let mut relocator = Relocator {
        options,
        runner,
        out,
        report: RelocationReport::default(),
    };

    let mut snapshots = Vec::new();
    relocator.scan(root, &mut snapshots)?;
    debug!(directories = snapshots.len(), root = %root, "scanned fixture tree");

    for snapshot in &snapshots {
        relocator.visit(snapshot)?;
    }
    Ok(relocator.report)
}

struct Relocator<'a, R, W> {
    options: &'a RelocateOptions,
    runner: &'a mut R,
    out: &'a mut W,
    report: RelocationReport,
}

impl<R: ProcessRunner, W: Write> Relocator<'_, R, W> {
    /// Pre-order listing of `dir` and everything below it.
    fn scan(&mut self, dir: &Utf8Path, snapshots: &mut Vec<DirSnapshot>) -> Result<()> {
        let (files, subdirs) = match list_dir(dir) {
            Ok(listing) => listing,
            Err(err) => return self.recover(err, |report| report.traversal_failures += 1),
        };
        snapshots.push(DirSnapshot {
            dir: dir.to_owned(),
            files,
        });
        for name in subdirs {
            self.scan(&dir.join(name), snapshots)?;
        }
        Ok(())
    }

    fn visit(&mut self, snapshot: &DirSnapshot) -> Result<()> {
        self.report.directories_visited += 1;
        writeln!(self.out, "Relocating test fixtures from {}", snapshot.dir)?;
        for name in &snapshot.files {
            self.process_file(&snapshot.dir, name)?;
        }
        writeln!(self.out, "Finished")?;
        Ok(())
    }

    fn process_file(&mut self, dir: &Utf8Path, name: &str) -> Result<()> {
        let source = dir.join(name);
        if self.options.excluded.contains(name) {
            debug!(file = %source, "excluded");
            self.report.excluded += 1;
            return Ok(());
        }
        // Follows symlinks; broken links and anything moved away meanwhile fall out here.
        if !source.is_file() {
            debug!(file = %source, "not a regular file");
            self.report.not_regular += 1;
            return Ok(());
        }

        let module_name = target_module_name(name, &self.options.extension);
        let target_dir = dir.join(module_name);
        let destination = target_dir.join(name);
        let mut argv = self.options.initializer.clone();
        argv.push(module_identifier(&self.options.base_module, module_name));

        if self.options.dry_run {
            writeln!(self.out, "(dry-run) would create the directory {}", target_dir)?;
            writeln!(self.out, "(dry-run) would move {} to {}", source, destination)?;
            writeln!(
                self.out,
                "(dry-run) would run command with args '{}' in {}",
                format_command(&argv),
                target_dir
            )?;
            self.report.relocated += 1;
            return Ok(());
        }

        // `bar` needs the path `bar` for its own directory.
        let staged = module_name == name;
        let moving_from = if staged {
            match stage(dir, name) {
                Ok(path) => path,
                Err(err) => return self.recover(err, |report| report.move_failures += 1),
            }
        } else {
            source.clone()
        };

        let created = match fs::create_dir(&target_dir) {
            Ok(()) => {
                writeln!(self.out, "Successfully created the directory {}", target_dir)?;
                true
            }
            Err(err) => {
                warn!(dir = %target_dir, error = %err, "directory creation failed");
                writeln!(
                    self.out,
                    "Creation of the directory {} failed: {}",
                    target_dir, err
                )?;
                self.report.dir_create_failures += 1;
                false
            }
        };

        if let Err(err) = move_file(&moving_from, &destination) {
            if staged {
                unstage(&moving_from, &source, &target_dir, created);
            }
            return self.recover(err, |report| report.move_failures += 1);
        }
        self.report.relocated += 1;
        info!(from = %source, to = %destination, "relocated fixture");

        writeln!(self.out, "Running command with args '{}'", format_command(&argv))?;
        match self.runner.run(&argv, &target_dir) {
            Ok(outcome) if outcome.success() => Ok(()),
            Ok(outcome) => {
                warn!(dir = %target_dir, code = ?outcome.code, "initializer failed");
                writeln!(
                    self.out,
                    "[warn] `{}` exited with code {:?}",
                    format_command(&argv),
                    outcome.code
                )?;
                self.report.init_failures += 1;
                Ok(())
            }
            Err(err) => self.recover(err, |report| report.spawn_failures += 1),
        }
    }

    /// Apply the failure policy to an error from a move, listing or spawn.
    fn recover(&mut self, err: anyhow::Error, tally: fn(&mut RelocationReport)) -> Result<()> {
        match self.options.on_error {
            FailurePolicy::Abort => Err(err),
            FailurePolicy::Skip => {
                warn!("{err:#}");
                writeln!(self.out, "Skipping after error: {err:#}")?;
                tally(&mut self.report);
                Ok(())
            }
        }
    }
}

/// Split the entries of `dir` into file names and descendable directory names, both sorted.
fn list_dir(dir: &Utf8Path) -> Result<(Vec<String>, Vec<String>)> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    let entries = fs::read_dir(dir).with_context(|| format!("listing {}", dir))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir))?;
        let Ok(name) = entry.file_name().into_string() else {
            warn!(dir = %dir, name = ?entry.file_name(), "skipping entry with non-UTF-8 name");
            continue;
        };
        let file_type = entry
            .file_type()
            .with_context(|| format!("inspecting {}", dir.join(&name)))?;
        if file_type.is_dir() {
            subdirs.push(name);
        } else if file_type.is_symlink() && dir.join(&name).is_dir() {
            debug!(path = %dir.join(&name), "not following directory symlink");
        } else {
            files.push(name);
        }
    }
    files.sort();
    subdirs.sort();
    Ok((files, subdirs))
}

fn staging_path(dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    dir.join(format!(".{name}.relocating"))
}

fn stage(dir: &Utf8Path, name: &str) -> Result<Utf8PathBuf> {
    let staged = staging_path(dir, name);
    move_file(&dir.join(name), &staged)?;
    Ok(staged)
}

/// Put a staged file back after its move failed. Best effort.
fn unstage(staged: &Utf8Path, original: &Utf8Path, target_dir: &Utf8Path, created: bool) {
    if created {
        if let Err(err) = fs::remove_dir(target_dir) {
            warn!(dir = %target_dir, error = %err, "could not remove directory");
            return;
        }
    }
    if let Err(err) = fs::rename(staged, original) {
        warn!(from = %staged, to = %original, error = %err, "could not restore staged file");
    }
}

/// Rename `from` to `to`, refusing to replace anything already at `to`.
fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    if to.symlink_metadata().is_ok() {
        bail!("cannot move {} to {}: destination already exists", from, to);
    }
    fs::rename(from, to).with_context(|| format!("moving {} to {}", from, to))
}
