use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::cli::Cli;
use crate::config::{self, FailurePolicy, FileConfig};
use crate::process::SystemRunner;
use crate::relocate::{self, RelocateOptions};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConfigPathSource {
    Explicit,
    Discovered,
    UserDefault,
}

impl ConfigPathSource {
    fn as_str(&self) -> &'static str {
        match self {
            ConfigPathSource::Explicit => "explicit",
            ConfigPathSource::Discovered => "discovered",
            ConfigPathSource::UserDefault => "user-default",
        }
    }
}

#[derive(Clone, Debug)]
struct ResolvedConfigPath {
    path: Utf8PathBuf,
    source: ConfigPathSource,
}

pub fn run(cli: Cli) -> Result<()> {
    run_with_output(cli, &mut io::stdout().lock())
}

/// Same as [`run`], with progress lines written to `out`.
fn run_with_output<W: Write>(cli: Cli, out: &mut W) -> Result<()> {
    let root = resolve_root(cli.root.as_deref())?;
    let resolved = resolve_config_path(cli.file.as_deref(), &root, dirs::config_dir())?;

    let file_config = match &resolved {
        Some(resolved) => {
            info!(path = %resolved.path, source = resolved.source.as_str(), "loading config");
            config::load_from_path(&resolved.path)?
        }
        None => FileConfig::default(),
    };
    let options = build_options(&cli, file_config, self_name())?;
    info!(
        root = %root,
        policy = options.on_error.as_str(),
        dry_run = options.dry_run,
        "relocating fixtures"
    );

    let report = relocate::relocate(&root, &options, &mut SystemRunner, out)?;
    info!(
        directories = report.directories_visited,
        relocated = report.relocated,
        excluded = report.excluded,
        not_regular = report.not_regular,
        dir_create_failures = report.dir_create_failures,
        init_failures = report.init_failures,
        "relocation complete"
    );

    let skipped = report.error_skips();
    if skipped > 0 {
        bail!("{} item(s) skipped after errors", skipped);
    }
    Ok(())
}

fn resolve_root(root: Option<&Path>) -> Result<Utf8PathBuf> {
    let root = match root {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("determining current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("resolving fixture root {}", root.display()))?;
    Utf8PathBuf::from_path_buf(root).map_err(|_| anyhow!("fixture root must be valid UTF-8"))
}

/// Explicit `--file`, else `.relocate.toml` in the root or an ancestor, else the
/// user config dir. `None` means built-in defaults.
fn resolve_config_path(
    explicit: Option<&Path>,
    root: &Utf8Path,
    user_config_dir: Option<PathBuf>,
) -> Result<Option<ResolvedConfigPath>> {
    if let Some(path) = explicit {
        let path = Utf8PathBuf::from_path_buf(path.to_path_buf())
            .map_err(|_| anyhow!("config path must be valid UTF-8"))?;
        return Ok(Some(ResolvedConfigPath {
            path,
            source: ConfigPathSource::Explicit,
        }));
    }

    let mut dir = Some(root);
    while let Some(current) = dir {
        let candidate = current.join(config::CONFIG_FILENAME);
        if candidate.is_file() {
            return Ok(Some(ResolvedConfigPath {
                path: candidate,
                source: ConfigPathSource::Discovered,
            }));
        }
        dir = current.parent();
    }

    let Some(mut path) = user_config_dir else {
        return Ok(None);
    };
    path.push("relocate-fixtures");
    path.push("config.toml");
    if !path.is_file() {
        return Ok(None);
    }
    let path = Utf8PathBuf::from_path_buf(path)
        .map_err(|_| anyhow!("config path must be valid UTF-8"))?;
    Ok(Some(ResolvedConfigPath {
        path,
        source: ConfigPathSource::UserDefault,
    }))
}

/// File name of the running executable, which is never relocated.
fn self_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_name().and_then(|name| name.to_str()).map(str::to_owned)
}

/// Merge CLI flags over file config over built-in defaults.
fn build_options(
    cli: &Cli,
    file: FileConfig,
    self_name: Option<String>,
) -> Result<RelocateOptions> {
    let initializer = cli
        .init_argv()
        .or(file.initializer)
        .unwrap_or_else(|| Vec::from(config::DEFAULT_INITIALIZER.map(str::to_owned)));
    if initializer.is_empty() {
        bail!("initializer command must not be empty");
    }

    let mut excluded: BTreeSet<String> =
        config::ALWAYS_EXCLUDED.iter().map(|name| name.to_string()).collect();
    excluded.extend(self_name);
    excluded.extend(file.exclude.unwrap_or_default());
    excluded.extend(cli.exclude.iter().cloned());

    let on_error = if cli.keep_going {
        FailurePolicy::Skip
    } else {
        file.on_error.unwrap_or_default()
    };

    Ok(RelocateOptions {
        base_module: cli
            .base_module
            .clone()
            .or(file.base_module)
            .unwrap_or_else(|| config::DEFAULT_BASE_MODULE.to_owned()),
        extension: cli
            .extension
            .clone()
            .or(file.extension)
            .unwrap_or_else(|| config::DEFAULT_EXTENSION.to_owned()),
        initializer,
        excluded,
        on_error,
        dry_run: cli.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        (dir, root)
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["relocate-fixtures"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn resolve_config_prefers_explicit_file() {
        let (_guard, root) = temp_root();
        fs::write(root.join(config::CONFIG_FILENAME), "").unwrap();
        let explicit = root.join("explicit.toml");

        let resolved = resolve_config_path(Some(explicit.as_std_path()), &root, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.source, ConfigPathSource::Explicit);
        assert!(resolved.path.ends_with("explicit.toml"));
    }

    #[test]
    fn resolve_config_discovers_nearest_ancestor() {
        let (_guard, root) = temp_root();
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(root.join("a").join(config::CONFIG_FILENAME), "").unwrap();

        let resolved = resolve_config_path(None, &nested, None).unwrap().unwrap();
        assert_eq!(resolved.source, ConfigPathSource::Discovered);
        assert_eq!(resolved.path, root.join("a").join(config::CONFIG_FILENAME));
    }

    #[test]
    fn resolve_config_falls_back_to_user_dir_then_defaults() {
        let (_guard, root) = temp_root();
        let fixtures = root.join("fixtures");
        let user_dir = root.join("user");
        fs::create_dir_all(&fixtures).unwrap();

        let user_std = user_dir.clone().into_std_path_buf();
        let none = resolve_config_path(None, &fixtures, Some(user_std.clone())).unwrap();
        assert!(none.is_none());

        fs::create_dir_all(user_dir.join("relocate-fixtures")).unwrap();
        fs::write(user_dir.join("relocate-fixtures").join("config.toml"), "").unwrap();
        let resolved = resolve_config_path(None, &fixtures, Some(user_std))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.source, ConfigPathSource::UserDefault);
    }

    #[test]
    fn defaults_match_go_fixture_layout() {
        let self_name = Some("relocate-fixtures".to_owned());
        let options = build_options(&cli(&[]), FileConfig::default(), self_name).unwrap();
        assert_eq!(options.base_module, config::DEFAULT_BASE_MODULE);
        assert_eq!(options.extension, ".go");
        assert_eq!(options.initializer, vec!["go", "mod", "init"]);
        assert_eq!(options.on_error, FailurePolicy::Abort);
        for name in ["LICENSE", "LICENSE.txt", config::CONFIG_FILENAME, "relocate-fixtures"] {
            assert!(options.excluded.contains(name), "{name} should be excluded");
        }
    }

    #[test]
    fn cli_overrides_file_config() {
        let file = FileConfig {
            base_module: Some("file.example/".to_owned()),
            extension: Some(".txt".to_owned()),
            initializer: Some(vec!["make".to_owned()]),
            exclude: Some(vec!["setup.py".to_owned()]),
            on_error: Some(FailurePolicy::Abort),
        };
        let args = cli(&[
            "--base-module",
            "cli.example/",
            "--init-command",
            "go mod init",
            "-k",
            "--exclude",
            "README",
        ]);
        let options = build_options(&args, file, None).unwrap();
        assert_eq!(options.base_module, "cli.example/");
        assert_eq!(options.extension, ".txt");
        assert_eq!(options.initializer, vec!["go", "mod", "init"]);
        assert_eq!(options.on_error, FailurePolicy::Skip);
        assert!(options.excluded.contains("setup.py"));
        assert!(options.excluded.contains("README"));
    }

    #[test]
    fn empty_initializer_is_rejected() {
        let file = FileConfig {
            initializer: Some(Vec::new()),
            ..FileConfig::default()
        };
        let err = build_options(&cli(&[]), file, None).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[cfg(unix)]
    #[test]
    fn run_relocates_with_configured_initializer() {
        let (_guard, root) = temp_root();
        fs::write(root.join("foo.go"), "package main\n").unwrap();
        fs::write(
            root.join(config::CONFIG_FILENAME),
            "initializer = [\"sh\", \"-c\", \"echo $0 > module.txt\"]\nbase_module = \"x/\"\n",
        )
        .unwrap();

        let mut out = Vec::new();
        run_with_output(cli(&[root.as_str()]), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(root.join("foo").join("foo.go").is_file());
        let module = fs::read_to_string(root.join("foo").join("module.txt")).unwrap();
        assert_eq!(module.trim(), "x/foo");
        assert!(out.contains(&format!("Relocating test fixtures from {root}")));
        assert!(out.contains("Running command with args 'sh -c \"echo $0 > module.txt\" x/foo'"));
        assert!(root.join(config::CONFIG_FILENAME).is_file());
    }

    #[cfg(unix)]
    #[test]
    fn run_fails_after_skipping_errors() {
        let (_guard, root) = temp_root();
        fs::create_dir_all(root.join("foo")).unwrap();
        fs::write(root.join("foo.go"), "").unwrap();
        fs::write(root.join("foo").join("foo.go"), "").unwrap();

        let mut out = Vec::new();
        let args = cli(&[root.as_str(), "--init-command", "true", "-k"]);
        let err = run_with_output(args, &mut out).unwrap_err();
        let out = String::from_utf8(out).unwrap();

        assert!(err.to_string().contains("1 item(s) skipped"));
        assert!(out.contains("Skipping after error"));
        assert!(root.join("foo.go").is_file());
    }
}
