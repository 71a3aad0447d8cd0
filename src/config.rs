use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Deserialize;

/// Config file name looked up in the fixture root and its ancestors.
pub const CONFIG_FILENAME: &str = ".relocate.toml";

pub const DEFAULT_BASE_MODULE: &str = "github.com/microsoft/vscode-go/gofixtures/debug/";
pub const DEFAULT_EXTENSION: &str = ".go";
pub const DEFAULT_INITIALIZER: [&str; 3] = ["go", "mod", "init"];

/// Names never relocated regardless of configuration.
pub const ALWAYS_EXCLUDED: [&str; 3] = ["LICENSE", "LICENSE.txt", CONFIG_FILENAME];

/// Contents of a `.relocate.toml` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub base_module: Option<String>,
    pub extension: Option<String>,
    pub initializer: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub on_error: Option<FailurePolicy>,
}

/// What to do when moving a file, listing a directory or spawning the
/// initializer fails.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Skip,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Skip => "skip",
        }
    }
}

/// Load a configuration file from disk and deserialize it.
pub fn load_from_path(path: &Utf8Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
    parse(&raw).with_context(|| format!("parsing config {}", path))
}

fn parse(raw: &str) -> Result<FileConfig> {
    Ok(toml::from_str(raw)?)
}
