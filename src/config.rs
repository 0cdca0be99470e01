use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::cli::{Cli, GenerateArgs};
use crate::extract::{DEFAULT_IGNORED, ExtractorOptions};

pub const DEFAULT_OUTPUT: &str = "annotations.json";
pub const DEFAULT_CACHE_DIR: &str = ".annotation-collector";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub include_paths: Vec<PathBuf>,
    pub exclude_pattern: Option<String>,
    pub output_artifact_path: PathBuf,
    pub use_cache: bool,
    pub capture_arguments: bool,
    pub cache_dir: PathBuf,
    pub ignored_annotations: BTreeSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            exclude_pattern: None,
            output_artifact_path: PathBuf::from(DEFAULT_OUTPUT),
            use_cache: true,
            capture_arguments: true,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            ignored_annotations: DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Reads a JSON config. Relative paths are taken relative to the file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.include_paths = config
                .include_paths
                .iter()
                .map(|p| relative_to(base, p))
                .collect();
            config.output_artifact_path = relative_to(base, &config.output_artifact_path);
            config.cache_dir = relative_to(base, &config.cache_dir);
        }
        Ok(config)
    }

    pub fn apply_generate(&mut self, args: &GenerateArgs) {
        if !args.include.is_empty() {
            self.include_paths = args.include.clone();
        }
        if let Some(pattern) = &args.exclude {
            self.exclude_pattern = Some(pattern.clone());
        }
        if let Some(output) = &args.output {
            self.output_artifact_path = output.clone();
        }
        if let Some(dir) = &args.cache_dir {
            self.cache_dir = dir.clone();
        }
        if args.no_cache {
            self.use_cache = false;
        }
        if args.no_capture_arguments {
            self.capture_arguments = false;
        }
    }

    pub fn exclude_regex(&self) -> Result<Option<Regex>> {
        self.exclude_pattern
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).with_context(|| format!("Invalid exclude_pattern '{p}'"))
            })
            .transpose()
    }

    pub fn extractor_options(&self) -> ExtractorOptions {
        ExtractorOptions {
            ignored: self.ignored_annotations.clone(),
            capture_arguments: self.capture_arguments,
            ..ExtractorOptions::default()
        }
    }
}

pub fn resolve_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

pub fn resolve_cache_dir(cli: &Cli, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    Ok(resolve_config(cli)?.cache_dir)
}

pub fn resolve_artifact_path(cli: &Cli, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    Ok(resolve_config(cli)?.output_artifact_path)
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
