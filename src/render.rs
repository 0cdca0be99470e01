//! Compiled artifact rendering.
//!
//! The artifact is a JSON document with a format version, a location table
//! used to re-load types on demand, and one table of targets per annotation
//! kind. Maps are ordered, so identical input renders identical bytes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::collector::{KindTargets, TransientCollection};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub format_version: u32,
    /// When true, targets carry their arguments and readers build annotation
    /// instances from the artifact alone.
    pub arguments_captured: bool,
    pub types: BTreeMap<String, PathBuf>,
    pub annotations: BTreeMap<String, KindTargets>,
    /// Types the indexed files could name without qualification when the
    /// artifact was generated. Re-parsing readers resolve names against it.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub known_types: BTreeSet<String>,
}

impl Artifact {
    pub fn from_collection(collection: &TransientCollection, arguments_captured: bool) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            arguments_captured,
            types: collection.locations.clone(),
            annotations: collection.annotations.clone(),
            known_types: collection.known_types.clone(),
        }
    }
}

pub fn render(collection: &TransientCollection, arguments_captured: bool) -> Result<String> {
    let artifact = Artifact::from_collection(collection, arguments_captured);
    let mut text =
        serde_json::to_string_pretty(&artifact).context("Failed to serialize artifact")?;
    text.push('\n');
    Ok(text)
}

/// Replaces `path` with `content` in one rename. On failure the previous
/// artifact is left as it was.
pub fn write_artifact(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create output directory: {}", parent.display())
        })?;
    }

    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);

    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write artifact: {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e)
            .with_context(|| format!("Failed to replace artifact: {}", path.display()));
    }
    Ok(())
}
