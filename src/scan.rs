use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

pub const SOURCE_EXTENSION: &str = "java";

/// Lists every Java source file under `root`, sorted by path so repeated scans
/// visit files in the same order on every filesystem.
///
/// `root` must be canonical; paths are returned absolute.
pub fn scan_sources(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(if is_source(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if entry.file_type().is_some_and(|t| t.is_file()) && is_source(path) {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut files: Vec<PathBuf> = rx.iter().collect();
    files.sort();
    Ok(files)
}

/// Canonicalizes an include root. A missing or unreadable root aborts the run.
pub fn canonical_root(root: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(root)
        .with_context(|| format!("Include path is not readable: {}", root.display()))?;
    if canonical.is_dir() {
        std::fs::read_dir(&canonical).with_context(|| {
            format!("Include path is not readable: {}", root.display())
        })?;
    }
    Ok(canonical)
}

pub fn is_excluded(path: &Path, exclude: Option<&Regex>) -> bool {
    exclude.is_some_and(|re| re.is_match(&path.to_string_lossy()))
}

fn is_source(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == SOURCE_EXTENSION)
}
