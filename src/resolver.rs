//! Path-to-declaration resolution.
//!
//! Walks the include roots and maps every source file to the types it
//! declares, along with the packages its simple names can refer to.
//! Per-file results are memoized under [`Bucket::Resolve`].

use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::parse::{Header, scan_header};
use crate::scan::{canonical_root, is_excluded, scan_sources};
use crate::store::{Bucket, FingerprintStore, SourceFile, recall, remember};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub file: SourceFile,
    pub types: Vec<String>,
    /// The file's own package followed by its on-demand imports.
    pub scope: Vec<String>,
}

/// Known types a file in `scope` can name by their simple name.
pub fn visible_types(locations: &HashMap<String, PathBuf>, scope: &[String]) -> BTreeSet<String> {
    locations
        .keys()
        .filter(|fqn| {
            let package = fqn.rsplit_once('.').map_or("", |(head, _)| head);
            scope.iter().any(|p| p == package)
        })
        .cloned()
        .collect()
}

/// Files in scan order with the types they declare, plus the owning file of
/// every type name.
#[derive(Debug, Clone, Default)]
pub struct ClassMap {
    files: Vec<ResolvedFile>,
    owners: HashMap<String, PathBuf>,
}

impl ClassMap {
    pub fn push(&mut self, resolved: ResolvedFile) {
        for type_name in &resolved.types {
            if let Some(previous) = self.owners.get(type_name)
                && previous != &resolved.file.path
            {
                warn!(
                    "Type '{type_name}' is declared in {} and {}; keeping the latter",
                    previous.display(),
                    resolved.file.path.display()
                );
            }
            self.owners
                .insert(type_name.clone(), resolved.file.path.clone());
        }
        self.files.push(resolved);
    }

    pub fn files(&self) -> &[ResolvedFile] {
        &self.files
    }

    pub fn owner(&self, type_name: &str) -> Option<&Path> {
        self.owners.get(type_name).map(PathBuf::as_path)
    }

    pub fn is_owned_by(&self, type_name: &str, path: &Path) -> bool {
        self.owner(type_name) == Some(path)
    }

    /// `(file, type)` pairs for every type whose winning declaration is in `file`.
    pub fn entries(&self) -> impl Iterator<Item = (&SourceFile, &str)> {
        self.files.iter().flat_map(move |resolved| {
            resolved
                .types
                .iter()
                .filter(move |t| self.is_owned_by(t, &resolved.file.path))
                .map(move |t| (&resolved.file, t.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type name to source path for every entry, for loading types by name.
    pub fn locations(&self) -> HashMap<String, PathBuf> {
        self.entries()
            .map(|(file, t)| (t.to_string(), file.path.clone()))
            .collect()
    }

    /// Rebuilds the map keeping only the types `keep` returns for each file.
    pub fn retain_types<F>(&self, mut keep: F) -> ClassMap
    where
        F: FnMut(&ResolvedFile) -> Vec<String>,
    {
        let mut out = ClassMap::default();
        for resolved in &self.files {
            let kept = keep(resolved);
            for type_name in &kept {
                if self.is_owned_by(type_name, &resolved.file.path) {
                    out.owners
                        .insert(type_name.clone(), resolved.file.path.clone());
                }
            }
            out.files.push(ResolvedFile {
                file: resolved.file.clone(),
                types: kept,
                scope: resolved.scope.clone(),
            });
        }
        out
    }
}

pub struct Resolver<'a> {
    store: &'a dyn FingerprintStore,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResolveStats {
    pub files_scanned: usize,
    pub files_excluded: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn FingerprintStore) -> Self {
        Self { store }
    }

    /// Resolves every include root. Roots are validated before any file is read.
    pub fn resolve(
        &self,
        roots: &[PathBuf],
        exclude: Option<&Regex>,
    ) -> Result<(ClassMap, ResolveStats)> {
        let roots = roots
            .iter()
            .map(|r| canonical_root(r))
            .collect::<Result<Vec<_>>>()?;

        let mut map = ClassMap::default();
        let mut stats = ResolveStats::default();

        for root in &roots {
            for path in scan_sources(root)? {
                if is_excluded(&path, exclude) {
                    debug!("Excluded {}", path.display());
                    stats.files_excluded += 1;
                    continue;
                }
                stats.files_scanned += 1;

                match self.resolve_file(&path) {
                    Ok(resolved) if resolved.types.is_empty() => {}
                    Ok(resolved) => map.push(resolved),
                    Err(e) => warn!("Skipping {}: {e:#}", path.display()),
                }
            }
        }

        Ok((map, stats))
    }

    fn resolve_file(&self, path: &Path) -> Result<ResolvedFile> {
        let (file, content) = SourceFile::read(path)?;

        let header = match recall::<Header>(self.store, Bucket::Resolve, &file) {
            Some(header) => header,
            None => {
                let header = scan_header(&String::from_utf8_lossy(&content));
                remember(self.store, Bucket::Resolve, &file, &header);
                header
            }
        };

        let scope = header.scope_packages();
        Ok(ResolvedFile {
            file,
            types: header.types,
            scope,
        })
    }
}
