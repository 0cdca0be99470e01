//! Declaration filters.
//!
//! A [`FilterChain`] is an ordered list of named predicates over
//! `(path, type)`. The first filter that rejects a pair stops the chain.
//! Verdicts are memoized per file under [`Bucket::Filter`].

use std::path::Path;
use tracing::{debug, warn};

use crate::introspect::{DeclKind, SourceLoader};
use crate::resolver::ClassMap;
use crate::store::{Bucket, FingerprintStore, recall, remember};

type Predicate<'a> = Box<dyn Fn(&Path, &str) -> bool + 'a>;

pub struct NamedFilter<'a> {
    name: &'static str,
    predicate: Predicate<'a>,
}

impl<'a> NamedFilter<'a> {
    pub fn new<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&Path, &str) -> bool + 'a,
    {
        Self {
            name,
            predicate: Box::new(predicate),
        }
    }

    /// Rejects files that cannot carry annotations because they contain no `@`.
    /// Never loads the type.
    pub fn content() -> Self {
        Self::new("content", |path, _| match std::fs::read(path) {
            Ok(bytes) => bytes.contains(&b'@'),
            Err(e) => {
                warn!("Discarding {} because it cannot be read: {e}", path.display());
                false
            }
        })
    }

    /// Keeps types that load and are not interfaces. Load failures are
    /// reported and treated as rejections.
    pub fn instantiable(loader: &'a SourceLoader) -> Self {
        Self::new("instantiable", move |path, type_name| {
            match loader.load_at(path, type_name) {
                Ok(decl) => decl.kind != DeclKind::Interface,
                Err(e) => {
                    warn!("Discarding '{type_name}' because an error occurred during loading: {e}");
                    false
                }
            }
        })
    }
}

#[derive(Default)]
pub struct FilterChain<'a> {
    filters: Vec<NamedFilter<'a>>,
}

impl<'a> FilterChain<'a> {
    pub fn new(filters: Vec<NamedFilter<'a>>) -> Self {
        Self { filters }
    }

    /// Content check first, since it never parses.
    pub fn standard(loader: &'a SourceLoader) -> Self {
        Self::new(vec![NamedFilter::content(), NamedFilter::instantiable(loader)])
    }

    pub fn keep(&self, path: &Path, type_name: &str) -> bool {
        for filter in &self.filters {
            if !(filter.predicate)(path, type_name) {
                debug!("Filter '{}' rejected {type_name}", filter.name);
                return false;
            }
        }
        true
    }
}

/// Applies `chain` to every declared type, reusing cached verdicts for files
/// whose fingerprint has not changed.
pub fn filter_class_map(
    map: &ClassMap,
    chain: &FilterChain<'_>,
    store: &dyn FingerprintStore,
) -> ClassMap {
    map.retain_types(|resolved| {
        if let Some(kept) = recall::<Vec<String>>(store, Bucket::Filter, &resolved.file) {
            return kept;
        }

        let kept: Vec<String> = resolved
            .types
            .iter()
            .filter(|t| chain.keep(&resolved.file.path, t))
            .cloned()
            .collect();
        remember(store, Bucket::Filter, &resolved.file, &kept);
        kept
    })
}
