//! Metadata extraction.
//!
//! Turns a loaded type into class, method and property records. Records are
//! memoized per file under [`Bucket::Extract`], keyed by the file fingerprint
//! salted with the extractor options and with the known types the file can
//! name without qualification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::introspect::{
    Annotation, Argument, DeclKind, Introspectable, MemberKind, SourceLoader,
};
use crate::parse::hash_content;
use crate::resolver::{ClassMap, visible_types};
use crate::store::{Bucket, FingerprintStore, recall_with, remember_with};

pub const DEFAULT_IGNORED: &[&str] = &[
    "java.lang.Deprecated",
    "java.lang.FunctionalInterface",
    "java.lang.Override",
    "java.lang.SafeVarargs",
    "java.lang.SuppressWarnings",
    "java.lang.annotation.Inherited",
];

/// Annotations that only make sense on an annotation type. A type carrying
/// one of them is an annotation definition.
pub const DEFAULT_DEFINITION_MARKERS: &[&str] = &[
    "java.lang.annotation.Documented",
    "java.lang.annotation.Repeatable",
    "java.lang.annotation.Retention",
    "java.lang.annotation.Target",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub ignored: BTreeSet<String>,
    pub definition_markers: BTreeSet<String>,
    pub capture_arguments: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            ignored: DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect(),
            definition_markers: DEFAULT_DEFINITION_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            capture_arguments: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub kind: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub kind: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    pub member: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extracted {
    pub classes: Vec<ClassRecord>,
    pub methods: Vec<MemberRecord>,
    pub properties: Vec<MemberRecord>,
}

impl Extracted {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty() && self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len() + self.methods.len() + self.properties.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRecords {
    pub type_name: String,
    pub records: Extracted,
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    options: ExtractorOptions,
}

impl Extractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }

    /// Digest of everything besides the source that shapes extraction output.
    pub fn fingerprint_salt(&self) -> String {
        let mut key = format!("args={};", self.options.capture_arguments);
        for kind in &self.options.ignored {
            key.push_str("i:");
            key.push_str(kind);
            key.push(';');
        }
        for kind in &self.options.definition_markers {
            key.push_str("d:");
            key.push_str(kind);
            key.push(';');
        }
        hash_content(key.as_bytes())[..16].to_string()
    }

    pub fn extract(&self, ty: &impl Introspectable) -> Extracted {
        let mut out = Extracted::default();
        if self.is_definition(ty) {
            return out;
        }

        let type_name = ty.name();

        for annotation in ty.declared_annotations() {
            if self.is_ignored(annotation) {
                continue;
            }
            debug!("Found annotation {} on {type_name}", annotation.kind);
            out.classes.push(ClassRecord {
                kind: annotation.kind.clone(),
                arguments: self.arguments(annotation),
            });
        }

        for member in ty.declared_members() {
            if member.kind == MemberKind::Property {
                debug_assert!(
                    !member.name.is_empty(),
                    "property of {type_name} has an empty name"
                );
            }
            for annotation in &member.annotations {
                if self.is_ignored(annotation) {
                    continue;
                }
                debug!(
                    "Found annotation {} on {type_name}::{}",
                    annotation.kind, member.name
                );
                let record = MemberRecord {
                    kind: annotation.kind.clone(),
                    arguments: self.arguments(annotation),
                    member: member.name.clone(),
                };
                match member.kind {
                    MemberKind::Method => out.methods.push(record),
                    MemberKind::Property => out.properties.push(record),
                }
            }
        }

        out
    }

    fn is_definition(&self, ty: &impl Introspectable) -> bool {
        ty.kind() == DeclKind::AnnotationType
            || ty
                .declared_annotations()
                .iter()
                .any(|a| self.options.definition_markers.contains(&a.kind))
    }

    fn is_ignored(&self, annotation: &Annotation) -> bool {
        self.options.ignored.contains(&annotation.kind)
    }

    fn arguments(&self, annotation: &Annotation) -> Vec<Argument> {
        if self.options.capture_arguments {
            annotation.arguments.clone()
        } else {
            Vec::new()
        }
    }
}

/// Extracts records for every type in `map`, parsing each file at most once
/// and skipping files whose cached records are still valid.
///
/// How a simple annotation name resolves depends on which types exist in the
/// file's package and on-demand imports, so those names are part of the key.
pub fn extract_class_map(
    map: &ClassMap,
    extractor: &Extractor,
    loader: &SourceLoader,
    store: &dyn FingerprintStore,
) -> Vec<TypeRecords> {
    let salt = extractor.fingerprint_salt();
    let mut out = Vec::new();

    for resolved in map.files() {
        if resolved.types.is_empty() {
            continue;
        }
        let file = &resolved.file;
        let fingerprint = file
            .fingerprint
            .salted(&format!("{salt}:{}", visibility_salt(loader, &resolved.scope)));

        let records = match recall_with::<Vec<TypeRecords>>(store, Bucket::Extract, file, &fingerprint)
        {
            Some(cached) => cached,
            None => {
                let unit = match loader.load_unit(&file.path) {
                    Ok(unit) => unit,
                    Err(e) => {
                        warn!("Skipping {}: {e}", file.path.display());
                        continue;
                    }
                };
                let mut records = Vec::new();
                for type_name in &resolved.types {
                    match unit.get(type_name) {
                        Some(decl) => records.push(TypeRecords {
                            type_name: type_name.clone(),
                            records: extractor.extract(decl),
                        }),
                        None => warn!(
                            "Skipping '{type_name}': not declared in {}",
                            file.path.display()
                        ),
                    }
                }
                remember_with(store, Bucket::Extract, file, &fingerprint, &records);
                records
            }
        };

        out.extend(
            records
                .into_iter()
                .filter(|r| map.is_owned_by(&r.type_name, &file.path)),
        );
    }

    out
}

fn visibility_salt(loader: &SourceLoader, scope: &[String]) -> String {
    let visible = visible_types(loader.locations(), scope);
    let joined = visible.into_iter().collect::<Vec<_>>().join(";");
    hash_content(joined.as_bytes())[..16].to_string()
}
