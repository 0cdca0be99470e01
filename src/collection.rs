//! Compiled collection reader.
//!
//! Queries over a rendered artifact. Annotation instances are materialized
//! when a query runs: from the embedded arguments when the artifact carries
//! them, otherwise by re-loading the target type from source. The n-th
//! record of a kind on a given target maps to the n-th annotation of that
//! kind found there today.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::collector::{ClassTarget, KindTargets, MemberTarget};
use crate::introspect::{Annotation, IntrospectionError, MemberKind, SourceLoader, TypeDecl};
use crate::render::{Artifact, FORMAT_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetClass {
    #[serde(rename = "type")]
    pub type_name: String,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetMethod {
    #[serde(rename = "type")]
    pub type_name: String,
    pub method: String,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProperty {
    #[serde(rename = "type")]
    pub type_name: String,
    pub property: String,
    pub annotation: Annotation,
}

/// Every recorded annotation of one type, grouped by where it was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForClass {
    pub classes: Vec<Annotation>,
    pub methods: BTreeMap<String, Vec<Annotation>>,
    pub properties: BTreeMap<String, Vec<Annotation>>,
}

#[derive(Debug, Clone)]
pub struct CompiledCollection {
    artifact: Artifact,
    loader: SourceLoader,
}

impl CompiledCollection {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid artifact: {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let artifact: Artifact =
            serde_json::from_str(text).context("Failed to parse artifact JSON")?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: Artifact) -> Result<Self> {
        if artifact.format_version != FORMAT_VERSION {
            bail!(
                "Unsupported artifact format version {} (this reader understands {})",
                artifact.format_version,
                FORMAT_VERSION
            );
        }
        let loader = SourceLoader::new(
            artifact
                .types
                .iter()
                .map(|(name, path)| (name.clone(), path.clone()))
                .collect(),
        )
        .with_known(artifact.known_types.iter().cloned());
        Ok(Self { artifact, loader })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.artifact.annotations.keys().map(String::as_str)
    }

    pub fn find_target_classes(&self, kind: &str) -> Result<Vec<TargetClass>, IntrospectionError> {
        let mut reader = self.materializer();
        let mut out = Vec::new();
        if let Some(targets) = self.artifact.annotations.get(kind) {
            collect_classes(&mut reader, kind, targets, &|_, _| true, &mut out)?;
        }
        Ok(out)
    }

    pub fn find_target_methods(&self, kind: &str) -> Result<Vec<TargetMethod>, IntrospectionError> {
        let mut reader = self.materializer();
        let mut out = Vec::new();
        if let Some(targets) = self.artifact.annotations.get(kind) {
            collect_methods(&mut reader, kind, targets, &|_, _, _| true, &mut out)?;
        }
        Ok(out)
    }

    pub fn find_target_properties(
        &self,
        kind: &str,
    ) -> Result<Vec<TargetProperty>, IntrospectionError> {
        let mut reader = self.materializer();
        let mut out = Vec::new();
        if let Some(targets) = self.artifact.annotations.get(kind) {
            collect_properties(&mut reader, kind, targets, &|_, _, _| true, &mut out)?;
        }
        Ok(out)
    }

    /// Class targets for which `predicate(kind, type)` holds, across all kinds.
    pub fn filter_target_classes<P>(&self, predicate: P) -> Result<Vec<TargetClass>, IntrospectionError>
    where
        P: Fn(&str, &str) -> bool,
    {
        let mut reader = self.materializer();
        let mut out = Vec::new();
        for (kind, targets) in &self.artifact.annotations {
            collect_classes(&mut reader, kind, targets, &predicate, &mut out)?;
        }
        Ok(out)
    }

    /// Method targets for which `predicate(kind, type, method)` holds.
    pub fn filter_target_methods<P>(&self, predicate: P) -> Result<Vec<TargetMethod>, IntrospectionError>
    where
        P: Fn(&str, &str, &str) -> bool,
    {
        let mut reader = self.materializer();
        let mut out = Vec::new();
        for (kind, targets) in &self.artifact.annotations {
            collect_methods(&mut reader, kind, targets, &predicate, &mut out)?;
        }
        Ok(out)
    }

    /// Property targets for which `predicate(kind, type, property)` holds.
    pub fn filter_target_properties<P>(
        &self,
        predicate: P,
    ) -> Result<Vec<TargetProperty>, IntrospectionError>
    where
        P: Fn(&str, &str, &str) -> bool,
    {
        let mut reader = self.materializer();
        let mut out = Vec::new();
        for (kind, targets) in &self.artifact.annotations {
            collect_properties(&mut reader, kind, targets, &predicate, &mut out)?;
        }
        Ok(out)
    }

    /// Annotations recorded on `type_name`, ordered by kind then occurrence.
    /// A type with no records yields an empty view.
    pub fn for_class(&self, type_name: &str) -> Result<ForClass, IntrospectionError> {
        let mut reader = self.materializer();
        let mut view = ForClass::default();

        for (kind, targets) in &self.artifact.annotations {
            let mut classes = Vec::new();
            collect_classes(&mut reader, kind, targets, &|_, t| t == type_name, &mut classes)?;
            view.classes.extend(classes.into_iter().map(|c| c.annotation));

            let mut methods = Vec::new();
            collect_methods(&mut reader, kind, targets, &|_, t, _| t == type_name, &mut methods)?;
            for m in methods {
                view.methods.entry(m.method).or_default().push(m.annotation);
            }

            let mut properties = Vec::new();
            collect_properties(
                &mut reader,
                kind,
                targets,
                &|_, t, _| t == type_name,
                &mut properties,
            )?;
            for p in properties {
                view.properties.entry(p.property).or_default().push(p.annotation);
            }
        }

        Ok(view)
    }

    fn materializer(&self) -> Materializer<'_> {
        Materializer {
            loader: &self.loader,
            embedded: self.artifact.arguments_captured,
            types: HashMap::new(),
        }
    }
}

fn collect_classes(
    reader: &mut Materializer<'_>,
    kind: &str,
    targets: &KindTargets,
    predicate: &dyn Fn(&str, &str) -> bool,
    out: &mut Vec<TargetClass>,
) -> Result<(), IntrospectionError> {
    let mut seen = Occurrences::default();
    for target in &targets.classes {
        let occurrence = seen.next(&target.type_name, "");
        if !predicate(kind, &target.type_name) {
            continue;
        }
        out.push(TargetClass {
            type_name: target.type_name.clone(),
            annotation: reader.class(kind, target, occurrence)?,
        });
    }
    Ok(())
}

fn collect_methods(
    reader: &mut Materializer<'_>,
    kind: &str,
    targets: &KindTargets,
    predicate: &dyn Fn(&str, &str, &str) -> bool,
    out: &mut Vec<TargetMethod>,
) -> Result<(), IntrospectionError> {
    let mut seen = Occurrences::default();
    for target in &targets.methods {
        let occurrence = seen.next(&target.type_name, &target.member);
        if !predicate(kind, &target.type_name, &target.member) {
            continue;
        }
        out.push(TargetMethod {
            type_name: target.type_name.clone(),
            method: target.member.clone(),
            annotation: reader.member(kind, MemberKind::Method, target, occurrence)?,
        });
    }
    Ok(())
}

fn collect_properties(
    reader: &mut Materializer<'_>,
    kind: &str,
    targets: &KindTargets,
    predicate: &dyn Fn(&str, &str, &str) -> bool,
    out: &mut Vec<TargetProperty>,
) -> Result<(), IntrospectionError> {
    let mut seen = Occurrences::default();
    for target in &targets.properties {
        let occurrence = seen.next(&target.type_name, &target.member);
        if !predicate(kind, &target.type_name, &target.member) {
            continue;
        }
        out.push(TargetProperty {
            type_name: target.type_name.clone(),
            property: target.member.clone(),
            annotation: reader.member(kind, MemberKind::Property, target, occurrence)?,
        });
    }
    Ok(())
}

/// Position of each record among the records of the same kind on the same
/// target. Counted before any predicate so filtering never shifts the index.
#[derive(Default)]
struct Occurrences(HashMap<(String, String), usize>);

impl Occurrences {
    fn next(&mut self, type_name: &str, member: &str) -> usize {
        let slot = self
            .0
            .entry((type_name.to_string(), member.to_string()))
            .or_insert(0);
        let current = *slot;
        *slot += 1;
        current
    }
}

/// Builds annotation instances for one query. Loaded types live only as
/// long as the query.
struct Materializer<'c> {
    loader: &'c SourceLoader,
    embedded: bool,
    types: HashMap<String, TypeDecl>,
}

impl Materializer<'_> {
    fn class(
        &mut self,
        kind: &str,
        target: &ClassTarget,
        occurrence: usize,
    ) -> Result<Annotation, IntrospectionError> {
        if self.embedded {
            return Ok(Annotation {
                kind: kind.to_string(),
                arguments: target.arguments.clone(),
            });
        }
        let decl = self.decl(&target.type_name)?;
        nth_of_kind(decl.annotations.iter(), kind, occurrence).ok_or_else(|| {
            IntrospectionError::AnnotationNotFound {
                kind: kind.to_string(),
                target: target.type_name.clone(),
                occurrence,
            }
        })
    }

    fn member(
        &mut self,
        kind: &str,
        member_kind: MemberKind,
        target: &MemberTarget,
        occurrence: usize,
    ) -> Result<Annotation, IntrospectionError> {
        if self.embedded {
            return Ok(Annotation {
                kind: kind.to_string(),
                arguments: target.arguments.clone(),
            });
        }
        let decl = self.decl(&target.type_name)?;
        if decl.member(member_kind, &target.member).is_none() {
            return Err(IntrospectionError::MemberNotFound {
                type_name: target.type_name.clone(),
                kind: member_kind,
                member: target.member.clone(),
            });
        }
        // Overloads share a name; their annotations count as one sequence.
        let live = decl
            .members
            .iter()
            .filter(|m| m.kind == member_kind && m.name == target.member)
            .flat_map(|m| m.annotations.iter());
        nth_of_kind(live, kind, occurrence).ok_or_else(|| IntrospectionError::AnnotationNotFound {
            kind: kind.to_string(),
            target: format!("{}::{}", target.type_name, target.member),
            occurrence,
        })
    }

    fn decl(&mut self, type_name: &str) -> Result<&TypeDecl, IntrospectionError> {
        if !self.types.contains_key(type_name) {
            let decl = self.loader.load(type_name)?;
            self.types.insert(type_name.to_string(), decl);
        }
        self.types
            .get(type_name)
            .ok_or_else(|| IntrospectionError::UnknownType(type_name.to_string()))
    }
}

fn nth_of_kind<'a>(
    annotations: impl Iterator<Item = &'a Annotation>,
    kind: &str,
    n: usize,
) -> Option<Annotation> {
    annotations.filter(|a| a.kind == kind).nth(n).cloned()
}
