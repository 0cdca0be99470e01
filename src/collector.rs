use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::extract::{Extracted, TypeRecords};
use crate::introspect::Argument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassTarget {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberTarget {
    #[serde(rename = "type")]
    pub type_name: String,
    pub member: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindTargets {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<ClassTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MemberTarget>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<MemberTarget>,
}

/// Everything collected in one run, grouped by annotation kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransientCollection {
    pub annotations: BTreeMap<String, KindTargets>,
    pub locations: BTreeMap<String, PathBuf>,
    pub known_types: BTreeSet<String>,
}

impl TransientCollection {
    pub fn class_count(&self) -> usize {
        self.annotations.values().map(|k| k.classes.len()).sum()
    }

    pub fn method_count(&self) -> usize {
        self.annotations.values().map(|k| k.methods.len()).sum()
    }

    pub fn property_count(&self) -> usize {
        self.annotations.values().map(|k| k.properties.len()).sum()
    }
}

/// Accumulates extraction results. Nothing is deduplicated: a repeated
/// annotation yields one target per occurrence, in declaration order.
#[derive(Debug, Default)]
pub struct Collector {
    collection: TransientCollection,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, type_name: &str, location: PathBuf, records: Extracted) {
        if records.is_empty() {
            return;
        }
        let annotations = &mut self.collection.annotations;

        for record in records.classes {
            annotations
                .entry(record.kind)
                .or_default()
                .classes
                .push(ClassTarget {
                    type_name: type_name.to_string(),
                    arguments: record.arguments,
                });
        }
        for record in records.methods {
            annotations
                .entry(record.kind)
                .or_default()
                .methods
                .push(MemberTarget {
                    type_name: type_name.to_string(),
                    member: record.member,
                    arguments: record.arguments,
                });
        }
        for record in records.properties {
            annotations
                .entry(record.kind)
                .or_default()
                .properties
                .push(MemberTarget {
                    type_name: type_name.to_string(),
                    member: record.member,
                    arguments: record.arguments,
                });
        }

        self.collection
            .locations
            .insert(type_name.to_string(), location);
    }

    pub fn add_all<I>(&mut self, records: I, locate: impl Fn(&str) -> Option<PathBuf>)
    where
        I: IntoIterator<Item = TypeRecords>,
    {
        for TypeRecords { type_name, records } in records {
            if let Some(location) = locate(&type_name) {
                self.add(&type_name, location, records);
            }
        }
    }

    pub fn into_collection(self) -> TransientCollection {
        self.collection
    }
}
