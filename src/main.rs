use anyhow::Result;
use annotation_collector::cache::{DurableStore, clear};
use annotation_collector::cli::{Cli, Commands, TargetFilter};
use annotation_collector::collection::{CompiledCollection, TargetClass, TargetMethod, TargetProperty};
use annotation_collector::config::{resolve_artifact_path, resolve_cache_dir, resolve_config};
use annotation_collector::logging;
use annotation_collector::pipeline::regenerate;
use annotation_collector::store::FingerprintStore;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command.clone() {
        Commands::Generate(args) => {
            let mut config = resolve_config(&cli)?;
            config.apply_generate(&args);
            let report = regenerate(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query {
            artifact,
            kind,
            target,
        } => {
            let path = resolve_artifact_path(&cli, artifact.as_deref())?;
            let result = query(path, &kind, target)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::ForClass {
            type_name,
            artifact,
        } => {
            let path = resolve_artifact_path(&cli, artifact.as_deref())?;
            let collection = CompiledCollection::load(&path)?;
            let view = collection.for_class(&type_name)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Stats { cache_dir } => {
            let dir = resolve_cache_dir(&cli, cache_dir.as_deref())?;
            let store = DurableStore::open(dir)?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        Commands::Clear { cache_dir } => {
            let dir = resolve_cache_dir(&cli, cache_dir.as_deref())?;
            clear(&dir)?;
            println!("{}", serde_json::to_string_pretty(&ClearResult { cleared: dir })?);
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct QueryResult {
    kind: String,
    artifact: PathBuf,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    classes: Option<Vec<TargetClass>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    methods: Option<Vec<TargetMethod>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<Vec<TargetProperty>>,
}

#[derive(Debug, Serialize)]
struct ClearResult {
    cleared: PathBuf,
}

fn query(artifact: PathBuf, kind: &str, target: TargetFilter) -> Result<QueryResult> {
    let start = Instant::now();
    let collection = CompiledCollection::load(&artifact)?;

    let wants = |t: TargetFilter| target == TargetFilter::All || target == t;
    let classes = if wants(TargetFilter::Classes) {
        Some(collection.find_target_classes(kind)?)
    } else {
        None
    };
    let methods = if wants(TargetFilter::Methods) {
        Some(collection.find_target_methods(kind)?)
    } else {
        None
    };
    let properties = if wants(TargetFilter::Properties) {
        Some(collection.find_target_properties(kind)?)
    } else {
        None
    };

    Ok(QueryResult {
        kind: kind.to_string(),
        artifact,
        duration_ms: start.elapsed().as_millis() as u64,
        classes,
        methods,
        properties,
    })
}
