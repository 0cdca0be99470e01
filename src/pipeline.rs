//! Regeneration entry point.
//!
//! One run resolves the include roots, filters and extracts every declared
//! type, then renders and atomically writes the artifact. Configuration is
//! validated before any file is read, and nothing is written unless every
//! stage succeeded.

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::DurableStore;
use crate::collector::{Collector, TransientCollection};
use crate::config::Config;
use crate::extract::{Extractor, extract_class_map};
use crate::filter::{FilterChain, filter_class_map};
use crate::introspect::SourceLoader;
use crate::render::{render, write_artifact};
use crate::resolver::{ClassMap, Resolver, visible_types};
use crate::store::{FingerprintStore, MemoryStore, StoreStats};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output: PathBuf,
    pub files_scanned: usize,
    pub files_excluded: usize,
    pub types_resolved: usize,
    pub types_kept: usize,
    pub kinds: usize,
    pub classes: usize,
    pub methods: usize,
    pub properties: usize,
    pub cache: StoreStats,
    pub duration_ms: u64,
}

/// Runs the pipeline against the durable store when caching is on, or a
/// throwaway in-memory store otherwise.
pub fn regenerate(config: &Config) -> Result<RunReport> {
    if config.use_cache {
        let store = DurableStore::open(config.cache_dir.clone())?;
        Pipeline::new(config, &store).run()
    } else {
        let store = MemoryStore::new();
        Pipeline::new(config, &store).run()
    }
}

pub struct Pipeline<'a> {
    config: &'a Config,
    store: &'a dyn FingerprintStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, store: &'a dyn FingerprintStore) -> Self {
        Self { config, store }
    }

    pub fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        let exclude = self.config.exclude_regex()?;
        check_output(&self.config.output_artifact_path)?;
        if self.config.include_paths.is_empty() {
            warn!("No include paths configured; the artifact will be empty");
        }

        let stage = Instant::now();
        let (resolved, scan) =
            Resolver::new(self.store).resolve(&self.config.include_paths, exclude.as_ref())?;
        debug!(
            "Scanned {} files ({} excluded), resolved {} types in {} ms",
            scan.files_scanned,
            scan.files_excluded,
            resolved.len(),
            stage.elapsed().as_millis()
        );

        let loader = SourceLoader::new(resolved.locations());

        let stage = Instant::now();
        let kept = filter_class_map(&resolved, &FilterChain::standard(&loader), self.store);
        debug!(
            "Filtered {} of {} types in {} ms",
            resolved.len() - kept.len(),
            resolved.len(),
            stage.elapsed().as_millis()
        );

        let stage = Instant::now();
        let extractor = Extractor::new(self.config.extractor_options());
        let records = extract_class_map(&kept, &extractor, &loader, self.store);
        let mut collector = Collector::new();
        collector.add_all(records, |type_name| {
            kept.owner(type_name).map(Path::to_path_buf)
        });
        let mut collection = collector.into_collection();
        if !self.config.capture_arguments {
            collection.known_types = names_in_scope(&kept, &loader, &collection);
        }
        debug!(
            "Extracted annotations from {} types in {} ms",
            collection.locations.len(),
            stage.elapsed().as_millis()
        );

        let stage = Instant::now();
        let text = render(&collection, self.config.capture_arguments)?;
        write_artifact(&self.config.output_artifact_path, &text)?;
        debug!(
            "Wrote {} in {} ms",
            self.config.output_artifact_path.display(),
            stage.elapsed().as_millis()
        );

        let cache = self.store.stats()?;
        let report = RunReport {
            output: self.config.output_artifact_path.clone(),
            files_scanned: scan.files_scanned,
            files_excluded: scan.files_excluded,
            types_resolved: resolved.len(),
            types_kept: kept.len(),
            kinds: collection.annotations.len(),
            classes: collection.class_count(),
            methods: collection.method_count(),
            properties: collection.property_count(),
            cache,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Collected {} annotation kinds from {} types in {} ms (cache: {} hits, {} misses)",
            report.kinds,
            report.types_kept,
            report.duration_ms,
            report.cache.hits,
            report.cache.misses
        );
        Ok(report)
    }
}

/// Known types visible from the files that contributed targets. Readers
/// that re-parse those files need the same set to resolve names the same way.
fn names_in_scope(
    kept: &ClassMap,
    loader: &SourceLoader,
    collection: &TransientCollection,
) -> BTreeSet<String> {
    kept.files()
        .iter()
        .filter(|f| f.types.iter().any(|t| collection.locations.contains_key(t)))
        .flat_map(|f| visible_types(loader.locations(), &f.scope))
        .collect()
}

fn check_output(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("output_artifact_path is empty");
    }
    if path.is_dir() {
        bail!("output_artifact_path is a directory: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CompiledCollection;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "annotation_collector_pipeline_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture(base: &Path) -> Config {
        let src = base.join("src");
        write(
            &src.join("app/Permission.java"),
            r#"package app;

import java.lang.annotation.*;

@Repeatable(Permissions.class)
@Retention(RetentionPolicy.RUNTIME)
public @interface Permission {
    String value();
}
"#,
        );
        write(
            &src.join("app/CreateMenu.java"),
            r#"package app;

@Permission("is_admin")
@Permission("can_create_menu")
@Deprecated
public class CreateMenu {
    @Inject
    private MenuRepository menus;
}
"#,
        );
        write(
            &src.join("app/MenuController.java"),
            r#"package app;

public class MenuController {
    @Route("/menus")
    public void list() {}

    @Override
    public String toString() { return "menus"; }
}
"#,
        );
        write(
            &src.join("app/Plain.java"),
            "package app;\n\npublic class Plain {}\n",
        );

        Config {
            include_paths: vec![src],
            output_artifact_path: base.join("out/annotations.json"),
            cache_dir: base.join("cache"),
            ..Config::default()
        }
    }

    #[test]
    fn end_to_end_repeatable_and_method_targets() -> Result<()> {
        let base = temp_dir("e2e");
        let config = fixture(&base);

        let report = regenerate(&config)?;
        assert_eq!(report.types_resolved, 4);
        assert_eq!(report.types_kept, 3);
        assert_eq!(report.classes, 2);
        assert_eq!(report.methods, 1);
        assert_eq!(report.properties, 1);

        let collection = CompiledCollection::load(&config.output_artifact_path)?;
        let classes = collection.find_target_classes("app.Permission")?;
        assert_eq!(classes.len(), 2);
        assert!(classes.iter().all(|c| c.type_name == "app.CreateMenu"));

        let methods = collection.find_target_methods("app.Route")?;
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].type_name, "app.MenuController");
        assert_eq!(methods[0].method, "list");

        let kinds: Vec<&str> = collection.kinds().collect();
        assert_eq!(kinds, vec!["app.Inject", "app.Permission", "app.Route"]);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn second_cached_run_is_byte_identical_and_all_hits() -> Result<()> {
        let base = temp_dir("idempotent");
        let config = fixture(&base);

        let first = regenerate(&config)?;
        let first_text = fs::read(&config.output_artifact_path)?;
        assert!(first.cache.misses > 0);

        let second = regenerate(&config)?;
        let second_text = fs::read(&config.output_artifact_path)?;
        assert_eq!(first_text, second_text);
        assert_eq!(second.cache.misses, 0);
        assert_eq!(second.cache.writes, 0);
        assert!(second.cache.hits > 0);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn changed_file_is_recomputed_at_every_stage() -> Result<()> {
        let base = temp_dir("coherence");
        let config = Config {
            use_cache: false,
            ..fixture(&base)
        };
        let store = MemoryStore::new();

        Pipeline::new(&config, &store).run()?;
        let before = store.stats()?;

        write(
            &config.include_paths[0].join("app/MenuController.java"),
            r#"package app;

public class MenuController {
    @Route("/menus")
    public void list() {}

    @Route("/menus/new")
    public void create() {}
}
"#,
        );
        let report = Pipeline::new(&config, &store).run()?;

        // Resolve, filter and extract each miss once for the edited file.
        assert_eq!(report.cache.misses - before.misses, 3);
        assert_eq!(report.methods, 2);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn disabled_capture_embeds_no_arguments() -> Result<()> {
        let base = temp_dir("no_args");
        let config = Config {
            capture_arguments: false,
            use_cache: false,
            ..fixture(&base)
        };

        regenerate(&config)?;
        let text = fs::read_to_string(&config.output_artifact_path)?;
        assert!(!text.contains("\"arguments\""));
        assert!(text.contains("\"arguments_captured\": false"));

        // Arguments are read back from source instead.
        let collection = CompiledCollection::load(&config.output_artifact_path)?;
        let classes = collection.find_target_classes("app.Permission")?;
        assert_eq!(classes[1].annotation.arguments.len(), 1);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn new_type_under_wildcard_import_refreshes_cached_records() -> Result<()> {
        let base = temp_dir("wildcard_refresh");
        let src = base.join("src");
        write(
            &src.join("app/Endpoint.java"),
            "package app;\n\nimport lib.*;\n\n@Handler\npublic class Endpoint {}\n",
        );
        let config = Config {
            include_paths: vec![src.clone()],
            output_artifact_path: base.join("annotations.json"),
            use_cache: false,
            ..Config::default()
        };

        let store = MemoryStore::new();
        Pipeline::new(&config, &store).run()?;
        let before = fs::read_to_string(&config.output_artifact_path)?;
        assert!(before.contains("\"app.Handler\""));

        write(
            &src.join("lib/Handler.java"),
            "package lib;\n\npublic @interface Handler {}\n",
        );
        Pipeline::new(&config, &store).run()?;
        let warm = fs::read_to_string(&config.output_artifact_path)?;

        Pipeline::new(&config, &MemoryStore::new()).run()?;
        let cold = fs::read_to_string(&config.output_artifact_path)?;

        assert_eq!(warm, cold);
        assert!(warm.contains("\"lib.Handler\""));
        assert!(!warm.contains("\"app.Handler\""));

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn reflective_reads_resolve_names_per_file() -> Result<()> {
        let base = temp_dir("per_file_names");
        let src = base.join("src");
        write(
            &src.join("lib/Marker.java"),
            "package lib;\n\npublic @interface Marker {}\n",
        );
        write(
            &src.join("app/Imported.java"),
            "package app;\n\nimport lib.*;\n\n@Marker\npublic class Imported {}\n",
        );
        write(
            &src.join("app/Local.java"),
            "package app;\n\n@Marker\npublic class Local {}\n",
        );
        let config = Config {
            include_paths: vec![src],
            output_artifact_path: base.join("annotations.json"),
            use_cache: false,
            capture_arguments: false,
            ..Config::default()
        };

        regenerate(&config)?;
        let collection = CompiledCollection::load(&config.output_artifact_path)?;

        let imported = collection.find_target_classes("lib.Marker")?;
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].type_name, "app.Imported");
        assert_eq!(imported[0].annotation.kind, "lib.Marker");

        let local = collection.find_target_classes("app.Marker")?;
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].type_name, "app.Local");
        assert_eq!(local[0].annotation.kind, "app.Marker");

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn member_types_are_indexed_by_qualified_name() -> Result<()> {
        let base = temp_dir("member_types");
        let src = base.join("src");
        write(
            &src.join("app/Events.java"),
            r#"package app;

public class Events {
    @Listener("created")
    public static class Created {
        @Payload
        private String id;
    }
}
"#,
        );
        let config = Config {
            include_paths: vec![src],
            output_artifact_path: base.join("annotations.json"),
            use_cache: false,
            capture_arguments: false,
            ..Config::default()
        };

        let report = regenerate(&config)?;
        assert_eq!(report.types_resolved, 2);

        let collection = CompiledCollection::load(&config.output_artifact_path)?;
        let listeners = collection.find_target_classes("app.Listener")?;
        assert_eq!(listeners[0].type_name, "app.Events.Created");
        assert_eq!(listeners[0].annotation.arguments.len(), 1);

        let payloads = collection.find_target_properties("app.Payload")?;
        assert_eq!(payloads[0].type_name, "app.Events.Created");
        assert_eq!(payloads[0].property, "id");

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn fatal_errors_leave_the_previous_artifact() -> Result<()> {
        let base = temp_dir("fatal");
        let config = Config {
            use_cache: false,
            ..fixture(&base)
        };
        regenerate(&config)?;
        let previous = fs::read(&config.output_artifact_path)?;

        let missing_root = Config {
            include_paths: vec![base.join("does-not-exist")],
            ..config.clone()
        };
        let err = regenerate(&missing_root).unwrap_err();
        assert!(format!("{err:#}").contains("does-not-exist"));

        let bad_pattern = Config {
            exclude_pattern: Some("(".to_string()),
            ..config.clone()
        };
        let err = regenerate(&bad_pattern).unwrap_err();
        assert!(err.to_string().contains("exclude_pattern"));

        assert_eq!(fs::read(&config.output_artifact_path)?, previous);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn unwritable_output_is_fatal() -> Result<()> {
        let base = temp_dir("unwritable");
        let blocker = base.join("blocker");
        let config = Config {
            use_cache: false,
            output_artifact_path: blocker.join("annotations.json"),
            ..fixture(&base)
        };
        fs::write(&blocker, "file in the way")?;

        let err = regenerate(&config).unwrap_err();
        assert!(format!("{err:#}").contains("blocker"));

        let dir_output = Config {
            output_artifact_path: base.join("src"),
            ..config
        };
        let err = regenerate(&dir_output).unwrap_err();
        assert!(err.to_string().contains("output_artifact_path"));

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn exclude_pattern_skips_matching_files() -> Result<()> {
        let base = temp_dir("exclude");
        let config = Config {
            use_cache: false,
            exclude_pattern: Some("Controller".to_string()),
            ..fixture(&base)
        };

        let report = regenerate(&config)?;
        assert_eq!(report.files_excluded, 1);
        assert_eq!(report.methods, 0);
        assert_eq!(report.classes, 2);

        let _ = fs::remove_dir_all(base);
        Ok(())
    }
}
