use annotation_collector::collection::CompiledCollection;
use annotation_collector::config::Config;
use annotation_collector::introspect::{IntrospectionError, Value};
use annotation_collector::pipeline::regenerate;
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "annotation_collector_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn run_json(bin: &str, args: &[&str]) -> anyhow::Result<Json> {
    let out = Command::new(bin)
        .args(args)
        .env("ANNOTATION_COLLECTOR_LOG", "warn")
        .output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

fn write_sources(src: &Path) -> anyhow::Result<()> {
    write_file(
        &src.join("com/shop/web/OrderController.java"),
        r#"package com.shop.web;

import com.shop.routing.Route;
import com.shop.routing.Get;
import com.shop.inject.*;

@Route(path = "/orders", priority = 2)
public class OrderController {
    @Inject
    private OrderService service;

    public OrderController(@Named("orders") OrderService service) {
        this.service = service;
    }

    @Inject
    public OrderController() {}

    @Get("/{id}")
    @Override
    public String show(long id) { return "order"; }

    @Get({"/", "/all"})
    public String list() { return "orders"; }
}
"#,
    )?;
    write_file(
        &src.join("com/shop/inject/Inject.java"),
        r#"package com.shop.inject;

import java.lang.annotation.*;

@Target({ElementType.FIELD, ElementType.METHOD, ElementType.CONSTRUCTOR})
@Retention(RetentionPolicy.RUNTIME)
public @interface Inject {}
"#,
    )?;
    write_file(
        &src.join("com/shop/routing/Api.java"),
        r#"package com.shop.routing;

@Route(path = "/api")
public interface Api {}
"#,
    )?;
    write_file(
        &src.join("com/shop/model/Order.java"),
        r#"package com.shop.model;

import com.shop.json.JsonName;

public record Order(@JsonName("order_id") long id, String sku) {
    public enum Status {
        OPEN, CLOSED
    }
}
"#,
    )?;
    write_file(
        &src.join("com/shop/model/Status.java"),
        r#"package com.shop.model;

import com.shop.json.JsonName;

public enum Status {
    @JsonName("open") OPEN,
    @JsonName("closed") CLOSED;
}
"#,
    )?;
    write_file(
        &src.join("com/shop/generated/Stub.java"),
        r#"package com.shop.generated;

@Generated
public class Stub {}
"#,
    )?;
    Ok(())
}

#[test]
fn library_run_indexes_types_members_and_properties() -> anyhow::Result<()> {
    let base = temp_dir("library");
    let src = base.join("src");
    write_sources(&src)?;

    let config = Config {
        include_paths: vec![src.clone()],
        exclude_pattern: Some("/generated/".to_string()),
        output_artifact_path: base.join("annotations.json"),
        cache_dir: base.join("cache"),
        ..Config::default()
    };
    let report = regenerate(&config)?;
    assert_eq!(report.files_excluded, 1);

    let collection = CompiledCollection::load(&config.output_artifact_path)?;

    let routes = collection.find_target_classes("com.shop.routing.Route")?;
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].type_name, "com.shop.web.OrderController");
    let path = routes[0]
        .annotation
        .arguments
        .iter()
        .find(|a| a.name.as_deref() == Some("path"))
        .map(|a| a.value.clone());
    assert_eq!(path, Some(Value::String("/orders".to_string())));

    let gets = collection.find_target_methods("com.shop.routing.Get")?;
    let methods: Vec<&str> = gets.iter().map(|m| m.method.as_str()).collect();
    assert_eq!(methods, vec!["show", "list"]);
    assert!(matches!(
        &gets[1].annotation.arguments[0].value,
        Value::Array(items) if items.len() == 2
    ));

    let injected = collection.find_target_methods("com.shop.inject.Inject")?;
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].method, "<init>");

    let properties = collection.find_target_properties("com.shop.inject.Inject")?;
    assert_eq!(properties[0].property, "service");

    let json_names = collection.find_target_properties("com.shop.json.JsonName")?;
    let names: Vec<(&str, &str)> = json_names
        .iter()
        .map(|p| (p.type_name.as_str(), p.property.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("com.shop.model.Order", "id"),
            ("com.shop.model.Status", "OPEN"),
            ("com.shop.model.Status", "CLOSED"),
        ]
    );

    assert!(collection.find_target_classes("java.lang.Override").is_ok());
    assert!(collection.kinds().all(|k| k != "java.lang.Override"));
    assert!(collection.kinds().all(|k| k != "com.shop.generated.Generated"));

    let view = collection.for_class("com.shop.web.OrderController")?;
    assert_eq!(view.classes.len(), 1);
    assert_eq!(view.methods["show"].len(), 1);
    assert_eq!(view.properties["service"].len(), 1);

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn reflective_artifact_reports_stale_sources() -> anyhow::Result<()> {
    let base = temp_dir("stale");
    let src = base.join("src");
    write_sources(&src)?;

    let config = Config {
        include_paths: vec![src.clone()],
        output_artifact_path: base.join("annotations.json"),
        use_cache: false,
        capture_arguments: false,
        ..Config::default()
    };
    regenerate(&config)?;
    let collection = CompiledCollection::load(&config.output_artifact_path)?;
    assert_eq!(collection.find_target_methods("com.shop.routing.Get")?.len(), 2);

    // Wildcard-imported kinds still resolve when re-read from source.
    let injected = collection.find_target_properties("com.shop.inject.Inject")?;
    assert_eq!(injected[0].annotation.kind, "com.shop.inject.Inject");

    write_file(
        &src.join("com/shop/web/OrderController.java"),
        r#"package com.shop.web;

import com.shop.routing.Route;

@Route(path = "/orders")
public class OrderController {}
"#,
    )?;

    let err = collection
        .find_target_methods("com.shop.routing.Get")
        .unwrap_err();
    assert!(matches!(err, IntrospectionError::MemberNotFound { .. }));
    assert!(collection.find_target_classes("com.shop.routing.Route").is_ok());

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn binary_generate_query_and_cache_commands() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_annotation-collector");
    let base = temp_dir("binary");
    write_sources(&base.join("src"))?;
    write_file(
        &base.join("collector.json"),
        r#"{
    "include_paths": ["src"],
    "exclude_pattern": "/generated/",
    "output_artifact_path": "build/annotations.json",
    "cache_dir": "cache"
}"#,
    )?;
    let config = base.join("collector.json");
    let config = config.to_str().unwrap();

    let first = run_json(bin, &["--config", config, "generate"])?;
    assert!(first["cache"]["misses"].as_u64().unwrap() > 0);
    assert!(base.join("build/annotations.json").exists());
    let first_text = std::fs::read(base.join("build/annotations.json"))?;

    let second = run_json(bin, &["--config", config, "generate"])?;
    assert_eq!(second["cache"]["misses"].as_u64(), Some(0));
    assert_eq!(std::fs::read(base.join("build/annotations.json"))?, first_text);

    let query = run_json(
        bin,
        &[
            "--config",
            config,
            "query",
            "--kind",
            "com.shop.routing.Get",
            "--target",
            "methods",
        ],
    )?;
    assert!(query.get("classes").is_none());
    let methods = query["methods"].as_array().unwrap();
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0]["method"], "show");
    assert_eq!(methods[0]["type"], "com.shop.web.OrderController");

    let view = run_json(
        bin,
        &["--config", config, "for-class", "com.shop.model.Status"],
    )?;
    assert_eq!(view["properties"]["OPEN"][0]["kind"], "com.shop.json.JsonName");

    let stats = run_json(bin, &["--config", config, "stats"])?;
    assert_eq!(stats["backend"], "lmdb");
    assert!(stats["entries"]["resolve"].as_u64().unwrap() > 0);

    run_json(bin, &["--config", config, "clear"])?;
    let third = run_json(bin, &["--config", config, "generate"])?;
    assert!(third["cache"]["misses"].as_u64().unwrap() > 0);

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn binary_fails_on_missing_include_root() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_annotation-collector");
    let base = temp_dir("missing_root");
    std::fs::create_dir_all(&base)?;
    let missing = base.join("nope");
    let output = base.join("annotations.json");

    let out = Command::new(bin)
        .args([
            "generate",
            missing.to_str().unwrap(),
            "--no-cache",
            "--output",
            output.to_str().unwrap(),
        ])
        .output()?;
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("nope"));
    assert!(!output.exists());

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}
