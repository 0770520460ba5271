//! Tests for builder modules

use prometheus_process_pool::builders::PoolBuilder;
use prometheus_process_pool::config::PoolConfig;
use prometheus_process_pool::core::PoolError;
use prometheus_process_pool::worker::{Handler, ModuleRegistry};
use prometheus_process_pool::InProcessSpawner;
use serde_json::{json, Value};

#[test]
fn test_pool_builder_defaults() {
    let builder = PoolBuilder::new("modules/api", PoolConfig::new().with_size(3));
    assert_eq!(builder.entry_module(), "modules/api");
    assert_eq!(builder.config().size, 3);
}

#[test]
fn test_pool_builder_requires_runtime() {
    let err = PoolBuilder::new("modules/api", PoolConfig::new())
        .spawner(InProcessSpawner::new(ModuleRegistry::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, PoolError::Runtime(_)));
}

#[tokio::test]
async fn test_pool_builder_builds_working_pool() {
    let registry = ModuleRegistry::new().function("modules/echo", Handler::sync(anyhow::Ok));
    let pool = PoolBuilder::new("modules/echo", PoolConfig::new())
        .size(2)
        .hardware_concurrency(2)
        .on_notification("progress", |_payload: Value| async { anyhow::Ok(Value::Null) })
        .spawner(InProcessSpawner::new(registry))
        .build()
        .unwrap();

    assert_eq!(pool.size(), 2);
    assert_eq!(pool.entry_module(), "modules/echo");
    assert_eq!(pool.send(json!("x")).unwrap().await.unwrap(), json!("x"));
}
