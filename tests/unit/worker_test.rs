//! Tests for the worker-side runtime driven directly over channels

use prometheus_process_pool::core::Message;
use prometheus_process_pool::worker::{is_worker, Handler, ModuleRegistry, WorkerRuntime};
use serde_json::json;
use tokio::sync::mpsc;

#[test]
fn test_test_process_is_not_a_worker() {
    assert!(!is_worker());
}

#[tokio::test]
async fn test_runtime_serves_default_handler() {
    let registry = ModuleRegistry::new().function(
        "modules/double",
        Handler::sync(|payload| anyhow::Ok(json!(payload.as_i64().unwrap_or_default() * 2))),
    );
    let runtime = WorkerRuntime::new(registry);
    assert!(runtime.registry().contains("modules/double"));

    let (to_worker, inbound) = mpsc::unbounded_channel();
    let (outbound, mut from_worker) = mpsc::unbounded_channel();
    tokio::spawn(async move { runtime.serve(inbound, outbound).await });

    to_worker.send(Message::init(1, "modules/double")).unwrap();
    assert_eq!(from_worker.recv().await.unwrap(), Message::ack(1));

    to_worker.send(Message::request(2, None, json!(21))).unwrap();
    assert_eq!(
        from_worker.recv().await.unwrap(),
        Message::reply(2, Ok(json!(42)))
    );
}

#[tokio::test]
async fn test_runtime_rejects_unknown_module() {
    let runtime = WorkerRuntime::new(ModuleRegistry::new());
    let (to_worker, inbound) = mpsc::unbounded_channel();
    let (outbound, mut from_worker) = mpsc::unbounded_channel();
    tokio::spawn(async move { runtime.serve(inbound, outbound).await });

    to_worker.send(Message::init(1, "modules/none")).unwrap();
    assert_eq!(
        from_worker.recv().await.unwrap(),
        Message::reply(1, Err("Cannot find module 'modules/none'".to_string()))
    );
}
