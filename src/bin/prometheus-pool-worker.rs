//! Diagnostic worker host.
//!
//! Serves a few small modules so pools can be exercised against real
//! subprocesses:
//!
//! - `modules/api`: `say`, `echo`, `fail`, `talk`, `sleep`, `pid`, `is_worker`
//! - `modules/echo`: a single function echoing its payload
//! - `modules/broken`: a module whose construction always fails

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::json;

use prometheus_process_pool::util::init_tracing;
use prometheus_process_pool::worker::{
    is_worker, run_worker_main, Handler, HandlerTable, ModuleRegistry, WorkerContext, WorkerModule,
};

struct Api {
    ctx: WorkerContext,
}

impl WorkerModule for Api {
    fn register(self: Arc<Self>, table: &mut HandlerTable) {
        table
            .register(
                "say",
                Handler::callback(|payload, done| {
                    let text = payload.as_str().context("say expects a string")?;
                    done.resolve(json!(format!("{text} world")));
                    Ok(())
                }),
            )
            .register("echo", Handler::deferred(|payload| async move { anyhow::Ok(payload) }))
            .register("fail", Handler::sync(|_| bail!("boom")))
            .register("pid", Handler::sync(|_| anyhow::Ok(json!(std::process::id()))))
            .register("is_worker", Handler::sync(|_| anyhow::Ok(json!(is_worker()))))
            .register(
                "sleep",
                Handler::deferred(|payload| async move {
                    let millis = payload.as_u64().unwrap_or(10);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    anyhow::Ok(json!(millis))
                }),
            );

        let this = Arc::clone(&self);
        table.register(
            "talk",
            Handler::deferred(move |payload| {
                let ctx = this.ctx.clone();
                async move {
                    ctx.notify("progress", json!({ "stage": "talking" }))?;
                    let heard = ctx.invoke("workerSaid", payload).await?;
                    anyhow::Ok(json!({ "pool_said": heard }))
                }
            }),
        );
    }
}

fn registry() -> ModuleRegistry {
    ModuleRegistry::new()
        .module("modules/api", |ctx| anyhow::Ok(Api { ctx }))
        .function("modules/echo", Handler::sync(anyhow::Ok))
        .module("modules/broken", |_ctx| -> anyhow::Result<Api> {
            bail!("missing configuration for modules/broken")
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if !is_worker() {
        init_tracing();
        let registry = registry();
        tracing::info!(modules = ?registry.paths(), "not spawned by a pool; nothing to serve");
        return Ok(());
    }
    run_worker_main(registry()).await
}
