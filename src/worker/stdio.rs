//! Entry point for worker subprocesses: the protocol over stdin/stdout.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::registry::ModuleRegistry;
use super::runtime::WorkerRuntime;
use crate::core::{AppResult, Message};
use crate::util::init_worker_tracing;

/// Serve `registry` over stdin/stdout until the pool closes the link.
///
/// Call this from the `main` of the worker binary. Stdout carries protocol
/// lines only, so logging is routed to stderr.
///
/// ```rust,ignore
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     run_worker_main(ModuleRegistry::new().module("modules/api", Api::new)).await
/// }
/// ```
///
/// # Errors
///
/// Fails if stdout cannot be written.
pub async fn run_worker_main(registry: ModuleRegistry) -> AppResult<()> {
    init_worker_tracing();

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match Message::from_line(&line) {
                Ok(message) => {
                    if inbound_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "ignoring malformed line from pool"),
            }
        }
        Ok::<_, std::io::Error>(())
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound_rx.recv().await {
            stdout.write_all(message.to_line()?.as_bytes()).await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    WorkerRuntime::new(registry).serve(inbound_rx, outbound_tx).await;

    if let Ok(Err(error)) = reader.await {
        warn!(%error, "stdin read failed");
    }
    // Handlers still running hold sender clones; their replies have nowhere
    // to go once the pool closed the link.
    writer.abort();
    let result = match writer.await {
        Ok(result) => result,
        Err(join) if join.is_cancelled() => Ok(()),
        Err(join) => Err(join.into()),
    };
    debug!("worker exiting");
    result
}
