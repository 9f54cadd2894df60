//! Copilot host: runs the background core as a long-lived process.
//!
//! Requests arrive as one JSON message per stdin line and answers leave as
//! one JSON line on stdout. Logs go to stderr.

mod config;

use anyhow::{Context, Result};
use background::{DetachedSurfaces, LlmGateway, MessageRouter};
use providers::ProviderRouter;
use services::notifier::{DesktopNotifier, LogNotifier, SystemNotifier};
use services::{
    JsonFileStore, KeyValueStore, MonitorEngine, NotificationDispatcher, OffscreenWorker,
    SettingsStore, TokioAlarmScheduler,
};
use shared::messages::{RequestMessage, ResponseEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::HostConfig;

/// How long pending answers may take to flush at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn init_logging() {
    let filter = std::env::var("COPILOT_LOG")
        .ok()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parses one stdin line and hands it to the router. Malformed lines get
/// an error answer right away.
fn handle_line(router: &Arc<MessageRouter>, out: &mpsc::UnboundedSender<ResponseEnvelope>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let request: RequestMessage = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected malformed request: {}", e);
            let _ = out.send(ResponseEnvelope::err(format!("Invalid request: {}", e)));
            return;
        }
    };

    let action = request.action.clone();
    let request_id = request.request_id.clone();
    let reply = router.submit(request);
    let out = out.clone();
    tokio::spawn(async move {
        match reply.await {
            Ok(Some(response)) => {
                let _ = out.send(response);
            }
            Ok(None) => {}
            Err(_) => {
                error!(action = %action, "Request dropped without an answer");
                let _ = out.send(
                    ResponseEnvelope::err(format!("Internal error while handling {}", action))
                        .with_request_id(request_id),
                );
            }
        }
    });
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<ResponseEnvelope>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        match serde_json::to_string(&response) {
            Ok(line) => {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Err(e) => error!("Failed to encode response: {}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = HostConfig::load()?;
    let store_path = config.store_path();
    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(&store_path)
            .await
            .with_context(|| format!("opening store at {}", store_path.display()))?,
    );
    info!(path = %store_path.display(), "Store opened");

    let settings = SettingsStore::new(store.clone());
    settings
        .initialize_defaults()
        .await
        .context("initializing default settings")?;

    let worker = Arc::new(OffscreenWorker::new(Arc::new(config.worker_spawner())));
    if config.warm_worker {
        // a failed warm-up is retried on first use
        if let Err(e) = worker.ensure_ready().await {
            warn!("Offscreen worker warm-up failed: {}", e);
        }
    }

    let (scheduler, mut alarms) = TokioAlarmScheduler::new();
    let system: Arc<dyn SystemNotifier> = if config.desktop_notifications {
        Arc::new(DesktopNotifier)
    } else {
        Arc::new(LogNotifier)
    };
    let monitors = Arc::new(MonitorEngine::new(
        store.clone(),
        Arc::new(scheduler),
        worker.clone(),
        Arc::new(NotificationDispatcher::new(system)),
    ));
    let restored = monitors
        .restore_schedules()
        .await
        .context("restoring monitor schedules")?;
    info!(restored, "Monitor schedules restored");

    let gateway = LlmGateway::new(settings, ProviderRouter::new(config.http_client()));
    let router = Arc::new(MessageRouter::new(
        store,
        gateway,
        worker,
        monitors.clone(),
        Arc::new(DetachedSurfaces),
    ));

    let alarm_loop = tokio::spawn(async move {
        while let Some(id) = alarms.recv().await {
            let monitors = monitors.clone();
            tokio::spawn(async move {
                debug!(monitor = %id, "Alarm fired");
                match monitors.check(&id).await {
                    Ok(Some(result)) if result.changed => {
                        info!(monitor = %id, "Change detected")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(monitor = %id, "Check failed: {}", e),
                }
            });
        }
    });

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(out_rx));

    info!("Copilot host ready");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&router, &out_tx, &line),
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    alarm_loop.abort();
    drop(out_tx);
    match tokio::time::timeout(SHUTDOWN_GRACE, writer).await {
        Ok(Ok(result)) => result.context("writing responses")?,
        Ok(Err(e)) => warn!("Response writer stopped: {}", e),
        Err(_) => warn!("Dropping answers still pending after shutdown grace period"),
    }
    Ok(())
}
