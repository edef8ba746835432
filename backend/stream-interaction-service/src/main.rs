use serde::Deserialize;
use serde_json::json;
use std::env;
use std::sync::Arc;
use stream_interaction_service::{
    config::Config,
    logging, metrics,
    models::{InboundEvent, InboundPayload, OperatorCommand, StreamMetadata},
    services::{SandboxPaymentProcessor, SessionHandle, SessionRegistry, StaticDirectory, SystemClock},
    EngineError,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One line of stdin
#[derive(Debug, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum Frame {
    Event {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(flatten)]
        payload: InboundPayload,
    },
    Command {
        actor: String,
        command: OperatorCommand,
    },
    Dashboard,
    Export,
}

fn stream_metadata_from_env() -> StreamMetadata {
    let owner_id = env::var("STREAM_OWNER_ID").unwrap_or_else(|_| "owner".to_string());
    StreamMetadata {
        stream_id: env::var("STREAM_ID")
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .unwrap_or_else(Uuid::new_v4),
        title: env::var("STREAM_TITLE").unwrap_or_else(|_| "Untitled stream".to_string()),
        owner_username: env::var("STREAM_OWNER_NAME").unwrap_or_else(|_| owner_id.clone()),
        owner_id,
        category: env::var("STREAM_CATEGORY").ok(),
    }
}

fn error_line(error: &EngineError) -> String {
    json!({
        "frame": "error",
        "kind": error.kind(),
        "status": error.status_code(),
        "retryable": error.is_retryable(),
        "message": error.to_string(),
    })
    .to_string()
}

fn reply_line<T: serde::Serialize>(result: Result<T, EngineError>) -> String {
    match result {
        Ok(value) => json!({ "frame": "reply", "result": value }).to_string(),
        Err(e) => error_line(&e),
    }
}

async fn handle_frame(handle: &SessionHandle, line: &str) -> Option<String> {
    let frame: Frame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "unreadable input frame");
            return Some(error_line(&EngineError::validation(format!("bad frame: {}", e))));
        }
    };

    match frame {
        Frame::Event { user_id, payload } => {
            let event = InboundEvent {
                session_id: handle.session_id(),
                user_id,
                payload,
            };
            handle.submit(event).err().map(|e| error_line(&e))
        }
        Frame::Command { actor, command } => Some(reply_line(handle.execute(&actor, command).await)),
        Frame::Dashboard => Some(reply_line(handle.dashboard().await)),
        Frame::Export => Some(reply_line(handle.export_moderation_logs().await)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    logging::init_tracing(&config.logging);

    tracing::info!("Starting stream interaction service...");
    info!(
        service = %config.service_name,
        environment = %config.environment,
        queue_capacity = config.session.inbound_queue_capacity,
        "Configuration loaded"
    );

    let registry = SessionRegistry::new(
        config.clone(),
        Arc::new(SystemClock),
        Arc::new(SandboxPaymentProcessor::default()),
        Arc::new(StaticDirectory::new()),
    );

    let session_id = Uuid::new_v4();
    let handle = registry.open(session_id)?;

    // Single stdout writer so envelopes and replies never interleave mid-line
    let (out_tx, mut out_rx) = mpsc::channel::<String>(config.session.event_buffer);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
            {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut envelopes = handle.subscribe();
    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match envelopes.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(line) => {
                        if forward_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode envelope"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "stdout forwarder lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let metadata = stream_metadata_from_env();
    info!(session_id = %session_id, title = %metadata.title, owner_id = %metadata.owner_id, "opening stream");
    handle.initialize(metadata).await?;
    handle.start().await?;

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(reply) = handle_frame(&handle, line).await {
                        let _ = out_tx.send(reply).await;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            },
        }
    }

    let summary = registry.close(session_id).await;
    let _ = out_tx
        .send(json!({ "frame": "summary", "result": summary.as_ref().ok() }).to_string())
        .await;
    if let Err(e) = &summary {
        warn!(error = %e, "stream did not stop cleanly");
    }

    drop(handle);
    drop(out_tx);
    let _ = forwarder.await;
    let _ = writer.await;

    info!(metrics = %metrics::render(), "final metrics");
    info!("Stream interaction service stopped");
    Ok(())
}
