//! Read-only diagnostics port.
//!
//! Every connection to the diagnostics port immediately receives one JSON
//! object and is closed. Input is never read.
//!
//! ```text
//! {"appServerConnections":3,"LIFOStackSize":12}
//! ```
//!
//! Field names keep their historical spelling so existing monitoring keeps
//! working.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::shared::SharedState;
use crate::transport::{StackListener, ACCEPT_ERROR_BACKOFF};

/// Point-in-time server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSnapshot {
    /// Admitted sessions currently open.
    #[serde(rename = "appServerConnections")]
    pub app_server_connections: usize,
    /// Payloads currently on the stack.
    #[serde(rename = "LIFOStackSize")]
    pub lifo_stack_size: usize,
}

impl DiagnosticSnapshot {
    /// Serialize to a single-line JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Write one snapshot and close the stream.
pub async fn serve_snapshot<S>(mut stream: S, snapshot: &DiagnosticSnapshot) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let json = snapshot.to_json()?;
    debug!(
        "Diagnostic server connections.  Sending data and closing connection. {}",
        json
    );
    stream.write_all(json.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Accept diagnostics connections until `shutdown` fires, then drop the listener.
pub async fn run_diagnostic_listener(
    listener: StackListener,
    state: SharedState,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    info!("Diagnostic server started: {}", listener.local_addr());

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                // Counters are taken at accept time
                let snapshot = state.snapshot();
                tracker.spawn(async move {
                    if let Err(e) = serve_snapshot(stream, &snapshot).await {
                        error!(%peer, "Diagnostic error: {}", e);
                    } else {
                        debug!(%peer, "Diagnostic connection closed");
                    }
                });
            }
            Err(e) => {
                error!("Diagnostic server error: {}", e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    drop(listener);
    info!("Diagnostic server closed.");
}
