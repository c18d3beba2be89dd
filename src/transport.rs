//! Broadcast transport
//!
//! Moves events between the control plane and the outside world as
//! newline-delimited JSON. Inbound lines are published on the bus; processed
//! events coming out of the supervisor are written to a [`BroadcastSink`].

use crate::bus::{EventBus, EventDraft, GlobalEvent};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Destination for re-broadcast events
#[async_trait]
pub trait BroadcastSink: Send {
    async fn deliver(&mut self, event: &GlobalEvent) -> Result<()>;
}

/// Writes each event as one JSON line
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> BroadcastSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&mut self, event: &GlobalEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Counts from one pump run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    pub published: usize,
    pub rejected: usize,
}

/// Drive a sink from a supervisor subscription until the channel closes
///
/// Returns the number of events delivered. A lagging subscriber skips the
/// events it missed; a sink error stops forwarding.
pub async fn forward_broadcasts<S>(mut rx: broadcast::Receiver<GlobalEvent>, mut sink: S) -> Result<usize>
where
    S: BroadcastSink,
{
    let mut delivered = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                sink.deliver(&event).await?;
                delivered += 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Broadcast subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(delivered, "Broadcast forwarding finished");
    Ok(delivered)
}

/// Publish every JSON line from `reader` until end of input
///
/// Blank lines are skipped. Lines that are not JSON or fail validation are
/// logged and counted as rejected; they never reach the bus.
pub async fn pump_json_lines<R>(reader: R, bus: &EventBus) -> Result<PumpStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = PumpStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let published = serde_json::from_str::<EventDraft>(line)
            .map_err(crate::OverseerError::from)
            .and_then(|draft| bus.publish(draft));
        match published {
            Ok(id) => {
                debug!(event_id = %id, "Published inbound event");
                stats.published += 1;
            }
            Err(e) => {
                warn!(error = %e, "Rejected inbound line");
                stats.rejected += 1;
            }
        }
    }

    info!(published = stats.published, rejected = stats.rejected, "Input exhausted");
    Ok(stats)
}
