//! Delivery of decisions to the desktop action executor.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use duckbot_core::Decision;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Decision receiver closed")]
    Closed,

    #[error("Failed to write decision: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode decision: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receives router output: `{disposition, payload}`.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn deliver(&self, decision: &Decision) -> Result<(), SinkError>;
}

/// Forwards decisions over an unbounded channel. Used in-process and in
/// tests.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Decision>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Decision>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DecisionSink for ChannelSink {
    async fn deliver(&self, decision: &Decision) -> Result<(), SinkError> {
        self.tx.send(decision.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Writes each decision as one JSON line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> DecisionSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, decision: &Decision) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(decision)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
