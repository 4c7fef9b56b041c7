//! Transport-side send primitives.
//!
//! A [`FrameSink`] is the per-connection "write one frame" operation supplied by
//! the connection layer. The core never calls it concurrently for the same
//! client: each client has exactly one writer task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};

use crate::frame::EventFrame;

/// Why a frame could not be delivered to a client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The peer (or its response body) has gone away.
    #[error("connection closed")]
    Closed,

    /// The write did not complete within the configured send timeout.
    #[error("send timed out after {0:?}")]
    TimedOut(Duration),

    /// The client's outbound queue was full (peer not keeping up).
    #[error("outbound queue full")]
    QueueFull,

    /// Transport-specific failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Write a single frame to one connection.
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    async fn send(&self, frame: &EventFrame) -> Result<(), SendError>;
}

#[async_trait]
impl<S> FrameSink for Arc<S>
where
    S: FrameSink + ?Sized,
{
    async fn send(&self, frame: &EventFrame) -> Result<(), SendError> {
        (**self).send(frame).await
    }
}

/// Sink that forwards frames into a bounded channel.
///
/// The receiving half usually backs a streaming HTTP response. When the
/// receiver is dropped, sends fail with [`SendError::Closed`]; when it stops
/// polling, sends block until the writer's send timeout fires.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<EventFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<EventFrame>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver it feeds.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<EventFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: &EventFrame) -> Result<(), SendError> {
        self.tx.send(frame.clone()).await.map_err(|_| SendError::Closed)
    }
}

/// Sink that writes encoded frames to a raw byte stream (socket, pipe).
#[derive(Debug)]
pub struct IoSink<W> {
    writer: Mutex<W>,
}

impl<W> IoSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> FrameSink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: &EventFrame) -> Result<(), SendError> {
        let bytes = frame.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes.as_bytes()).await.map_err(io_error)?;
        writer.flush().await.map_err(io_error)
    }
}

fn io_error(err: std::io::Error) -> SendError {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted => SendError::Closed,
        _ => SendError::Transport(err.to_string()),
    }
}
