//! Frame-level transport seam.
//!
//! The pipelines speak [`FrameSource`]/[`FrameSink`]: receive one data frame
//! with its end-of-message flag, send one block with its final flag. The
//! bundled [`ws`] adapter implements the seam over a real WebSocket; [`mock`]
//! provides an in-memory pair for tests and embedding. A connection also
//! carries a control channel: the read half surfaces obligated replies
//! (pongs, close echoes) that the write half must deliver.

pub mod mock;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Transport-level failures; any of these ends the owning pipeline.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The WebSocket upgrade was rejected or malformed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    /// Protocol failure reported by the WebSocket layer.
    #[error("websocket protocol error: {0}")]
    WebSocket(#[from] fastwebsockets::WebSocketError),
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One inbound data frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameIn {
    /// Frame payload bytes.
    pub payload: Bytes,
    /// Whether this frame completes the logical message.
    pub end_of_message: bool,
}

/// Control reply the write half owes the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlFrame {
    pub kind: ControlKind,
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    /// Reply to a peer ping.
    Pong,
    /// Echo of a peer close.
    Close,
}

/// Receiving half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next data frame.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] when the peer closes; any other error is a
    /// transport fault. Either way the receive pipeline shuts down.
    async fn receive(&mut self) -> Result<FrameIn, TransportError>;
}

/// Sending half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one block of a message; `end_of_message` marks the final block.
    ///
    /// # Errors
    ///
    /// Any transport fault; the send pipeline shuts down.
    async fn send(&mut self, payload: &[u8], end_of_message: bool) -> Result<(), TransportError>;

    /// Deliver an obligated control reply.
    ///
    /// # Errors
    ///
    /// Any transport fault.
    async fn send_control(&mut self, frame: ControlFrame) -> Result<(), TransportError>;

    /// Initiate a clean close.
    ///
    /// # Errors
    ///
    /// Any transport fault; teardown proceeds regardless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A connected transport: split halves plus the obligated-control channel
/// feeding the sender.
pub struct Connection<S, K> {
    pub source: S,
    pub sink: K,
    pub control: mpsc::Receiver<ControlFrame>,
}
