//! In-memory transport for tests and embedding.
//!
//! [`pair`] yields a [`Connection`] to hand to the client and a
//! [`MockRemote`] that plays the server: push inbound frames, inspect what
//! the client sent, inject control obligations, or sever the link.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Connection, ControlFrame, FrameIn, FrameSink, FrameSource, TransportError};

/// One frame the client wrote to the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub payload: Vec<u8>,
    pub end_of_message: bool,
}

/// Everything observable on the client's write half.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    /// A data frame.
    Frame(SentFrame),
    /// An obligated control reply.
    Control(ControlFrame),
    /// The clean-close marker.
    Close,
}

/// Create a connected mock transport.
///
/// `inbound_capacity` bounds frames pushed by the remote but not yet
/// received by the client, mirroring socket buffering.
#[must_use]
pub fn pair(inbound_capacity: usize) -> (Connection<MockSource, MockSink>, MockRemote) {
    let (frame_tx, frame_rx) = mpsc::channel(inbound_capacity);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::channel(8);
    let connection = Connection {
        source: MockSource { frames: frame_rx },
        sink: MockSink { events: event_tx },
        control: control_rx,
    };
    let remote = MockRemote {
        frames: Some(frame_tx),
        events: event_rx,
        control: control_tx,
    };
    (connection, remote)
}

/// Client-side read half fed by the remote.
pub struct MockSource {
    frames: mpsc::Receiver<FrameIn>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn receive(&mut self) -> Result<FrameIn, TransportError> {
        self.frames.recv().await.ok_or(TransportError::Closed)
    }
}

/// Client-side write half recording everything sent.
pub struct MockSink {
    events: mpsc::UnboundedSender<SinkEvent>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, payload: &[u8], end_of_message: bool) -> Result<(), TransportError> {
        self.events
            .send(SinkEvent::Frame(SentFrame {
                payload: payload.to_vec(),
                end_of_message,
            }))
            .map_err(|_| TransportError::Closed)
    }

    async fn send_control(&mut self, frame: ControlFrame) -> Result<(), TransportError> {
        self.events
            .send(SinkEvent::Control(frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.events
            .send(SinkEvent::Close)
            .map_err(|_| TransportError::Closed)
    }
}

/// The server side of a mock connection.
pub struct MockRemote {
    frames: Option<mpsc::Sender<FrameIn>>,
    events: mpsc::UnboundedReceiver<SinkEvent>,
    control: mpsc::Sender<ControlFrame>,
}

impl MockRemote {
    /// Push one frame toward the client; suspends when the client's inbound
    /// buffer is full.
    ///
    /// # Panics
    ///
    /// Panics when the link was severed or the client dropped its source.
    pub async fn push_frame(&self, payload: &[u8], end_of_message: bool) {
        let frame = FrameIn {
            payload: Bytes::copy_from_slice(payload),
            end_of_message,
        };
        self.sender().send(frame).await.expect("client source alive");
    }

    /// Push a complete single-frame message.
    pub async fn push_message(&self, payload: &[u8]) {
        self.push_frame(payload, true).await;
    }

    /// Push a message split into frames of at most `frame_size` bytes.
    pub async fn push_message_in_frames(&self, payload: &[u8], frame_size: usize) {
        let mut chunks = payload.chunks(frame_size.max(1)).peekable();
        while let Some(chunk) = chunks.next() {
            self.push_frame(chunk, chunks.peek().is_none()).await;
        }
    }

    /// Try to push one frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns the frame back when the client's inbound buffer is full or
    /// the link is gone.
    pub fn try_push_frame(&self, payload: &[u8], end_of_message: bool) -> Result<(), FrameIn> {
        let frame = FrameIn {
            payload: Bytes::copy_from_slice(payload),
            end_of_message,
        };
        let Some(sender) = self.frames.as_ref() else {
            return Err(frame);
        };
        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame)
            | mpsc::error::TrySendError::Closed(frame) => frame,
        })
    }

    /// Inject an obligated control reply, as the read half would.
    ///
    /// # Panics
    ///
    /// Panics when the client's control channel is gone.
    pub async fn push_control(&self, frame: ControlFrame) {
        self.control.send(frame).await.expect("control channel alive");
    }

    /// Drop the inbound link; the client's next receive reports closure.
    pub fn sever(&mut self) {
        self.frames = None;
    }

    /// Next raw sink event, in order.
    pub async fn next_event(&mut self) -> Option<SinkEvent> {
        self.events.recv().await
    }

    /// Next data frame, skipping control traffic.
    pub async fn next_frame(&mut self) -> Option<SentFrame> {
        loop {
            match self.events.recv().await? {
                SinkEvent::Frame(frame) => return Some(frame),
                SinkEvent::Control(_) | SinkEvent::Close => {}
            }
        }
    }

    /// Next data frame without waiting, skipping control traffic.
    pub fn try_next_frame(&mut self) -> Option<SentFrame> {
        while let Ok(event) = self.events.try_recv() {
            if let SinkEvent::Frame(frame) = event {
                return Some(frame);
            }
        }
        None
    }

    /// Reassemble the next complete outbound message.
    pub async fn next_message(&mut self) -> Option<Vec<u8>> {
        let mut message = Vec::new();
        loop {
            let frame = self.next_frame().await?;
            message.extend_from_slice(&frame.payload);
            if frame.end_of_message {
                return Some(message);
            }
        }
    }

    fn sender(&self) -> &mpsc::Sender<FrameIn> {
        self.frames.as_ref().expect("link severed")
    }
}
