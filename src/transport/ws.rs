//! WebSocket transport over `fastwebsockets` split halves.
//!
//! [`connect`] performs the HTTP upgrade against a `ws://` endpoint and
//! splits the socket so the receive and send pipelines own their halves
//! independently. Automatic close/pong handling is disabled: obligated
//! replies surface on the connection's control channel and are written by
//! the send pipeline, keeping all socket writes on one task.

use std::future::Future;

use bytes::Bytes;
use fastwebsockets::{
    Frame, OpCode, Payload, Role, WebSocket, WebSocketError, WebSocketRead, WebSocketWrite,
    handshake,
};
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::trace;
use url::Url;

use super::{Connection, ControlFrame, ControlKind, FrameIn, FrameSink, FrameSource};
use crate::transport::TransportError;

const CONTROL_CAPACITY: usize = 8;
const CLOSE_NORMAL: u16 = 1000;

struct SpawnExecutor;

impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        tokio::spawn(fut);
    }
}

type Upgraded = TokioIo<hyper::upgrade::Upgraded>;

/// The connection type produced by [`connect`].
pub type WsConnection =
    Connection<WsFrameSource<ReadHalf<Upgraded>>, WsFrameSink<WriteHalf<Upgraded>>>;

/// Open a WebSocket connection to `endpoint` and split it for the pipelines.
///
/// Only `ws://` endpoints are supported here; a TLS-capable transport can be
/// injected through [`Client::open_with`](crate::Client::open_with).
///
/// # Errors
///
/// [`TransportError::Handshake`] for unusable endpoints or rejected
/// upgrades, [`TransportError::Io`] for socket failures.
pub async fn connect(endpoint: &Url) -> Result<WsConnection, TransportError> {
    if endpoint.scheme() != "ws" {
        return Err(TransportError::Handshake(format!(
            "unsupported scheme `{}`",
            endpoint.scheme()
        )));
    }
    let host = endpoint
        .host_str()
        .ok_or_else(|| TransportError::Handshake("endpoint has no host".to_owned()))?;
    let port = endpoint.port_or_known_default().unwrap_or(80);
    let stream = TcpStream::connect((host, port)).await?;

    let request = hyper::Request::builder()
        .method("GET")
        .uri(endpoint.as_str())
        .header("Host", host)
        .header(hyper::header::UPGRADE, "websocket")
        .header(hyper::header::CONNECTION, "upgrade")
        .header("Sec-WebSocket-Key", handshake::generate_key())
        .header("Sec-WebSocket-Version", "13")
        .body(Empty::<Bytes>::new())
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    let (ws, _response) = handshake::client(&SpawnExecutor, request, stream).await?;
    trace!(%endpoint, "websocket handshake complete");
    Ok(split(ws))
}

/// Wrap an already-established WebSocket in the transport seam.
///
/// Useful for duplex-backed tests and for callers that performed their own
/// handshake (for instance over TLS).
pub fn from_stream<S>(
    stream: S,
) -> Connection<WsFrameSource<ReadHalf<S>>, WsFrameSink<WriteHalf<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    split(WebSocket::after_handshake(stream, Role::Client))
}

fn split<S>(mut ws: WebSocket<S>) -> Connection<WsFrameSource<ReadHalf<S>>, WsFrameSink<WriteHalf<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // frames pass through raw; obligated replies go via the control channel
    ws.set_auto_close(false);
    ws.set_auto_pong(false);
    let (read, write) = ws.split(tokio::io::split);
    let (control_tx, control_rx) = tokio::sync::mpsc::channel(CONTROL_CAPACITY);
    Connection {
        source: WsFrameSource {
            read,
            control: control_tx,
        },
        sink: WsFrameSink {
            write,
            continuing: false,
        },
        control: control_rx,
    }
}

/// Read half: yields data frames, forwards obligated replies.
pub struct WsFrameSource<S> {
    read: WebSocketRead<S>,
    control: tokio::sync::mpsc::Sender<ControlFrame>,
}

#[async_trait::async_trait]
impl<S> FrameSource for WsFrameSource<S>
where
    S: AsyncRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<FrameIn, TransportError> {
        loop {
            let control = self.control.clone();
            let mut obligated = move |frame: Frame<'_>| {
                let reply = obligated_reply(&frame);
                let control = control.clone();
                async move {
                    control
                        .send(reply)
                        .await
                        .map_err(|_| WebSocketError::ConnectionClosed)
                }
            };
            let frame = self.read.read_frame(&mut obligated).await?;
            match frame.opcode {
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    return Ok(FrameIn {
                        payload: Bytes::copy_from_slice(&frame.payload),
                        end_of_message: frame.fin,
                    });
                }
                OpCode::Close => return Err(TransportError::Closed),
                OpCode::Ping => {
                    let reply = ControlFrame {
                        kind: ControlKind::Pong,
                        payload: Bytes::copy_from_slice(&frame.payload),
                    };
                    if self.control.send(reply).await.is_err() {
                        return Err(TransportError::Closed);
                    }
                }
                OpCode::Pong => {}
            }
        }
    }
}

fn obligated_reply(frame: &Frame<'_>) -> ControlFrame {
    let kind = if frame.opcode == OpCode::Close {
        ControlKind::Close
    } else {
        ControlKind::Pong
    };
    ControlFrame {
        kind,
        payload: Bytes::copy_from_slice(&frame.payload),
    }
}

/// Write half: emits data blocks and control replies.
pub struct WsFrameSink<S> {
    write: WebSocketWrite<S>,
    continuing: bool,
}

#[async_trait::async_trait]
impl<S> FrameSink for WsFrameSink<S>
where
    S: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &[u8], end_of_message: bool) -> Result<(), TransportError> {
        let opcode = if self.continuing {
            OpCode::Continuation
        } else {
            OpCode::Text
        };
        let frame = Frame::new(end_of_message, opcode, None, Payload::Borrowed(payload));
        self.write.write_frame(frame).await?;
        self.continuing = !end_of_message;
        Ok(())
    }

    async fn send_control(&mut self, frame: ControlFrame) -> Result<(), TransportError> {
        let ws_frame = match frame.kind {
            ControlKind::Pong => Frame::pong(Payload::Borrowed(&frame.payload)),
            ControlKind::Close => Frame::close_raw(Payload::Borrowed(&frame.payload)),
        };
        self.write.write_frame(ws_frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write
            .write_frame(Frame::close(CLOSE_NORMAL, b""))
            .await?;
        Ok(())
    }
}
