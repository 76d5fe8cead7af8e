//! Outbound pipeline: serialized payloads to block-sized frames.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::transport::{ControlFrame, ControlKind, FrameSink, TransportError};

/// One serialized request ready for framing.
pub(crate) struct OutboundMessage {
    pub payload: Bytes,
}

/// Send loop. Control obligations take priority over data; cancellation is
/// observed only between messages, never mid-message, so a started message
/// is always terminated on the wire. A close frame goes out on the way down.
pub(crate) async fn run<K: FrameSink>(
    mut sink: K,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    mut control: mpsc::Receiver<ControlFrame>,
    block_size: usize,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            obligation = control.recv() => {
                let Some(frame) = obligation else { break };
                let closing = frame.kind == ControlKind::Close;
                if let Err(error) = sink.send_control(frame).await {
                    warn!(%error, "send pipeline failed delivering a control reply");
                    break;
                }
                if closing {
                    debug!("close reply delivered, send pipeline ending");
                    break;
                }
            }
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(error) = write_message(&mut sink, &message.payload, block_size).await {
                    warn!(%error, "send pipeline failed mid-message");
                    break;
                }
            }
        }
    }
    if let Err(error) = sink.close().await {
        trace!(%error, "close frame not delivered");
    }
    cancel.cancel();
    debug!("send pipeline stopped");
}

/// Frame one payload. The final-frame flag rides the naturally short last
/// block; a payload that is an exact multiple of the block size (or empty)
/// has no short block, so an explicit zero-length final frame terminates the
/// message.
async fn write_message<K: FrameSink>(
    sink: &mut K,
    payload: &[u8],
    block_size: usize,
) -> Result<(), TransportError> {
    let mut wrote_final = false;
    for block in payload.chunks(block_size) {
        let end_of_message = block.len() < block_size;
        sink.send(block, end_of_message).await?;
        wrote_final = end_of_message;
    }
    if !wrote_final {
        sink.send(&[], true).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
