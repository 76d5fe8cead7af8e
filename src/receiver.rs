//! Inbound pipeline: socket frames to streaming message readers.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::message::{self, MessageReader};
use crate::pool::Pools;
use crate::transport::{FrameIn, FrameSource, TransportError};

/// Receive loop: one writer/reader pair per logical message, reader
/// published downstream before the first byte is buffered.
///
/// The inbound channel's bound is the backpressure chain: a full channel
/// suspends the publish, which stalls further socket reads. Ends on
/// cancellation, peer close, or transport fault; on exit the inbound sender
/// drops so the dispatcher observes completion, and the shared token is
/// cancelled so sibling pipelines stop too.
pub(crate) async fn run<S: FrameSource>(
    mut source: S,
    inbound: mpsc::Sender<MessageReader>,
    pools: Pools,
    frame_notices_max: usize,
    block_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            () = cancel.cancelled() => break,
            received = source.receive() => match received {
                Ok(frame) => frame,
                Err(TransportError::Closed) => {
                    debug!("peer closed the connection");
                    break;
                }
                Err(error) => {
                    warn!(%error, "receive pipeline failed");
                    break;
                }
            },
        };
        if !pump_message(
            &mut source,
            &inbound,
            &pools,
            frame_notices_max,
            block_size,
            first,
            &cancel,
        )
        .await
        {
            break;
        }
    }
    cancel.cancel();
    debug!("receive pipeline stopped");
}

/// Stream one logical message. Returns false when the pipeline should end.
async fn pump_message<S: FrameSource>(
    source: &mut S,
    inbound: &mpsc::Sender<MessageReader>,
    pools: &Pools,
    frame_notices_max: usize,
    block_size: usize,
    first: FrameIn,
    cancel: &CancellationToken,
) -> bool {
    let initial_capacity = block_size.max(first.payload.len());
    let (writer, reader) = message::channel(pools, frame_notices_max, initial_capacity);

    // publish before the first append: header peeking starts immediately,
    // and a full channel stalls the socket here
    tokio::select! {
        () = cancel.cancelled() => return false,
        published = inbound.send(reader) => {
            if published.is_err() {
                return false;
            }
        }
    }

    let mut frame = first;
    let mut abandoned = false;
    loop {
        if abandoned {
            trace!(len = frame.payload.len(), "draining frame of an abandoned message");
        } else {
            let appended = tokio::select! {
                () = cancel.cancelled() => return false,
                result = writer.append(&frame.payload, frame.end_of_message) => result,
            };
            if appended.is_err() {
                abandoned = true;
            }
        }
        if frame.end_of_message {
            return true;
        }
        frame = tokio::select! {
            () = cancel.cancelled() => return false,
            received = source.receive() => match received {
                Ok(frame) => frame,
                Err(TransportError::Closed) => {
                    debug!("peer closed mid-message");
                    return false;
                }
                Err(error) => {
                    warn!(%error, "receive pipeline failed mid-message");
                    return false;
                }
            },
        };
    }
}
