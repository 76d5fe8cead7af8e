//! Correlation pipeline: classify inbound messages and deliver them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::handler::Dispatched;
use crate::header;
use crate::message::MessageReader;
use crate::pool::Pools;
use crate::registry::{DispatchTarget, PendingRegistry};

/// Dispatch loop: peek each message's header, match it to a pending id,
/// deliver. Unparseable headers and unknown or expired ids drop the message
/// silently; late replies after TTL eviction are expected traffic, not
/// faults.
pub(crate) async fn run(
    mut inbound: mpsc::Receiver<MessageReader>,
    registry: Arc<PendingRegistry>,
    pools: Pools,
    header_bytes_max: usize,
    cancel: CancellationToken,
) {
    loop {
        let reader = tokio::select! {
            () = cancel.cancelled() => break,
            next = inbound.recv() => match next {
                Some(reader) => reader,
                None => break,
            },
        };
        dispatch_one(reader, &registry, &pools, header_bytes_max, &cancel).await;
    }
    debug!("dispatch pipeline stopped");
}

async fn dispatch_one(
    mut reader: MessageReader,
    registry: &PendingRegistry,
    pools: &Pools,
    header_bytes_max: usize,
    cancel: &CancellationToken,
) {
    let header = {
        let mut peek = pools.buffers.rent(header_bytes_max);
        peek.resize(header_bytes_max, 0);
        let got = reader.read(&mut peek).await;
        header::parse(&peek[..got])
    };
    // the consumer sees the message from the beginning
    reader.seek(0);

    let Some(header) = header else {
        trace!("dropping message with an unclassifiable header");
        return;
    };
    let id = header.id().to_owned();
    match registry.begin_dispatch(&id) {
        None => {
            debug!(id = %id, "dropping message for an unknown or expired id");
        }
        Some(DispatchTarget::OneShot(tx)) => {
            // the entry is already unregistered; a gone waiter just means
            // the message dies here
            if tx.send(Dispatched { header, reader }).is_err() {
                trace!(id = %id, "waiter gone before delivery");
            }
        }
        Some(DispatchTarget::Persistent(tx)) => {
            let delivery = Dispatched { header, reader };
            tokio::select! {
                () = cancel.cancelled() => {}
                sent = tx.send(delivery) => {
                    if sent.is_err() {
                        registry.remove(&id);
                        trace!(id = %id, "subscriber gone, handler unregistered");
                    }
                }
            }
        }
    }
}
