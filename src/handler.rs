//! Dispatch targets for correlated inbound messages.

use tokio::sync::{mpsc, oneshot};

use crate::header::Header;
use crate::message::MessageReader;

/// A classified message handed to whoever registered its id.
pub struct Dispatched {
    /// The sniffed header.
    pub header: Header,
    /// Reader over the (possibly still arriving) message body, positioned at
    /// the start.
    pub reader: MessageReader,
}

/// What happens to a message once its id is matched.
///
/// An exhaustive enum rather than a trait object: dispatch behaviour differs
/// structurally (unregister-on-delivery vs stay-registered) and the match in
/// the dispatcher keeps that visible.
pub enum Handler {
    /// Single awaited response; consumed by delivery.
    OneShot(oneshot::Sender<Dispatched>),
    /// Subscription feed; survives delivery.
    Persistent(mpsc::Sender<Dispatched>),
}

impl Handler {
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }

    /// Whether the receiving side has gone away.
    pub fn receiver_gone(&self) -> bool {
        match self {
            Self::OneShot(tx) => tx.is_closed(),
            Self::Persistent(tx) => tx.is_closed(),
        }
    }
}
