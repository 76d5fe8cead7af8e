//! Crate-wide error type.

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Failures surfaced by the [`Client`](crate::Client) facade.
///
/// Protocol-level anomalies on inbound traffic (unparseable headers, unknown
/// correlation ids) are not errors; they drop the offending message and the
/// connection keeps running.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Client options failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The operation requires an open connection.
    #[error("connection is not open")]
    NotOpen,
    /// `open` was called while a connection is already established.
    #[error("connection is already open")]
    AlreadyOpen,
    /// A request with the same correlation id is still in flight.
    #[error("a request with id `{0}` is already pending")]
    IdPending(String),
    /// The outbound request could not be serialized.
    #[error("failed to serialize request")]
    Serialize(#[source] serde_json::Error),
    /// The inbound message body was not valid JSON.
    #[error("failed to deserialize message body")]
    Deserialize(#[source] serde_json::Error),
    /// A notification-shaped message arrived where a response was awaited.
    #[error("expected a response, received a notification")]
    ExpectedResponse,
    /// A response-shaped message arrived on a subscription stream.
    #[error("expected a notification, received a response")]
    ExpectedNotification,
    /// The pending request was evicted or the connection torn down before a
    /// response arrived.
    #[error("request `{id}` was cancelled before a response arrived")]
    Cancelled {
        /// Correlation id of the abandoned request.
        id: String,
    },
    /// The connection closed while the operation was in flight.
    #[error("connection closed while the operation was in flight")]
    ConnectionClosed,
}
