//! Streaming JSON-RPC client driver over a persistent WebSocket.
//!
//! `framelink` is the transport and correlation core of a database client:
//! it owns one WebSocket, frames outbound requests, streams inbound frames
//! into per-message readers, classifies each message by sniffing only its
//! leading bytes, and routes it to the request or subscription that is
//! waiting on its correlation id.
//!
//! Three pipeline tasks run per open connection:
//!
//! - the **receiver** turns socket frames into [`message::MessageReader`]s,
//!   publishing each reader downstream before its first byte is buffered so
//!   consumers stream bodies that are still arriving;
//! - the **dispatcher** peeks a bounded header window, runs the
//!   [`header`] grammars, and delivers to the pending registry's handler for
//!   that id; unknown ids and unparseable headers are dropped silently;
//! - the **transmitter** writes block-sized frames with exactly one
//!   end-of-message marker per payload and drains obligated control replies.
//!
//! Pending requests live in a sliding-TTL registry so abandoned ids cannot
//! accumulate. Buffers and wakeup channels are pooled per client via
//! [`pool::Pools`].
//!
//! ```no_run
//! use framelink::{Client, ClientOptions, Request};
//! use url::Url;
//!
//! # async fn run() -> Result<(), framelink::DriverError> {
//! let client = Client::new(ClientOptions::default())?;
//! client.open(&Url::parse("ws://127.0.0.1:8000/rpc").expect("valid url")).await?;
//! let response = client.send(Request::new("ping")).await?;
//! println!("{:?}", response.result);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod message;
pub mod pool;
pub mod proto;
pub mod transport;

mod client;
mod dispatcher;
mod handler;
mod receiver;
mod registry;
mod transmitter;

pub use client::{Client, Subscription};
pub use config::{ClientOptions, ConfigError, InvalidField};
pub use error::DriverError;
pub use proto::{ErrorPayload, Notification, Params, Request, Response};
