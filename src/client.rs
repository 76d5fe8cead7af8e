//! Connection facade: state machine, pipeline wiring, request lifecycle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::{ClientOptions, ConfigError};
use crate::dispatcher;
use crate::error::DriverError;
use crate::handler::{Dispatched, Handler};
use crate::header::{self, Header};
use crate::message::MessageReader;
use crate::proto::{Notification, Params, Request, Response};
use crate::receiver;
use crate::registry::PendingRegistry;
use crate::transmitter::{self, OutboundMessage};
use crate::transport::ws;
use crate::transport::{Connection, FrameSink, FrameSource};

const CLOSED: u8 = 0;
const OPENING: u8 = 1;
const OPEN: u8 = 2;
const CLOSING: u8 = 3;

/// A JSON-RPC connection over one persistent WebSocket.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. State
/// transitions (`open`, `close`) are guarded by an atomic compare-and-swap,
/// so calling them from the wrong state fails immediately instead of
/// queueing.
pub struct Client {
    options: ClientOptions,
    state: AtomicU8,
    active: Mutex<Option<Active>>,
}

/// Handles that exist only while the connection is open.
struct Active {
    cancel: CancellationToken,
    outbound: mpsc::Sender<OutboundMessage>,
    registry: Arc<PendingRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

fn lock(mutex: &Mutex<Option<Active>>) -> MutexGuard<'_, Option<Active>> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Client {
    /// Validate `options` and build a closed client.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] listing every invalid option.
    pub fn new(options: ClientOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            options,
            state: AtomicU8::new(CLOSED),
            active: Mutex::new(None),
        })
    }

    /// The frozen options this client runs with.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Whether the connection is open and its pipelines are still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        if self.state.load(Ordering::Acquire) != OPEN {
            return false;
        }
        lock(&self.active)
            .as_ref()
            .is_some_and(|active| !active.cancel.is_cancelled())
    }

    /// Connect to a `ws://` endpoint and start the pipelines.
    ///
    /// # Errors
    ///
    /// [`DriverError::AlreadyOpen`] when not closed, or a
    /// [`TransportError`](crate::transport::TransportError) from the
    /// handshake.
    pub async fn open(&self, endpoint: &Url) -> Result<(), DriverError> {
        self.transition(CLOSED, OPENING, DriverError::AlreadyOpen)?;
        match ws::connect(endpoint).await {
            Ok(connection) => {
                self.install(connection);
                self.state.store(OPEN, Ordering::Release);
                debug!(%endpoint, "connection open");
                Ok(())
            }
            Err(error) => {
                self.state.store(CLOSED, Ordering::Release);
                Err(error.into())
            }
        }
    }

    /// Start the pipelines over an already-established transport (a mock
    /// pair, or an externally negotiated TLS socket).
    ///
    /// # Errors
    ///
    /// [`DriverError::AlreadyOpen`] when not closed.
    pub fn open_with<S, K>(&self, connection: Connection<S, K>) -> Result<(), DriverError>
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        self.transition(CLOSED, OPENING, DriverError::AlreadyOpen)?;
        self.install(connection);
        self.state.store(OPEN, Ordering::Release);
        Ok(())
    }

    /// Stop the pipelines, cancel every pending request, close the socket.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotOpen`] when the connection is not open.
    pub async fn close(&self) -> Result<(), DriverError> {
        self.transition(OPEN, CLOSING, DriverError::NotOpen)?;
        let active = lock(&self.active).take();
        if let Some(active) = active {
            active.cancel.cancel();
            for task in active.tasks {
                if task.await.is_err() {
                    warn!("pipeline task panicked during shutdown");
                }
            }
            // waiters observe cancellation exactly once
            active.registry.clear();
        }
        self.state.store(CLOSED, Ordering::Release);
        debug!("connection closed");
        Ok(())
    }

    /// Send a request and await its correlated response.
    ///
    /// A missing id is generated; absent params become the explicit empty
    /// array unless configured off. The one-shot handler registers before
    /// the payload enters the send pipeline, so a response can never arrive
    /// unmatched.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotOpen`], [`DriverError::IdPending`] on id collision,
    /// [`DriverError::Cancelled`] when evicted or torn down before the
    /// response, [`DriverError::ExpectedResponse`] for a notification-shaped
    /// reply, and serialization or body-decoding failures.
    pub async fn send(&self, mut request: Request) -> Result<Response, DriverError> {
        let (outbound, registry) = self.pipeline_handles()?;
        let id = self.ensure_id(&mut request);
        self.default_params(&mut request);

        let (tx, rx) = oneshot::channel();
        if !registry.try_add(id.clone(), Handler::OneShot(tx)) {
            return Err(DriverError::IdPending(id));
        }

        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(error) => {
                registry.remove(&id);
                return Err(DriverError::Serialize(error));
            }
        };
        trace!(id = %id, method = %request.method, "queueing request");
        if outbound
            .send(OutboundMessage {
                payload: payload.into(),
            })
            .await
            .is_err()
        {
            registry.remove(&id);
            return Err(DriverError::ConnectionClosed);
        }

        let dispatched = rx
            .await
            .map_err(|_| DriverError::Cancelled { id: id.clone() })?;
        let header = match dispatched.header {
            Header::Response(header) => header,
            Header::Notification(_) => return Err(DriverError::ExpectedResponse),
        };
        let result = decode_member(dispatched.reader, "result").await?;
        Ok(Response {
            id: header.id,
            error: header.error,
            result,
        })
    }

    /// Send a fire-and-forget request: the `async` flag is set, nothing is
    /// registered, and no response is awaited.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotOpen`], [`DriverError::ConnectionClosed`], or a
    /// serialization failure.
    pub async fn notify(&self, mut request: Request) -> Result<(), DriverError> {
        let (outbound, _) = self.pipeline_handles()?;
        request.fire_and_forget = true;
        self.ensure_id(&mut request);
        self.default_params(&mut request);

        let payload = serde_json::to_vec(&request).map_err(DriverError::Serialize)?;
        trace!(method = %request.method, "queueing fire-and-forget request");
        outbound
            .send(OutboundMessage {
                payload: payload.into(),
            })
            .await
            .map_err(|_| DriverError::ConnectionClosed)
    }

    /// Register a persistent handler for `id` and stream its notifications.
    ///
    /// The subscription unregisters itself when dropped.
    ///
    /// # Errors
    ///
    /// [`DriverError::NotOpen`] or [`DriverError::IdPending`] when the id is
    /// already registered.
    pub fn subscribe(&self, id: impl Into<String>) -> Result<Subscription, DriverError> {
        let (_, registry) = self.pipeline_handles()?;
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.options.subscription_buffer());
        if !registry.try_add(id.clone(), Handler::Persistent(tx)) {
            return Err(DriverError::IdPending(id));
        }
        Ok(Subscription {
            id,
            inbox: rx,
            registry,
        })
    }

    fn transition(&self, from: u8, to: u8, wrong_state: DriverError) -> Result<(), DriverError> {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| wrong_state)
    }

    fn install<S, K>(&self, connection: Connection<S, K>)
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let cancel = CancellationToken::new();
        let registry = Arc::new(PendingRegistry::new(
            self.options.pending_ttl(),
            self.options.sweep_interval(),
        ));
        let (inbound_tx, inbound_rx) = mpsc::channel(self.options.inbound_messages_max());
        let (outbound_tx, outbound_rx) = mpsc::channel(self.options.outbound_messages_max());
        let pools = self.options.pools().clone();

        let tasks = vec![
            tokio::spawn(receiver::run(
                connection.source,
                inbound_tx,
                pools.clone(),
                self.options.frame_notices_max(),
                self.options.block_size(),
                cancel.clone(),
            )),
            tokio::spawn(dispatcher::run(
                inbound_rx,
                Arc::clone(&registry),
                pools,
                self.options.header_bytes_max(),
                cancel.clone(),
            )),
            tokio::spawn(transmitter::run(
                connection.sink,
                outbound_rx,
                connection.control,
                self.options.block_size(),
                cancel.clone(),
            )),
        ];
        *lock(&self.active) = Some(Active {
            cancel,
            outbound: outbound_tx,
            registry,
            tasks,
        });
    }

    fn pipeline_handles(
        &self,
    ) -> Result<(mpsc::Sender<OutboundMessage>, Arc<PendingRegistry>), DriverError> {
        if self.state.load(Ordering::Acquire) != OPEN {
            return Err(DriverError::NotOpen);
        }
        let guard = lock(&self.active);
        let active = guard.as_ref().ok_or(DriverError::NotOpen)?;
        if active.cancel.is_cancelled() {
            return Err(DriverError::ConnectionClosed);
        }
        Ok((active.outbound.clone(), Arc::clone(&active.registry)))
    }

    fn ensure_id(&self, request: &mut Request) -> String {
        request
            .id
            .get_or_insert_with(|| header::random_id(self.options.id_bytes()))
            .clone()
    }

    fn default_params(&self, request: &mut Request) {
        if request.params.is_absent() && self.options.send_empty_params() {
            request.params = Params::empty();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.active).take() {
            active.cancel.cancel();
        }
    }
}

/// Pull stream of notifications for one subscribed id.
pub struct Subscription {
    id: String,
    inbox: mpsc::Receiver<Dispatched>,
    registry: Arc<PendingRegistry>,
}

impl Subscription {
    /// The id this subscription is registered under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Await the next notification. `None` means the handler was evicted or
    /// the connection closed.
    pub async fn next(&mut self) -> Option<Result<Notification, DriverError>> {
        let dispatched = self.inbox.recv().await?;
        Some(decode_notification(dispatched).await)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

async fn decode_notification(dispatched: Dispatched) -> Result<Notification, DriverError> {
    let header = match dispatched.header {
        Header::Notification(header) => header,
        Header::Response(_) => return Err(DriverError::ExpectedNotification),
    };
    let params = decode_member(dispatched.reader, "params").await?;
    Ok(Notification {
        id: header.id,
        method: header.method,
        error: header.error,
        params,
    })
}

/// Read the complete body and extract one top-level member, distinguishing
/// an absent member (`None`) from an explicit null (`Some(Value::Null)`).
async fn decode_member(
    mut reader: MessageReader,
    member: &str,
) -> Result<Option<Value>, DriverError> {
    reader.seek(0);
    let mut body = Vec::with_capacity(reader.len());
    reader.read_to_end(&mut body).await;
    let document: Value = serde_json::from_slice(&body).map_err(DriverError::Deserialize)?;
    match document {
        Value::Object(mut members) => Ok(members.remove(member)),
        _ => Ok(None),
    }
}
