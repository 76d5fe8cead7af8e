//! Client configuration.
//!
//! Options are set through consuming `with_*` setters, validated once by
//! [`Client::new`](crate::Client::new), and frozen for the lifetime of the
//! client. Validation reports every invalid field at once rather than
//! stopping at the first.

use std::fmt;
use std::time::Duration;

use crate::pool::Pools;

const DEFAULT_INBOUND_MESSAGES_MAX: usize = 256;
const DEFAULT_OUTBOUND_MESSAGES_MAX: usize = 256;
const DEFAULT_FRAME_NOTICES_MAX: usize = 64;
const DEFAULT_HEADER_BYTES_MAX: usize = 512;
const DEFAULT_ID_BYTES: usize = 6;
const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_BLOCK_SIZE: usize = 4096;
const DEFAULT_SUBSCRIPTION_BUFFER: usize = 16;

/// Tunables for a [`Client`](crate::Client).
#[derive(Clone, Debug)]
pub struct ClientOptions {
    inbound_messages_max: usize,
    outbound_messages_max: usize,
    frame_notices_max: usize,
    header_bytes_max: usize,
    id_bytes: usize,
    pending_ttl: Duration,
    sweep_interval: Duration,
    block_size: usize,
    subscription_buffer: usize,
    send_empty_params: bool,
    pools: Pools,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            inbound_messages_max: DEFAULT_INBOUND_MESSAGES_MAX,
            outbound_messages_max: DEFAULT_OUTBOUND_MESSAGES_MAX,
            frame_notices_max: DEFAULT_FRAME_NOTICES_MAX,
            header_bytes_max: DEFAULT_HEADER_BYTES_MAX,
            id_bytes: DEFAULT_ID_BYTES,
            pending_ttl: DEFAULT_PENDING_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            block_size: DEFAULT_BLOCK_SIZE,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            send_empty_params: true,
            pools: Pools::default(),
        }
    }
}

impl ClientOptions {
    /// Capacity of the inbound message channel between the receive and
    /// dispatch pipelines. A full channel stalls socket reads.
    #[must_use]
    pub fn with_inbound_messages_max(mut self, value: usize) -> Self {
        self.inbound_messages_max = value;
        self
    }

    /// Capacity of the outbound payload channel feeding the send pipeline.
    #[must_use]
    pub fn with_outbound_messages_max(mut self, value: usize) -> Self {
        self.outbound_messages_max = value;
        self
    }

    /// Per-message bound on frames appended but not yet observed by the
    /// reader.
    #[must_use]
    pub fn with_frame_notices_max(mut self, value: usize) -> Self {
        self.frame_notices_max = value;
        self
    }

    /// Peek window for header classification. Messages whose header does not
    /// fit are undispatchable and dropped.
    #[must_use]
    pub fn with_header_bytes_max(mut self, value: usize) -> Self {
        self.header_bytes_max = value;
        self
    }

    /// Number of random bytes behind a generated correlation id.
    #[must_use]
    pub fn with_id_bytes(mut self, value: usize) -> Self {
        self.id_bytes = value;
        self
    }

    /// Sliding time-to-live for pending entries that have not been touched.
    #[must_use]
    pub fn with_pending_ttl(mut self, value: Duration) -> Self {
        self.pending_ttl = value;
        self
    }

    /// Minimum interval between opportunistic registry sweeps.
    #[must_use]
    pub fn with_sweep_interval(mut self, value: Duration) -> Self {
        self.sweep_interval = value;
        self
    }

    /// Outbound frame size; payloads are split into blocks of this many
    /// bytes.
    #[must_use]
    pub fn with_block_size(mut self, value: usize) -> Self {
        self.block_size = value;
        self
    }

    /// Capacity of each subscription's notification buffer.
    #[must_use]
    pub fn with_subscription_buffer(mut self, value: usize) -> Self {
        self.subscription_buffer = value;
        self
    }

    /// When set (the default), requests with absent params go out with an
    /// explicit empty array instead of no `params` field at all.
    #[must_use]
    pub fn with_send_empty_params(mut self, value: bool) -> Self {
        self.send_empty_params = value;
        self
    }

    /// Share buffer and channel pools with other clients, or inject fresh
    /// ones for isolation.
    #[must_use]
    pub fn with_pools(mut self, pools: Pools) -> Self {
        self.pools = pools;
        self
    }

    #[must_use]
    pub fn inbound_messages_max(&self) -> usize {
        self.inbound_messages_max
    }

    #[must_use]
    pub fn outbound_messages_max(&self) -> usize {
        self.outbound_messages_max
    }

    #[must_use]
    pub fn frame_notices_max(&self) -> usize {
        self.frame_notices_max
    }

    #[must_use]
    pub fn header_bytes_max(&self) -> usize {
        self.header_bytes_max
    }

    #[must_use]
    pub fn id_bytes(&self) -> usize {
        self.id_bytes
    }

    #[must_use]
    pub fn pending_ttl(&self) -> Duration {
        self.pending_ttl
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn subscription_buffer(&self) -> usize {
        self.subscription_buffer
    }

    #[must_use]
    pub fn send_empty_params(&self) -> bool {
        self.send_empty_params
    }

    #[must_use]
    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Check every field and collect all violations.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing each invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut invalid = Vec::new();
        let mut require = |ok: bool, field: &'static str, reason: &'static str| {
            if !ok {
                invalid.push(InvalidField { field, reason });
            }
        };

        require(
            self.inbound_messages_max > 0,
            "inbound_messages_max",
            "must be at least 1",
        );
        require(
            self.outbound_messages_max > 0,
            "outbound_messages_max",
            "must be at least 1",
        );
        require(
            self.frame_notices_max > 0,
            "frame_notices_max",
            "must be at least 1",
        );
        require(
            self.header_bytes_max >= 16,
            "header_bytes_max",
            "must be at least 16 bytes",
        );
        require(
            (1..=64).contains(&self.id_bytes),
            "id_bytes",
            "must be between 1 and 64",
        );
        require(
            !self.pending_ttl.is_zero(),
            "pending_ttl",
            "must be non-zero",
        );
        require(
            !self.sweep_interval.is_zero(),
            "sweep_interval",
            "must be non-zero",
        );
        require(self.block_size > 0, "block_size", "must be at least 1");
        require(
            self.subscription_buffer > 0,
            "subscription_buffer",
            "must be at least 1",
        );

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { invalid })
        }
    }
}

/// One rejected option field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidField {
    /// Field name as it appears on [`ClientOptions`].
    pub field: &'static str,
    /// Constraint the value violated.
    pub reason: &'static str,
}

/// Aggregate validation failure listing every invalid option.
#[derive(Debug)]
pub struct ConfigError {
    invalid: Vec<InvalidField>,
}

impl ConfigError {
    /// The rejected fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[InvalidField] {
        &self.invalid
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid client options:")?;
        for field in &self.invalid {
            write!(f, " {} {};", field.field, field.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientOptions;

    #[test]
    fn defaults_are_valid() {
        ClientOptions::default()
            .validate()
            .expect("default options pass validation");
    }

    #[test]
    fn validation_collects_every_violation() {
        let error = ClientOptions::default()
            .with_inbound_messages_max(0)
            .with_id_bytes(0)
            .with_pending_ttl(Duration::ZERO)
            .validate()
            .expect_err("invalid options are rejected");

        let fields: Vec<&str> = error.fields().iter().map(|f| f.field).collect();
        assert_eq!(fields, ["inbound_messages_max", "id_bytes", "pending_ttl"]);
    }

    #[test]
    fn setters_replace_defaults() {
        let options = ClientOptions::default()
            .with_block_size(16)
            .with_header_bytes_max(64)
            .with_send_empty_params(false);
        assert_eq!(options.block_size(), 16);
        assert_eq!(options.header_bytes_max(), 64);
        assert!(!options.send_empty_params());
    }
}
