//! JSON-RPC envelope types exchanged with the server.
//!
//! Outbound requests serialize to `{"id", "async", "method", "params"}` with
//! the `async` flag and `params` omitted when defaulted. Inbound envelopes are
//! classified by the header parser and only fully decoded once the complete
//! body has been received.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// An outbound request envelope.
///
/// The correlation `id` may be supplied by the caller; when absent the client
/// generates one before the request is serialized. `params` distinguishes
/// absent, null, and present-but-empty; see [`Params`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Request {
    /// Correlation id tagging this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Fire-and-forget marker; serialized as `async` only when set.
    #[serde(rename = "async", skip_serializing_if = "std::ops::Not::not")]
    pub fire_and_forget: bool,
    /// Remote method name.
    pub method: String,
    /// Positional arguments.
    #[serde(skip_serializing_if = "Params::is_absent")]
    pub params: Params,
}

impl Request {
    /// Create a request for `method` with no id and absent params.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            fire_and_forget: false,
            method: method.into(),
            params: Params::Absent,
        }
    }

    /// Use a caller-supplied correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach positional parameters.
    #[must_use]
    pub fn with_params(mut self, values: Vec<Value>) -> Self {
        self.params = Params::Array(values);
        self
    }
}

/// Tri-state request parameters: absent, explicit null, or a value array.
///
/// `Absent` is skipped during serialization; the other variants are always
/// written. The client substitutes the present-but-empty array for `Absent`
/// by default so the wire field is never silently dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Params {
    /// No `params` field on the wire.
    #[default]
    Absent,
    /// `"params": null`.
    Null,
    /// `"params": [...]`.
    Array(Vec<Value>),
}

impl Params {
    /// Whether the field should be omitted entirely.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The present-but-empty array.
    #[must_use]
    pub fn empty() -> Self {
        Self::Array(Vec::new())
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent | Self::Null => serializer.serialize_none(),
            Self::Array(values) => values.serialize(serializer),
        }
    }
}

/// The `error` member of an inbound envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code reported by the server.
    pub code: i64,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A completed response to a [`Request`].
///
/// `result` preserves the absent/null distinction: `None` when the server
/// omitted the field, `Some(Value::Null)` when it sent an explicit null.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// Correlation id echoed by the server.
    pub id: String,
    /// Server-reported error, if any.
    pub error: Option<ErrorPayload>,
    /// The `result` member as opaque JSON for further typed decoding.
    pub result: Option<Value>,
}

impl Response {
    /// Split the response into its result or its error.
    ///
    /// # Errors
    ///
    /// Returns the server's [`ErrorPayload`] when the envelope carried one.
    pub fn into_result(self) -> Result<Option<Value>, ErrorPayload> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// A server-initiated notification delivered to a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Correlation id of the subscription this notification belongs to.
    pub id: String,
    /// Event method name.
    pub method: String,
    /// Server-reported error, if any.
    pub error: Option<ErrorPayload>,
    /// The `params` member as opaque JSON; `None` when omitted.
    pub params: Option<Value>,
}
