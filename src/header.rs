//! Message-header classification.
//!
//! Inbound messages are dispatched by correlation id before their bodies have
//! necessarily arrived, so the driver sniffs only the leading bytes. Two
//! grammars are tried in order: the response shape (`id`, `result`, `error`)
//! and the notification shape (`id`, `method`, `params`, `error`). Property
//! names match ASCII case-insensitively. `error` values are small and
//! deserialized eagerly; `result` and `params` values may be arbitrarily
//! large and still in flight, so encountering either property name completes
//! the scan without touching the value. A grammar completes only at a
//! payload property (`result`, `error`, or `params`); an object that closes
//! before reaching one is undispatchable, as is one with an unknown property
//! or a header that does not fit the peek window.
//!
//! Parsing is a pure function of the input bytes: no allocation beyond the
//! extracted strings, no panics on arbitrary input, and the same slice always
//! yields the same classification.

use base64::prelude::{BASE64_STANDARD, Engine as _};
use rand::RngCore as _;

use crate::proto::ErrorPayload;

/// Classified header of an inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Header {
    /// Reply to an outstanding request.
    Response(ResponseHeader),
    /// Server-initiated event for a subscription.
    Notification(NotificationHeader),
}

impl Header {
    /// Correlation id the message targets.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Response(header) => &header.id,
            Self::Notification(header) => &header.id,
        }
    }

    /// Error carried in the header, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Response(header) => header.error.as_ref(),
            Self::Notification(header) => header.error.as_ref(),
        }
    }
}

/// Header of a response-shaped message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Correlation id echoed by the server; never empty.
    pub id: String,
    /// Eagerly decoded `error` member.
    pub error: Option<ErrorPayload>,
}

/// Header of a notification-shaped message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationHeader {
    /// Subscription id the event belongs to; never empty.
    pub id: String,
    /// Event method; never empty.
    pub method: String,
    /// Eagerly decoded `error` member.
    pub error: Option<ErrorPayload>,
}

/// Classify the leading bytes of a message.
///
/// Returns `None` when neither grammar matches: the message cannot be
/// dispatched and the caller drops it.
#[must_use]
pub fn parse(bytes: &[u8]) -> Option<Header> {
    if let Ok(header) = parse_response(bytes) {
        return Some(Header::Response(header));
    }
    if let Ok(header) = parse_notification(bytes) {
        return Some(Header::Notification(header));
    }
    None
}

/// Generate a correlation id from `n_bytes` random bytes, base64-encoded.
#[must_use]
pub fn random_id(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_STANDARD.encode(bytes)
}

struct Abort(&'static str);

impl std::fmt::Debug for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

fn parse_response(bytes: &[u8]) -> Result<ResponseHeader, Abort> {
    let mut lexer = Lexer::new(bytes);
    lexer.expect(b'{', "expected an object")?;
    let mut id: Option<String> = None;
    let mut error = None;
    loop {
        let name = lexer.property_name()?;
        if name.eq_ignore_ascii_case("id") {
            id = Some(lexer.string()?);
        } else if name.eq_ignore_ascii_case("result") {
            // the value may still be in flight; noting the property is enough
            break;
        } else if name.eq_ignore_ascii_case("error") {
            error = lexer.error_value()?;
            break;
        } else {
            return Err(Abort("unknown property"));
        }
        if !lexer.object_continues()? {
            return Err(Abort("object ended before a payload property"));
        }
    }
    match id {
        Some(id) if !id.is_empty() => Ok(ResponseHeader { id, error }),
        _ => Err(Abort("missing or empty id")),
    }
}

fn parse_notification(bytes: &[u8]) -> Result<NotificationHeader, Abort> {
    let mut lexer = Lexer::new(bytes);
    lexer.expect(b'{', "expected an object")?;
    let mut id: Option<String> = None;
    let mut method: Option<String> = None;
    let mut error = None;
    loop {
        let name = lexer.property_name()?;
        if name.eq_ignore_ascii_case("id") {
            id = Some(lexer.string()?);
        } else if name.eq_ignore_ascii_case("method") {
            method = Some(lexer.string()?);
        } else if name.eq_ignore_ascii_case("params") {
            break;
        } else if name.eq_ignore_ascii_case("error") {
            error = lexer.error_value()?;
            break;
        } else {
            return Err(Abort("unknown property"));
        }
        if !lexer.object_continues()? {
            return Err(Abort("object ended before a payload property"));
        }
    }
    match (id, method) {
        (Some(id), Some(method)) if !id.is_empty() && !method.is_empty() => {
            Ok(NotificationHeader { id, method, error })
        }
        _ => Err(Abort("missing id or method")),
    }
}

/// Byte-level scanner over a (possibly truncated) JSON prefix.
struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8, reason: &'static str) -> Result<(), Abort> {
        self.skip_ws();
        if self.bump() == Some(byte) {
            Ok(())
        } else {
            Err(Abort(reason))
        }
    }

    /// Read `"name":` and return the unescaped name.
    fn property_name(&mut self) -> Result<String, Abort> {
        let name = self.string()?;
        self.expect(b':', "expected a colon")?;
        Ok(name)
    }

    /// After a property value: `,` continues the object, `}` ends it.
    fn object_continues(&mut self) -> Result<bool, Abort> {
        self.skip_ws();
        match self.bump() {
            Some(b',') => Ok(true),
            Some(b'}') => Ok(false),
            _ => Err(Abort("expected ',' or '}'")),
        }
    }

    /// Read and unescape a JSON string.
    fn string(&mut self) -> Result<String, Abort> {
        self.skip_ws();
        if self.bump() != Some(b'"') {
            return Err(Abort("expected a string"));
        }
        let mut out: Vec<u8> = Vec::new();
        loop {
            let byte = self.bump().ok_or(Abort("unterminated string"))?;
            match byte {
                b'"' => return String::from_utf8(out).map_err(|_| Abort("invalid utf-8")),
                b'\\' => {
                    let escape = self.bump().ok_or(Abort("unterminated escape"))?;
                    match escape {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => {
                            let code = self.hex4()?;
                            let ch =
                                char::from_u32(code).ok_or(Abort("unpaired surrogate escape"))?;
                            let mut encoded = [0u8; 4];
                            out.extend_from_slice(ch.encode_utf8(&mut encoded).as_bytes());
                        }
                        _ => return Err(Abort("unknown escape")),
                    }
                }
                _ if byte < 0x20 => return Err(Abort("control byte in string")),
                _ => out.push(byte),
            }
        }
    }

    fn hex4(&mut self) -> Result<u32, Abort> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let byte = self.bump().ok_or(Abort("truncated unicode escape"))?;
            let digit = char::from(byte)
                .to_digit(16)
                .ok_or(Abort("invalid unicode escape"))?;
            value = (value << 4) | digit;
        }
        Ok(value)
    }

    /// Consume an `error` value and decode it; `null` means no error.
    fn error_value(&mut self) -> Result<Option<ErrorPayload>, Abort> {
        let span = self.value_span()?;
        serde_json::from_slice(span).map_err(|_| Abort("malformed error value"))
    }

    /// Consume one JSON value and return its byte span.
    fn value_span(&mut self) -> Result<&'a [u8], Abort> {
        self.skip_ws();
        let start = self.pos;
        match self.peek().ok_or(Abort("truncated value"))? {
            b'"' => self.raw_string()?,
            b'{' | b'[' => self.skip_container()?,
            _ => self.skip_scalar(),
        }
        let span = &self.input[start..self.pos];
        if span.is_empty() {
            Err(Abort("empty value"))
        } else {
            Ok(span)
        }
    }

    /// Skip a string without unescaping it.
    fn raw_string(&mut self) -> Result<(), Abort> {
        // caller has seen the opening quote
        self.pos += 1;
        loop {
            match self.bump().ok_or(Abort("unterminated string"))? {
                b'"' => return Ok(()),
                b'\\' => {
                    self.bump().ok_or(Abort("unterminated escape"))?;
                }
                _ => {}
            }
        }
    }

    /// Skip a balanced object or array.
    fn skip_container(&mut self) -> Result<(), Abort> {
        let mut depth = 0usize;
        loop {
            match self.peek().ok_or(Abort("truncated value"))? {
                b'"' => self.raw_string()?,
                b'{' | b'[' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' | b']' => {
                    depth = depth.checked_sub(1).ok_or(Abort("unbalanced value"))?;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Skip a number, boolean, or null.
    fn skip_scalar(&mut self) {
        while let Some(byte) = self.peek() {
            if matches!(byte, b',' | b'}' | b']') || byte.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests;
