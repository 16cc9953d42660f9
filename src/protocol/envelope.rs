//! Envelope model and decoding.
//!
//! The wrapper emits exactly one JSON envelope per command:
//!
//! ```text
//! { "result": {
//!     "success": "<json-string or raw value>",
//!     "error":   "<json-string>",
//!     "warning": "<json-string>",
//!     "verbose": "<json-string>",
//!     "debug":   "<json-string>",
//!     "info":    "<json-string>",
//!     "format":  "json" | "string" | null
//! } }
//! ```
//!
//! `format` is recorded inside the envelope so the decoder never has to
//! track per-call state: error, warning, verbose, debug and info are always
//! JSON-encoded string arrays, while `success` is decoded according to the
//! recorded format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ShellError};

/// How the Success stream of a call is serialized inside the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `ConvertTo-Json` of the captured array; items decode to structured
    /// [`Value`]s.
    #[default]
    Json,
    /// Each captured item rendered through `Out-String`; items decode to
    /// display strings.
    String,
    /// No per-field serialization; the raw array rides in the outer envelope
    /// conversion and is passed through as-is.
    None,
}

impl OutputFormat {
    /// The PowerShell literal recorded in the envelope's `format` field.
    pub(crate) fn wrapper_literal(self) -> &'static str {
        match self {
            OutputFormat::Json => "'json'",
            OutputFormat::String => "'string'",
            OutputFormat::None => "$null",
        }
    }
}

/// The post-decoded form of an envelope: six ordered stream captures.
///
/// `success` obeys the call's [`OutputFormat`]; the other five are always
/// arrays of display strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamsResult {
    /// Success (stream 1), decoded per the envelope's recorded format.
    pub success: Vec<Value>,
    /// Error (stream 2).
    pub error: Vec<String>,
    /// Warning (stream 3).
    pub warning: Vec<String>,
    /// Verbose (stream 4), collected via its scratch file; newline-delimited.
    pub verbose: Vec<String>,
    /// Debug (stream 5), collected via its scratch file; newline-delimited.
    pub debug: Vec<String>,
    /// Information (stream 6).
    pub info: Vec<String>,
}

impl StreamsResult {
    /// True when all six captures are empty.
    pub fn is_empty(&self) -> bool {
        self.success.is_empty()
            && self.error.is_empty()
            && self.warning.is_empty()
            && self.verbose.is_empty()
            && self.debug.is_empty()
            && self.info.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct EnvelopeOuter {
    result: RawEnvelope,
}

/// The envelope exactly as the wrapper serializes it.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    success: Value,
    error: String,
    warning: String,
    verbose: String,
    debug: String,
    info: String,
    format: Option<String>,
}

/// Decode one framed payload into a [`StreamsResult`].
///
/// Any shape violation — non-UTF-8 bytes, malformed JSON, a missing
/// `result` key, a stream field that is not a JSON string array — surfaces
/// as [`ShellError::Decode`].
pub fn decode_envelope(payload: &[u8]) -> Result<StreamsResult> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ShellError::Decode(format!("payload is not UTF-8: {e}")))?;
    let outer: EnvelopeOuter = serde_json::from_str(text)
        .map_err(|e| ShellError::Decode(format!("envelope JSON: {e}")))?;
    let env = outer.result;

    Ok(StreamsResult {
        success: decode_success(&env.success, env.format.as_deref())?,
        error: decode_string_array("error", &env.error)?,
        warning: decode_string_array("warning", &env.warning)?,
        verbose: decode_string_array("verbose", &env.verbose)?,
        debug: decode_string_array("debug", &env.debug)?,
        info: decode_string_array("info", &env.info)?,
    })
}

fn decode_string_array(field: &str, raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| ShellError::Decode(format!("{field} stream is not a string array: {e}")))
}

fn decode_success(raw: &Value, format: Option<&str>) -> Result<Vec<Value>> {
    match format {
        Some("json") | Some("string") => {
            let serialized = raw.as_str().ok_or_else(|| {
                ShellError::Decode("success is not a string despite a recorded format".into())
            })?;
            let parsed: Value = serde_json::from_str(serialized)
                .map_err(|e| ShellError::Decode(format!("success stream: {e}")))?;
            Ok(into_array(parsed))
        }
        // Raw passthrough; the interpreter may have collapsed a one-element
        // array to a scalar, so re-wrap anything that is not an array.
        None => Ok(into_array(raw.clone())),
        Some(other) => Err(ShellError::Decode(format!(
            "unknown success format `{other}`"
        ))),
    }
}

fn into_array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
