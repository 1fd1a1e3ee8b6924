//! Preview payload model, its storage codec, and preview tokens.

use core::fmt;
use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use serde::Deserialize;
use serde::Serialize;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use url::Url;

/// Session-storage key prefix for serialized payloads.
pub const PREVIEW_STORAGE_PREFIX: &str = "html_viewer_preview_";

/// Path the preview context is opened at.
pub const PREVIEW_PATH: &str = "/preview";

const TOKEN_QUERY_PARAM: &str = "token";

// Root-relative locations are resolved against this before reading the query.
const LOCATION_PARSE_BASE: &str = "http://preview.invalid/";

/// HTML text, optional base URL and creation time, handed over as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewPayload {
    html: String,
    base_url: Option<String>,
    created_at: i64,
}

impl PreviewPayload {
    /// `created_at` is milliseconds since the Unix epoch.
    pub fn new(html: impl Into<String>, base_url: Option<String>, created_at: i64) -> Self {
        Self {
            html: html.into(),
            base_url,
            created_at,
        }
    }

    /// Builds a payload stamped with the current wall-clock time.
    pub fn now(html: impl Into<String>, base_url: Option<String>) -> Self {
        Self::new(html, base_url, unix_millis_now())
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Serializes to the JSON form kept in session storage and sent over the handoff.
    pub fn encode(&self) -> PreviewResult<String> {
        serde_json::to_string(self).map_err(|error| {
            PreviewError::new(
                ErrorKind::MalformedPayload,
                "payload.encode_failed",
                format!("failed to serialize preview payload: {error}"),
            )
        })
    }

    /// Parses a stored or received payload.
    ///
    /// Anything structurally wrong yields `None` so callers treat the entry as
    /// absent. The base URL is not re-validated.
    pub fn decode(raw: Option<&str>) -> Option<Self> {
        let raw = raw.filter(|value| !value.is_empty())?;

        let parsed = match parse_raw_payload(raw) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::debug!(%error, bytes = raw.len(), "discarding malformed preview payload");
                return None;
            }
        };

        Some(Self {
            html: parsed.html,
            base_url: parsed.base_url,
            created_at: number_to_millis(&parsed.created_at),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    html: String,
    // Absent and `null` both land on `None`; any other type fails the parse.
    #[serde(default)]
    base_url: Option<String>,
    created_at: serde_json::Number,
}

// Only JSON objects qualify; serde would otherwise accept a positional array.
fn parse_raw_payload(raw: &str) -> Result<RawPayload, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(<serde_json::Error as serde::de::Error>::custom(
            "preview payload must be a JSON object",
        ));
    }
    serde_json::from_value(value)
}

fn number_to_millis(value: &serde_json::Number) -> i64 {
    if let Some(millis) = value.as_i64() {
        return millis;
    }

    // Fractional or out-of-range values saturate.
    value.as_f64().map(|millis| millis as i64).unwrap_or_default()
}

fn unix_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Opaque identifier correlating one "open preview" action with one preview context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewToken(String);

impl PreviewToken {
    /// Fresh random token; never reused across payloads.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps a token received from a message or query string. Empty strings are rejected.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            return None;
        }
        Some(Self(value))
    }

    /// Reads the `token` query parameter from an absolute or root-relative location.
    pub fn from_location(location: &str) -> Option<Self> {
        let base = Url::parse(LOCATION_PARSE_BASE).ok()?;
        let parsed = base.join(location.trim()).ok()?;
        let value = parsed
            .query_pairs()
            .find(|(name, _)| name == TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())?;
        Self::new(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session-storage key for this token's payload.
    pub fn storage_key(&self) -> String {
        format!("{PREVIEW_STORAGE_PREFIX}{}", self.0)
    }

    /// Navigation target for the preview context, e.g. `/preview?token=...`.
    pub fn preview_path(&self) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(self.0.as_bytes()).collect();
        format!("{PREVIEW_PATH}?{TOKEN_QUERY_PARAM}={encoded}")
    }
}

impl fmt::Display for PreviewToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
