//! Base-URL validation and origin identity.

use core::fmt;
use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use url::Url;

const DEFAULT_SCHEME_PREFIX: &str = "https://";

/// Schemes a base URL may resolve against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Canonical absolute http/https URL used as the document base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl {
    parsed: Url,
    scheme: Scheme,
}

impl BaseUrl {
    /// Parses user input, assuming `https://` when no scheme is written.
    ///
    /// Blank input is an error here; [`normalize_base_url`] maps it to "no base".
    pub fn parse(input: &str) -> PreviewResult<Self> {
        let value = input.trim();
        if value.is_empty() {
            return Err(PreviewError::new(
                ErrorKind::InvalidBaseUrl,
                "url.base_empty",
                "base URL is blank",
            ));
        }

        let candidate = if has_scheme_prefix(value) {
            value.to_owned()
        } else {
            format!("{DEFAULT_SCHEME_PREFIX}{value}")
        };

        let mut parsed = Url::parse(&candidate).map_err(|error| {
            PreviewError::new(
                ErrorKind::InvalidBaseUrl,
                "url.base_invalid",
                format!("failed to parse base URL `{value}`: {error}"),
            )
        })?;

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(PreviewError::new(
                    ErrorKind::InvalidBaseUrl,
                    "url.scheme_unsupported",
                    format!("unsupported base URL scheme `{other}`"),
                ));
            }
        };

        if parsed.path().is_empty() {
            parsed.set_path("/");
        }

        Ok(Self { parsed, scheme })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn origin(&self) -> Origin {
        Origin::from_url(&self.parsed)
    }

    pub fn into_string(self) -> String {
        self.parsed.into()
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonicalizes a base-URL field.
///
/// Returns `None` both for blank input ("no base URL") and for anything that is
/// not an absolute http/https URL. Callers that must tell the two apart check
/// whether the trimmed input was empty.
pub fn normalize_base_url(input: &str) -> Option<String> {
    if input.trim().is_empty() {
        return None;
    }

    BaseUrl::parse(input).ok().map(BaseUrl::into_string)
}

/// `scheme:` where scheme is a letter followed by letters, digits, `+`, `-` or `.`.
fn has_scheme_prefix(value: &str) -> bool {
    let bytes = value.as_bytes();
    let Some(first) = bytes.first() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }

    for &byte in &bytes[1..] {
        match byte {
            b':' => return true,
            b'+' | b'-' | b'.' => {}
            _ if byte.is_ascii_alphanumeric() => {}
            _ => return false,
        }
    }

    false
}

/// Serialized origin (`scheme://host[:port]`) of a browsing context.
///
/// Trust checks compare serialized origins byte for byte, the same way a
/// message event's `origin` string is compared against `location.origin`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn parse(input: &str) -> PreviewResult<Self> {
        let parsed = Url::parse(input.trim()).map_err(|error| {
            PreviewError::new(
                ErrorKind::Channel,
                "url.origin_invalid",
                format!("failed to parse origin `{input}`: {error}"),
            )
        })?;

        let origin = Self::from_url(&parsed);
        if origin.is_opaque() {
            return Err(PreviewError::new(
                ErrorKind::Channel,
                "url.origin_opaque",
                format!("`{input}` has an opaque origin"),
            ));
        }

        Ok(origin)
    }

    pub fn from_url(url: &Url) -> Self {
        Self(url.origin().ascii_serialization())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_opaque(&self) -> bool {
        self.0 == "null"
    }

    /// True when `other` is exactly this origin's serialization.
    pub fn matches(&self, other: &str) -> bool {
        !self.is_opaque() && self.0 == other
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
