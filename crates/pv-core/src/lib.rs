//! Shared primitives used across Pasteview crates.

use core::fmt;

/// Result alias used across the workspace.
pub type PreviewResult<T> = Result<T, PreviewError>;

/// Failure categories recovered at the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingToken,
    InvalidBaseUrl,
    MalformedPayload,
    PopupBlocked,
    HandoffTimeout,
    EmptyDocument,
    StorageQuota,
    Channel,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidBaseUrl => "invalid_base_url",
            Self::MalformedPayload => "malformed_payload",
            Self::PopupBlocked => "popup_blocked",
            Self::HandoffTimeout => "handoff_timeout",
            Self::EmptyDocument => "empty_document",
            Self::StorageQuota => "storage_quota",
            Self::Channel => "channel",
            Self::Config => "config",
            Self::Io => "io",
        }
    }

    /// Short text shown in the editor or preview status line.
    pub fn status_message(self) -> &'static str {
        match self {
            Self::MissingToken => "Missing preview token. Open this page from the main editor.",
            Self::InvalidBaseUrl => "Invalid base URL.",
            Self::MalformedPayload => "Preview payload is unreadable.",
            Self::PopupBlocked => "Popup blocked. Allow popups and retry.",
            Self::HandoffTimeout => {
                "Preview payload not found. Return to the editor and click Preview again."
            }
            Self::EmptyDocument => "Paste HTML first.",
            Self::StorageQuota => "Session storage is full. Close old previews and retry.",
            Self::Channel => "Preview window is unreachable.",
            Self::Config => "Preview settings are invalid.",
            Self::Io => "Could not read or write the document.",
        }
    }
}

/// Workspace error carrying a stable code plus a diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl PreviewError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn missing_token() -> Self {
        Self::new(
            ErrorKind::MissingToken,
            "preview.token_missing",
            "preview location carries no `token` query parameter",
        )
    }

    pub fn handoff_timeout() -> Self {
        Self::new(
            ErrorKind::HandoffTimeout,
            "preview.payload_not_found",
            "payload not found",
        )
    }

    pub fn status_message(&self) -> &'static str {
        self.kind.status_message()
    }
}

impl fmt::Display for PreviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PreviewError {}
