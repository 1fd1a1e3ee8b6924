//! Cross-context handoff messages and the in-memory bus that carries them.

use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use pv_url::Origin;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::mpsc;
use std::time::Duration;

pub const PREVIEW_REQUEST_TYPE: &str = "HTML_VIEWER_REQUEST";
pub const PREVIEW_PAYLOAD_TYPE: &str = "HTML_VIEWER_PAYLOAD";

/// Wildcard `target_origin`: deliver regardless of the recipient's origin.
pub const ANY_ORIGIN: &str = "*";

/// Typed handoff message, discriminated on the wire by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandoffMessage {
    /// Preview context asking its opener for the payload stored under `token`.
    #[serde(rename = "HTML_VIEWER_REQUEST")]
    Request { token: String },
    /// Opener answering with the raw serialized payload.
    #[serde(rename = "HTML_VIEWER_PAYLOAD")]
    Payload { token: String, payload: String },
}

impl HandoffMessage {
    pub fn request(token: impl Into<String>) -> Self {
        Self::Request {
            token: token.into(),
        }
    }

    pub fn payload(token: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Payload {
            token: token.into(),
            payload: payload.into(),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Self::Request { token } | Self::Payload { token, .. } => token,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Request { .. } => PREVIEW_REQUEST_TYPE,
            Self::Payload { .. } => PREVIEW_PAYLOAD_TYPE,
        }
    }

    pub fn encode(&self) -> PreviewResult<String> {
        serde_json::to_string(self).map_err(|error| {
            PreviewError::new(
                ErrorKind::Channel,
                "ipc.message_encode_failed",
                format!("failed to serialize {} message: {error}", self.type_name()),
            )
        })
    }

    /// Recognizes either message shape; anything else is `None`.
    pub fn decode(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

/// Identifier of a browsing context attached to a [`MessageBus`].
pub type ContextId = u64;

/// Inbound message as delivered to a context's listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Serialized origin of the sending context.
    pub origin: String,
    /// Sending context, usable as a reply target.
    pub source: Option<ContextId>,
    pub data: String,
}

impl MessageEvent {
    pub fn message(&self) -> Option<HandoffMessage> {
        HandoffMessage::decode(&self.data)
    }
}

#[derive(Debug)]
struct ContextEntry {
    origin: Origin,
    tx: mpsc::Sender<MessageEvent>,
}

#[derive(Debug, Default)]
struct BusState {
    next_id: ContextId,
    contexts: HashMap<ContextId, ContextEntry>,
}

/// In-memory stand-in for the browser's inter-window messaging.
///
/// Every context gets its own queue; delivery honours `target_origin` the way
/// `postMessage` does and stamps each event with the sender's origin.
#[derive(Debug, Clone, Default)]
pub struct MessageBus {
    state: Arc<Mutex<BusState>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a top-level context that has no opener.
    pub fn attach(&self, origin: Origin) -> ContextEndpoint {
        self.register(origin, None)
    }

    /// Attaches a context opened by `opener`, e.g. a new preview tab.
    pub fn open_from(&self, opener: &ContextEndpoint, origin: Origin) -> ContextEndpoint {
        self.register(origin, Some(opener.id))
    }

    pub fn context_count(&self) -> usize {
        lock_state(&self.state).contexts.len()
    }

    fn register(&self, origin: Origin, opener: Option<ContextId>) -> ContextEndpoint {
        let (tx, rx) = mpsc::channel();
        let mut state = lock_state(&self.state);
        state.next_id = state.next_id.saturating_add(1);
        let id = state.next_id;
        state.contexts.insert(
            id,
            ContextEntry {
                origin: origin.clone(),
                tx,
            },
        );

        ContextEndpoint {
            id,
            origin,
            opener,
            rx,
            state: Arc::clone(&self.state),
        }
    }
}

/// One browsing context's view of the bus. Dropping it unregisters the listener.
#[derive(Debug)]
pub struct ContextEndpoint {
    id: ContextId,
    origin: Origin,
    opener: Option<ContextId>,
    rx: mpsc::Receiver<MessageEvent>,
    state: Arc<Mutex<BusState>>,
}

impl ContextEndpoint {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn opener(&self) -> Option<ContextId> {
        self.opener
    }

    pub fn post_message(
        &self,
        target: ContextId,
        message: &HandoffMessage,
        target_origin: &str,
    ) -> PreviewResult<()> {
        self.post_raw(target, message.encode()?, target_origin)
    }

    /// Posts arbitrary data; recipients must validate what they receive.
    ///
    /// A recipient whose origin differs from `target_origin` silently gets nothing.
    pub fn post_raw(
        &self,
        target: ContextId,
        data: String,
        target_origin: &str,
    ) -> PreviewResult<()> {
        let state = lock_state(&self.state);
        let entry = state.contexts.get(&target).ok_or_else(|| {
            PreviewError::new(
                ErrorKind::Channel,
                "ipc.target_closed",
                format!("context {target} is no longer attached"),
            )
        })?;

        if target_origin != ANY_ORIGIN && !entry.origin.matches(target_origin) {
            tracing::debug!(
                target_context = target,
                target_origin,
                recipient_origin = %entry.origin,
                "dropping message for mismatched target origin"
            );
            return Ok(());
        }

        let event = MessageEvent {
            origin: self.origin.as_str().to_owned(),
            source: Some(self.id),
            data,
        };
        entry.tx.send(event).map_err(|error| {
            PreviewError::new(
                ErrorKind::Channel,
                "ipc.send_failed",
                format!("failed to deliver message to context {target}: {error}"),
            )
        })
    }

    pub fn try_recv(&self) -> Option<MessageEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MessageEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Drop for ContextEndpoint {
    fn drop(&mut self) {
        lock_state(&self.state).contexts.remove(&self.id);
    }
}

fn lock_state(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
