use pv_ipc::ContextId;
use pv_ipc::HandoffMessage;
use pv_ipc::MessageEvent;
use pv_payload::PreviewToken;
use pv_storage::PreviewTokenStore;
use pv_storage::SessionStore;
use pv_url::Origin;

/// Reply the opener must post back to the requesting context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub target: ContextId,
    pub target_origin: String,
    pub message: HandoffMessage,
}

/// Opener-side handler for preview requests.
///
/// Answers only same-origin requests for tokens this context has stored, with
/// the raw serialized payload, addressed to the requester and scoped to its origin.
pub fn respond<S: SessionStore>(
    event: &MessageEvent,
    own_origin: &Origin,
    store: &PreviewTokenStore<S>,
) -> Option<OutboundReply> {
    if !own_origin.matches(&event.origin) {
        tracing::debug!(origin = %event.origin, "ignoring request from foreign origin");
        return None;
    }

    let Some(HandoffMessage::Request { token }) = event.message() else {
        return None;
    };
    let token = PreviewToken::new(token)?;

    let Some(raw) = store.get(&token) else {
        tracing::debug!(token = %token, "request for unknown token");
        return None;
    };
    let target = event.source?;

    tracing::debug!(
        token = %token,
        requester = target,
        bytes = raw.len(),
        "answering preview request"
    );
    Some(OutboundReply {
        target,
        target_origin: event.origin.clone(),
        message: HandoffMessage::payload(token.as_str(), raw),
    })
}
