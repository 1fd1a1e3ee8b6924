use crate::HandoffConfig;
use pv_core::PreviewError;
use pv_ipc::HandoffMessage;
use pv_ipc::MessageEvent;
use pv_payload::PreviewPayload;
use pv_payload::PreviewToken;
use pv_storage::PreviewTokenStore;
use pv_storage::SessionStore;
use pv_url::Origin;
use std::time::Instant;

/// What the preview context shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
    Loading,
    Ready(PreviewPayload),
    Error(PreviewError),
}

/// A request the caller must post to the opener context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub message: HandoffMessage,
    /// Always the preview's own origin.
    pub target_origin: String,
}

/// Outcome of feeding one input to the loader.
///
/// `Ready` and `Failed` are reported by the single call that caused the
/// terminal transition; afterwards every call returns `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Idle,
    Send(OutboundRequest),
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Awaiting {
    deadline: Instant,
    next_request_at: Option<Instant>,
    requests_sent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    AwaitingOpener(Awaiting),
    Done,
}

/// Preview-side state machine: LocalLookup, then AwaitingOpener, then Ready or Error.
///
/// The loader performs no I/O of its own. Time comes in as `now`, messages come
/// in as events, and requests go out as [`Step::Send`].
#[derive(Debug, Clone)]
pub struct PreviewLoader {
    token: Option<PreviewToken>,
    own_origin: Origin,
    config: HandoffConfig,
    has_opener: bool,
    phase: Phase,
    state: PreviewState,
}

impl PreviewLoader {
    /// `location` is the preview's own URL, absolute or root-relative.
    pub fn new(location: &str, own_origin: Origin, config: HandoffConfig) -> Self {
        Self {
            token: PreviewToken::from_location(location),
            own_origin,
            config,
            has_opener: false,
            phase: Phase::Start,
            state: PreviewState::Loading,
        }
    }

    pub fn token(&self) -> Option<&PreviewToken> {
        self.token.as_ref()
    }

    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    /// True while an inbound-message listener is needed.
    pub fn is_listening(&self) -> bool {
        matches!(self.phase, Phase::AwaitingOpener(_))
    }

    /// Earliest instant at which [`PreviewLoader::poll`] has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match self.phase {
            Phase::AwaitingOpener(awaiting) => Some(
                awaiting
                    .next_request_at
                    .map_or(awaiting.deadline, |at| at.min(awaiting.deadline)),
            ),
            Phase::Start | Phase::Done => None,
        }
    }

    /// Runs the token check and the local lookup; falls back to asking the opener.
    pub fn start<S: SessionStore>(
        &mut self,
        store: &PreviewTokenStore<S>,
        has_opener: bool,
        now: Instant,
    ) -> Step {
        if self.phase != Phase::Start {
            return Step::Idle;
        }

        let Some(token) = self.token.clone() else {
            tracing::warn!("preview opened without a token");
            return self.fail(PreviewError::missing_token());
        };

        if let Some(payload) = store.load(&token) {
            tracing::debug!(token = %token, "payload found in local session storage");
            return self.resolve(payload);
        }

        self.has_opener = has_opener;
        self.phase = Phase::AwaitingOpener(Awaiting {
            deadline: now + self.config.timeout,
            next_request_at: None,
            requests_sent: 0,
        });

        if !has_opener {
            tracing::debug!(token = %token, "no opener; waiting out the handoff timeout");
            return Step::Idle;
        }

        self.next_request(now)
    }

    /// Feeds one inbound message. Anything untrusted or irrelevant is discarded.
    pub fn handle_message<S: SessionStore>(
        &mut self,
        event: &MessageEvent,
        store: &mut PreviewTokenStore<S>,
    ) -> Step {
        if !self.is_listening() {
            return Step::Idle;
        }

        if !self.own_origin.matches(&event.origin) {
            tracing::debug!(origin = %event.origin, "discarding message from foreign origin");
            return Step::Idle;
        }

        let Some(HandoffMessage::Payload { token, payload }) = event.message() else {
            tracing::debug!("discarding message that is not a payload response");
            return Step::Idle;
        };

        let Some(expected) = self.token.clone() else {
            return Step::Idle;
        };
        if token != expected.as_str() {
            tracing::debug!(%token, expected = %expected, "discarding response for another token");
            return Step::Idle;
        }

        let Some(parsed) = PreviewPayload::decode(Some(&payload)) else {
            tracing::debug!(%token, "discarding response with malformed payload");
            return Step::Idle;
        };

        // A reload of this tab then resolves through the local lookup.
        if let Err(error) = store.put(&expected, &parsed) {
            tracing::warn!(%error, %token, "could not persist handed-off payload");
        }

        tracing::info!(%token, "payload received from opener");
        self.resolve(parsed)
    }

    /// Advances time: fires the timeout or re-sends the request when due.
    pub fn poll(&mut self, now: Instant) -> Step {
        let Phase::AwaitingOpener(awaiting) = self.phase else {
            return Step::Idle;
        };

        if now >= awaiting.deadline {
            tracing::warn!(
                token = self.token.as_ref().map(PreviewToken::as_str),
                requests_sent = awaiting.requests_sent,
                "preview handoff timed out"
            );
            return self.fail(PreviewError::handoff_timeout());
        }

        match awaiting.next_request_at {
            Some(at) if now >= at && self.has_opener => self.next_request(now),
            _ => Step::Idle,
        }
    }

    fn next_request(&mut self, now: Instant) -> Step {
        let Phase::AwaitingOpener(mut awaiting) = self.phase else {
            return Step::Idle;
        };
        let Some(token) = self.token.as_ref() else {
            return Step::Idle;
        };

        awaiting.requests_sent = awaiting.requests_sent.saturating_add(1);
        awaiting.next_request_at = if awaiting.requests_sent < self.config.request_attempts {
            Some(now + self.config.request_interval())
        } else {
            None
        };
        self.phase = Phase::AwaitingOpener(awaiting);

        tracing::debug!(
            token = %token,
            attempt = awaiting.requests_sent,
            "requesting payload from opener"
        );
        Step::Send(OutboundRequest {
            message: HandoffMessage::request(token.as_str()),
            target_origin: self.own_origin.as_str().to_owned(),
        })
    }

    fn resolve(&mut self, payload: PreviewPayload) -> Step {
        self.phase = Phase::Done;
        self.state = PreviewState::Ready(payload);
        Step::Ready
    }

    fn fail(&mut self, error: PreviewError) -> Step {
        self.phase = Phase::Done;
        self.state = PreviewState::Error(error);
        Step::Failed
    }
}
