use crate::HandoffConfig;
use crate::editor::ContextOpener;
use crate::editor::EditorSession;
use crate::loader::PreviewLoader;
use crate::loader::PreviewState;
use crate::loader::Step;
use pv_ipc::ContextEndpoint;
use pv_ipc::MessageBus;
use pv_storage::PreviewTokenStore;
use pv_storage::SessionStore;
use pv_url::Origin;
use std::time::Duration;
use std::time::Instant;

/// Opens preview contexts as new endpoints on a [`MessageBus`].
#[derive(Debug)]
pub struct BusOpener<'a> {
    pub bus: &'a MessageBus,
    pub opener: &'a ContextEndpoint,
    /// Origin the new context is served from.
    pub origin: Origin,
    /// `false` behaves like a popup blocker.
    pub popups_allowed: bool,
}

impl<'a> BusOpener<'a> {
    pub fn new(bus: &'a MessageBus, opener: &'a ContextEndpoint) -> Self {
        Self {
            bus,
            opener,
            origin: opener.origin().clone(),
            popups_allowed: true,
        }
    }
}

/// A freshly opened preview context and the URL it was opened at.
#[derive(Debug)]
pub struct OpenedContext {
    pub endpoint: ContextEndpoint,
    pub location: String,
}

impl ContextOpener for BusOpener<'_> {
    type Handle = OpenedContext;

    fn open(&mut self, path: &str) -> Option<OpenedContext> {
        if !self.popups_allowed {
            return None;
        }

        let endpoint = self.bus.open_from(self.opener, self.origin.clone());
        tracing::debug!(
            context = endpoint.id(),
            opener = self.opener.id(),
            path,
            "opened preview context on bus"
        );
        Some(OpenedContext {
            endpoint,
            location: format!("{}{path}", self.origin),
        })
    }
}

/// Drives a preview loader to completion on its own endpoint.
///
/// The endpoint is consumed, so the context stops listening as soon as the
/// loader reaches `Ready` or `Error`.
pub fn run_preview_context<S: SessionStore>(
    endpoint: ContextEndpoint,
    location: &str,
    store: &mut PreviewTokenStore<S>,
    config: HandoffConfig,
) -> PreviewState {
    let mut loader = PreviewLoader::new(location, endpoint.origin().clone(), config);
    let mut step = loader.start(store, endpoint.opener().is_some(), Instant::now());

    loop {
        if let Step::Send(request) = &step
            && let Some(opener) = endpoint.opener()
            && let Err(error) =
                endpoint.post_message(opener, &request.message, &request.target_origin)
        {
            tracing::warn!(%error, "could not reach opener; waiting for timeout");
        }

        let Some(wakeup) = loader.next_wakeup() else {
            break;
        };

        let wait = wakeup.saturating_duration_since(Instant::now());
        step = match endpoint.recv_timeout(wait) {
            Some(event) => match loader.handle_message(&event, store) {
                Step::Idle => loader.poll(Instant::now()),
                other => other,
            },
            None => loader.poll(Instant::now()),
        };
    }

    loader.state().clone()
}

/// Runs the editor's message listener until no event arrives for `idle`.
///
/// Returns the number of replies posted.
pub fn serve_requests<S: SessionStore>(
    endpoint: &ContextEndpoint,
    editor: &EditorSession<S>,
    idle: Duration,
) -> usize {
    let mut replies = 0_usize;
    while let Some(event) = endpoint.recv_timeout(idle) {
        let Some(reply) = editor.respond(&event) else {
            continue;
        };

        match endpoint.post_message(reply.target, &reply.message, &reply.target_origin) {
            Ok(()) => replies += 1,
            Err(error) => tracing::warn!(%error, "could not answer preview request"),
        }
    }
    replies
}

#[cfg(test)]
mod tests {
    use super::BusOpener;
    use crate::editor::ContextOpener;
    use pv_ipc::MessageBus;
    use pv_url::Origin;

    #[test]
    fn opens_context_with_absolute_location() {
        let bus = MessageBus::new();
        let origin = Origin::parse("http://localhost:3000").unwrap_or_else(|_| unreachable!());
        let editor = bus.attach(origin);
        let mut opener = BusOpener::new(&bus, &editor);

        let opened = opener.open("/preview?token=abc");
        let opened = opened.unwrap_or_else(|| unreachable!());
        assert_eq!(opened.location, "http://localhost:3000/preview?token=abc");
        assert_eq!(opened.endpoint.opener(), Some(editor.id()));
        assert_eq!(bus.context_count(), 2);

        drop(opened);
        assert_eq!(bus.context_count(), 1);
    }

    #[test]
    fn blocked_opener_returns_nothing() {
        let bus = MessageBus::new();
        let origin = Origin::parse("http://localhost:3000").unwrap_or_else(|_| unreachable!());
        let editor = bus.attach(origin);
        let mut opener = BusOpener {
            popups_allowed: false,
            ..BusOpener::new(&bus, &editor)
        };

        assert!(opener.open("/preview?token=abc").is_none());
        assert_eq!(bus.context_count(), 1);
    }
}
