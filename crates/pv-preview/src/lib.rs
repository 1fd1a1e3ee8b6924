//! Preview coordination: the editor's "open preview" flow, the opener-side
//! responder, the preview-side handoff state machine, and page composition.

use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use std::time::Duration;

mod driver;
mod editor;
mod loader;
mod page;
mod responder;

pub use driver::BusOpener;
pub use driver::OpenedContext;
pub use driver::run_preview_context;
pub use driver::serve_requests;
pub use editor::ContextOpener;
pub use editor::EditorSession;
pub use editor::OpenedPreview;
pub use editor::Status;
pub use editor::StatusTone;
pub use loader::OutboundRequest;
pub use loader::PreviewLoader;
pub use loader::PreviewState;
pub use loader::Step;
pub use page::compose_page;
pub use page::render_document;
pub use responder::OutboundReply;
pub use responder::respond;

const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_millis(1400);

/// Policy knobs for the preview-side handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffConfig {
    /// How long the preview waits for its opener before giving up.
    pub timeout: Duration,
    /// Requests sent within the timeout, evenly spaced. One means no re-request.
    pub request_attempts: u32,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HANDOFF_TIMEOUT,
            request_attempts: 1,
        }
    }
}

impl HandoffConfig {
    pub fn validate(&self) -> PreviewResult<()> {
        if self.timeout.is_zero() {
            return Err(PreviewError::new(
                ErrorKind::Config,
                "handoff.timeout_invalid",
                "handoff timeout must be greater than zero",
            ));
        }

        if self.request_attempts == 0 {
            return Err(PreviewError::new(
                ErrorKind::Config,
                "handoff.attempts_invalid",
                "handoff must send at least one request",
            ));
        }

        Ok(())
    }

    /// Gap between successive requests.
    pub fn request_interval(&self) -> Duration {
        self.timeout / self.request_attempts.max(1)
    }
}
