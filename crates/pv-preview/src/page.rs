use crate::loader::PreviewState;
use chrono::Local;
use chrono::TimeZone;
use pv_core::PreviewError;
use pv_html::build_preview_document;
use pv_html::escape_attribute;
use pv_payload::PreviewPayload;
use pv_security::SandboxPolicy;

const FRAME_TITLE: &str = "HTML preview";

/// The document handed to the preview frame, with the payload's base URL applied.
pub fn render_document(payload: &PreviewPayload) -> String {
    build_preview_document(payload.html(), payload.base_url())
}

/// Full preview page for the current loader state.
pub fn compose_page(state: &PreviewState, sandbox: &SandboxPolicy) -> String {
    let body = match state {
        PreviewState::Loading => loading_view(),
        PreviewState::Error(error) => error_view(error),
        PreviewState::Ready(payload) => ready_view(payload, sandbox),
    };

    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{FRAME_TITLE}</title></head><body>{body}</body></html>"
    )
}

fn loading_view() -> String {
    "<main class=\"preview-status\"><p>Preparing preview…</p></main>".to_owned()
}

fn error_view(error: &PreviewError) -> String {
    format!(
        "<main class=\"preview-status\"><h1>Cannot render preview</h1><p>{}</p><a href=\"/\">Back to editor</a></main>",
        escape_attribute(error.status_message())
    )
}

fn ready_view(payload: &PreviewPayload, sandbox: &SandboxPolicy) -> String {
    let base_line = payload
        .base_url()
        .map(|base_url| format!("<span>Base: {}</span>", escape_attribute(base_url)))
        .unwrap_or_default();
    let header = format!(
        "<header class=\"preview-header\"><span>Rendered {}</span>{base_line}</header>",
        escape_attribute(&rendered_at(payload.created_at()))
    );

    format!(
        "{header}<iframe class=\"preview-frame\" sandbox=\"{}\" title=\"{FRAME_TITLE}\" srcdoc=\"{}\"></iframe>",
        sandbox.attribute_value(),
        escape_attribute(&render_document(payload))
    )
}

/// Local date-time for an epoch-millisecond timestamp; the raw number if out of range.
fn rendered_at(created_at: i64) -> String {
    match Local.timestamp_millis_opt(created_at).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => created_at.to_string(),
    }
}
