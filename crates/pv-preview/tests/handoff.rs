//! End-to-end handoff between an editor context and a preview context on the
//! in-memory bus.

use pv_core::ErrorKind;
use pv_ipc::ANY_ORIGIN;
use pv_ipc::HandoffMessage;
use pv_ipc::MessageBus;
use pv_payload::PreviewPayload;
use pv_preview::BusOpener;
use pv_preview::EditorSession;
use pv_preview::HandoffConfig;
use pv_preview::OpenedContext;
use pv_preview::OpenedPreview;
use pv_preview::PreviewState;
use pv_preview::run_preview_context;
use pv_preview::serve_requests;
use pv_storage::PreviewTokenStore;
use pv_storage::SessionArea;
use pv_storage::SessionStorage;
use pv_url::Origin;
use std::thread;
use std::time::Duration;
use std::time::Instant;

const ORIGIN: &str = "http://localhost:3000";
const SERVE_IDLE: Duration = Duration::from_millis(300);

fn origin() -> Origin {
    Origin::parse(ORIGIN).unwrap_or_else(|_| unreachable!())
}

fn short_config() -> HandoffConfig {
    HandoffConfig {
        timeout: Duration::from_millis(80),
        request_attempts: 1,
    }
}

fn editor_in(storage: &SessionStorage, site: &str, html: &str) -> EditorSession<SessionArea> {
    let mut editor = EditorSession::new(origin(), PreviewTokenStore::new(storage.area(site)));
    editor.html_input = html.to_owned();
    editor.base_url_input = "cdn.example.com/".to_owned();
    editor
}

fn open(
    editor: &mut EditorSession<SessionArea>,
    bus: &MessageBus,
    endpoint: &pv_ipc::ContextEndpoint,
) -> OpenedPreview<OpenedContext> {
    match editor.open_preview(&mut BusOpener::new(bus, endpoint)) {
        Ok(opened) => opened,
        Err(error) => panic!("open_preview failed: {error}"),
    }
}

fn ready_payload(state: &PreviewState) -> &PreviewPayload {
    match state {
        PreviewState::Ready(payload) => payload,
        other => panic!("expected ready state, got {other:?}"),
    }
}

#[test]
fn preview_in_other_partition_receives_payload_from_opener() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let editor_endpoint = bus.attach(origin());
    let mut editor = editor_in(&storage, "editor.test", "<p>handed off</p>");
    let opened = open(&mut editor, &bus, &editor_endpoint);

    let mut preview_store = PreviewTokenStore::new(storage.area("preview.test"));
    assert!(preview_store.load(&opened.token).is_none());

    let editor_ref = &editor;
    let (state, replies) = thread::scope(|scope| {
        let server = scope.spawn(move || serve_requests(&editor_endpoint, editor_ref, SERVE_IDLE));
        let state = run_preview_context(
            opened.handle.endpoint,
            &opened.handle.location,
            &mut preview_store,
            HandoffConfig::default(),
        );
        let replies = server.join().unwrap_or_else(|_| unreachable!());
        (state, replies)
    });

    let payload = ready_payload(&state);
    assert_eq!(payload.html(), "<p>handed off</p>");
    assert_eq!(payload.base_url(), Some("https://cdn.example.com/"));
    assert_eq!(replies, 1);

    // The handed-off payload now survives a reload of the preview tab.
    assert_eq!(preview_store.load(&opened.token).as_ref(), Some(payload));
    assert_eq!(bus.context_count(), 0);
}

#[test]
fn preview_in_same_partition_never_asks_opener() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let editor_endpoint = bus.attach(origin());
    let mut editor = editor_in(&storage, "localhost", "<p>local</p>");
    let opened = open(&mut editor, &bus, &editor_endpoint);

    let mut preview_store = PreviewTokenStore::new(storage.area("localhost"));
    let state = run_preview_context(
        opened.handle.endpoint,
        &opened.handle.location,
        &mut preview_store,
        short_config(),
    );

    assert_eq!(ready_payload(&state).html(), "<p>local</p>");
    assert!(editor_endpoint.try_recv().is_none());
    assert_eq!(bus.context_count(), 1);
}

#[test]
fn spoofed_payloads_are_ignored_until_timeout() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let editor_endpoint = bus.attach(origin());
    let mut editor = editor_in(&storage, "editor.test", "<p>real</p>");
    let opened = open(&mut editor, &bus, &editor_endpoint);

    let evil_origin = Origin::parse("https://evil.test").unwrap_or_else(|_| unreachable!());
    let evil = bus.attach(evil_origin);
    let forged = PreviewPayload::new("<p>evil</p>", None, 0)
        .encode()
        .unwrap_or_else(|_| unreachable!());
    let message = HandoffMessage::payload(opened.token.as_str(), forged);
    assert!(
        evil.post_message(opened.handle.endpoint.id(), &message, ANY_ORIGIN)
            .is_ok()
    );

    let mut preview_store = PreviewTokenStore::new(storage.area("preview.test"));
    let state = run_preview_context(
        opened.handle.endpoint,
        &opened.handle.location,
        &mut preview_store,
        short_config(),
    );

    assert!(matches!(state, PreviewState::Error(ref error) if error.kind == ErrorKind::HandoffTimeout));
    assert!(preview_store.load(&opened.token).is_none());

    // The editor did get the request; it just never answered.
    let request = editor_endpoint.try_recv().and_then(|event| event.message());
    assert_eq!(request, Some(HandoffMessage::request(opened.token.as_str())));
}

#[test]
fn spoofed_payload_does_not_preempt_real_response() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let editor_endpoint = bus.attach(origin());
    let mut editor = editor_in(&storage, "editor.test", "<p>real</p>");
    let opened = open(&mut editor, &bus, &editor_endpoint);

    let evil = bus.attach(Origin::parse("https://evil.test").unwrap_or_else(|_| unreachable!()));
    let forged = HandoffMessage::payload(opened.token.as_str(), "{\"html\":\"<p>evil</p>\"}");
    assert!(
        evil.post_message(opened.handle.endpoint.id(), &forged, ANY_ORIGIN)
            .is_ok()
    );

    let mut preview_store = PreviewTokenStore::new(storage.area("preview.test"));
    let editor_ref = &editor;
    let state = thread::scope(|scope| {
        let server = scope.spawn(move || serve_requests(&editor_endpoint, editor_ref, SERVE_IDLE));
        let state = run_preview_context(
            opened.handle.endpoint,
            &opened.handle.location,
            &mut preview_store,
            HandoffConfig::default(),
        );
        let _ = server.join();
        state
    });

    assert_eq!(ready_payload(&state).html(), "<p>real</p>");
}

#[test]
fn orphan_preview_times_out_once_with_not_found() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let preview = bus.attach(origin());
    let mut store = PreviewTokenStore::new(storage.area("preview.test"));

    let started = Instant::now();
    let state = run_preview_context(
        preview,
        "/preview?token=orphan",
        &mut store,
        short_config(),
    );

    assert!(started.elapsed() >= Duration::from_millis(80));
    match state {
        PreviewState::Error(error) => {
            assert_eq!(error.kind, ErrorKind::HandoffTimeout);
            assert_eq!(error.message, "payload not found");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(bus.context_count(), 0);
}

#[test]
fn preview_without_token_fails_immediately() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let preview = bus.attach(origin());
    let mut store = PreviewTokenStore::new(storage.area("preview.test"));

    let started = Instant::now();
    let state = run_preview_context(preview, "/preview", &mut store, HandoffConfig::default());

    assert!(started.elapsed() < Duration::from_millis(1400));
    assert!(matches!(state, PreviewState::Error(ref error) if error.kind == ErrorKind::MissingToken));
}

#[test]
fn blocked_popup_opens_no_context() {
    let bus = MessageBus::new();
    let storage = SessionStorage::default();
    let editor_endpoint = bus.attach(origin());
    let mut editor = editor_in(&storage, "editor.test", "<p>x</p>");

    let mut opener = BusOpener {
        popups_allowed: false,
        ..BusOpener::new(&bus, &editor_endpoint)
    };
    let opened = editor.open_preview(&mut opener);

    assert!(matches!(opened, Err(ref error) if error.kind == ErrorKind::PopupBlocked));
    assert_eq!(bus.context_count(), 1);
    assert_eq!(editor.html_input, "<p>x</p>");
}
