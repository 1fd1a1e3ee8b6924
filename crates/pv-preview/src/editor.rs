use crate::responder::OutboundReply;
use crate::responder::respond;
use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use pv_html::build_preview_document;
use pv_ipc::MessageEvent;
use pv_payload::PreviewPayload;
use pv_payload::PreviewToken;
use pv_storage::PreviewTokenStore;
use pv_storage::SessionStore;
use pv_url::Origin;
use pv_url::normalize_base_url;

/// Opens a new browsing context at a path; `None` means the popup was blocked.
pub trait ContextOpener {
    type Handle;

    fn open(&mut self, path: &str) -> Option<Self::Handle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Idle,
    Success,
    Error,
}

/// Status line shown under the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub tone: StatusTone,
    pub message: String,
}

impl Status {
    pub fn idle() -> Self {
        Self {
            tone: StatusTone::Idle,
            message: String::new(),
        }
    }

    fn error(error: &PreviewError) -> Self {
        Self {
            tone: StatusTone::Error,
            message: error.status_message().to_owned(),
        }
    }
}

/// Result of a successful "open preview".
#[derive(Debug)]
pub struct OpenedPreview<H> {
    pub token: PreviewToken,
    pub path: String,
    pub handle: H,
}

/// Editor view state plus the storage it hands payloads through.
#[derive(Debug)]
pub struct EditorSession<S> {
    pub html_input: String,
    pub base_url_input: String,
    pub show_inline_preview: bool,
    status: Status,
    origin: Origin,
    store: PreviewTokenStore<S>,
}

impl<S: SessionStore> EditorSession<S> {
    pub fn new(origin: Origin, store: PreviewTokenStore<S>) -> Self {
        Self {
            html_input: String::new(),
            base_url_input: String::new(),
            show_inline_preview: false,
            status: Status::idle(),
            origin,
            store,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn store(&self) -> &PreviewTokenStore<S> {
        &self.store
    }

    pub fn normalized_base_url(&self) -> Option<String> {
        normalize_base_url(&self.base_url_input)
    }

    /// A non-blank base URL that does not normalize.
    pub fn has_base_url_error(&self) -> bool {
        !self.base_url_input.trim().is_empty() && self.normalized_base_url().is_none()
    }

    /// Document for the inline preview pane.
    pub fn inline_document(&self) -> String {
        build_preview_document(&self.html_input, self.normalized_base_url().as_deref())
    }

    /// Length in UTF-16 code units, as a browser text field counts it.
    pub fn char_count(&self) -> usize {
        self.html_input.encode_utf16().count()
    }

    /// Size badge shown next to the editor, e.g. `12 chars · 1 lines`.
    pub fn size_label(&self) -> String {
        format!("{} chars · {} lines", self.char_count(), self.line_count())
    }

    pub fn line_count(&self) -> usize {
        if self.html_input.is_empty() {
            return 0;
        }

        let mut count = 1_usize;
        let mut chars = self.html_input.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    count += 1;
                }
                '\n' => count += 1,
                _ => {}
            }
        }
        count
    }

    pub fn clear(&mut self) {
        self.html_input.clear();
        self.base_url_input.clear();
        self.show_inline_preview = false;
        self.status = Status::idle();
    }

    /// Stores the current input under a fresh token and opens a preview context for it.
    ///
    /// Blank HTML and invalid base URLs are refused before anything is stored.
    /// A blocked popup leaves the editor input untouched so the user can retry.
    pub fn open_preview<O: ContextOpener>(
        &mut self,
        opener: &mut O,
    ) -> PreviewResult<OpenedPreview<O::Handle>> {
        match self.try_open_preview(opener) {
            Ok(opened) => {
                self.status = Status {
                    tone: StatusTone::Success,
                    message: format!("Opened at {}", chrono::Local::now().format("%H:%M:%S")),
                };
                Ok(opened)
            }
            Err(error) => {
                self.status = Status::error(&error);
                Err(error)
            }
        }
    }

    fn try_open_preview<O: ContextOpener>(
        &mut self,
        opener: &mut O,
    ) -> PreviewResult<OpenedPreview<O::Handle>> {
        if self.html_input.trim().is_empty() {
            return Err(PreviewError::new(
                ErrorKind::EmptyDocument,
                "editor.html_empty",
                "no HTML to preview",
            ));
        }

        if self.has_base_url_error() {
            return Err(PreviewError::new(
                ErrorKind::InvalidBaseUrl,
                "editor.base_url_invalid",
                format!("base URL `{}` is not an http(s) URL", self.base_url_input.trim()),
            ));
        }

        let token = PreviewToken::generate();
        let payload = PreviewPayload::now(self.html_input.clone(), self.normalized_base_url());
        self.store.put(&token, &payload)?;

        let path = token.preview_path();
        let Some(handle) = opener.open(&path) else {
            tracing::warn!(token = %token, "preview popup was blocked");
            return Err(PreviewError::new(
                ErrorKind::PopupBlocked,
                "editor.popup_blocked",
                "opening the preview context returned no handle",
            ));
        };

        tracing::info!(token = %token, path = %path, "opened preview context");
        Ok(OpenedPreview {
            token,
            path,
            handle,
        })
    }

    /// Message listener of the editor context: answers preview requests.
    pub fn respond(&self, event: &MessageEvent) -> Option<OutboundReply> {
        respond(event, &self.origin, &self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::ContextOpener;
    use super::EditorSession;
    use super::StatusTone;
    use pv_core::ErrorKind;
    use pv_storage::PreviewTokenStore;
    use pv_storage::SessionArea;
    use pv_storage::SessionStorage;
    use pv_storage::SessionStorageConfig;
    use pv_url::Origin;

    #[derive(Default)]
    struct RecordingOpener {
        blocked: bool,
        opened: Vec<String>,
    }

    impl ContextOpener for RecordingOpener {
        type Handle = usize;

        fn open(&mut self, path: &str) -> Option<usize> {
            if self.blocked {
                return None;
            }
            self.opened.push(path.to_owned());
            Some(self.opened.len())
        }
    }

    fn session_with(config: SessionStorageConfig) -> EditorSession<SessionArea> {
        let origin = Origin::parse("http://localhost:3000").unwrap_or_else(|_| unreachable!());
        let storage = SessionStorage::new(config);
        EditorSession::new(origin, PreviewTokenStore::new(storage.area("localhost")))
    }

    fn session() -> EditorSession<SessionArea> {
        session_with(SessionStorageConfig::default())
    }

    #[test]
    fn open_preview_stores_payload_and_opens_path() {
        let mut editor = session();
        editor.html_input = "<p>hello</p>".to_owned();
        editor.base_url_input = "cdn.example.com/assets/".to_owned();
        let mut opener = RecordingOpener::default();

        let opened = editor.open_preview(&mut opener);
        let opened = match opened {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(opener.opened, vec![opened.path.clone()]);
        assert_eq!(opened.path, opened.token.preview_path());
        assert_eq!(opened.handle, 1);

        let stored = editor.store().load(&opened.token);
        let stored = stored.unwrap_or_else(|| unreachable!());
        assert_eq!(stored.html(), "<p>hello</p>");
        assert_eq!(stored.base_url(), Some("https://cdn.example.com/assets/"));

        assert_eq!(editor.status().tone, StatusTone::Success);
        assert!(editor.status().message.starts_with("Opened at "));
    }

    #[test]
    fn each_open_uses_a_fresh_token() {
        let mut editor = session();
        editor.html_input = "x".to_owned();
        let mut opener = RecordingOpener::default();

        let first = editor.open_preview(&mut opener).map(|opened| opened.token);
        let second = editor.open_preview(&mut opener).map(|opened| opened.token);
        assert!(first.is_ok() && second.is_ok());
        assert_ne!(first, second);
    }

    #[test]
    fn blank_html_is_refused() {
        let mut editor = session();
        editor.html_input = "  \n ".to_owned();
        let mut opener = RecordingOpener::default();

        let opened = editor.open_preview(&mut opener);
        assert!(matches!(opened, Err(ref error) if error.kind == ErrorKind::EmptyDocument));
        assert!(opener.opened.is_empty());
        assert_eq!(editor.status().message, "Paste HTML first.");
    }

    #[test]
    fn invalid_base_url_fails_closed() {
        let mut editor = session();
        editor.html_input = "<img src=\"a.png\">".to_owned();
        editor.base_url_input = "ftp://files.example.com/".to_owned();
        let mut opener = RecordingOpener::default();

        assert!(editor.has_base_url_error());
        let opened = editor.open_preview(&mut opener);
        assert!(matches!(opened, Err(ref error) if error.kind == ErrorKind::InvalidBaseUrl));
        assert!(opener.opened.is_empty());
        assert_eq!(editor.status().tone, StatusTone::Error);
        assert_eq!(editor.status().message, "Invalid base URL.");
    }

    #[test]
    fn blocked_popup_is_reported_and_input_kept() {
        let mut editor = session();
        editor.html_input = "<p>x</p>".to_owned();
        let mut opener = RecordingOpener {
            blocked: true,
            ..RecordingOpener::default()
        };

        let opened = editor.open_preview(&mut opener);
        assert!(matches!(opened, Err(ref error) if error.kind == ErrorKind::PopupBlocked));
        assert_eq!(editor.html_input, "<p>x</p>");
        assert_eq!(editor.status().message, "Popup blocked. Allow popups and retry.");

        opener.blocked = false;
        assert!(editor.open_preview(&mut opener).is_ok());
    }

    #[test]
    fn storage_quota_error_is_propagated() {
        let mut editor = session_with(SessionStorageConfig {
            partition_by_top_level_site: true,
            quota_bytes: 32,
        });
        editor.html_input = "<p>".repeat(64);
        let mut opener = RecordingOpener::default();

        let opened = editor.open_preview(&mut opener);
        assert!(matches!(opened, Err(ref error) if error.kind == ErrorKind::StorageQuota));
        assert!(opener.opened.is_empty());
    }

    #[test]
    fn inline_document_applies_base_url() {
        let mut editor = session();
        editor.html_input = "<html><body>x</body></html>".to_owned();
        assert_eq!(editor.inline_document(), "<html><body>x</body></html>");

        editor.base_url_input = "a.test".to_owned();
        assert_eq!(
            editor.inline_document(),
            "<html><head><base href=\"https://a.test/\"></head><body>x</body></html>"
        );
    }

    #[test]
    fn counts_lines_across_newline_styles() {
        let mut editor = session();
        assert_eq!(editor.line_count(), 0);
        editor.html_input = "one".to_owned();
        assert_eq!(editor.line_count(), 1);
        editor.html_input = "a\nb\r\nc\rd\n".to_owned();
        assert_eq!(editor.line_count(), 5);
    }

    #[test]
    fn counts_chars_in_utf16_units() {
        let mut editor = session();
        assert_eq!(editor.char_count(), 0);
        assert_eq!(editor.size_label(), "0 chars · 0 lines");

        editor.html_input = "<p>é\u{1F600}</p>\n".to_owned();
        assert_eq!(editor.char_count(), 11);
        assert_eq!(editor.size_label(), "11 chars · 2 lines");
    }

    #[test]
    fn clear_resets_inputs_and_status() {
        let mut editor = session();
        editor.html_input = "x".to_owned();
        editor.base_url_input = "bad url".to_owned();
        editor.show_inline_preview = true;
        let _ = editor.open_preview(&mut RecordingOpener::default());

        editor.clear();
        assert!(editor.html_input.is_empty());
        assert!(editor.base_url_input.is_empty());
        assert!(!editor.show_inline_preview);
        assert_eq!(editor.status().tone, StatusTone::Idle);
    }
}
