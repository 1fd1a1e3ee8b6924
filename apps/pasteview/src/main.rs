mod cli;

use cli::CliArgs;
use cli::Command;
use cli::Settings;
use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use pv_ipc::MessageBus;
use pv_payload::PreviewPayload;
use pv_preview::BusOpener;
use pv_preview::EditorSession;
use pv_preview::PreviewState;
use pv_preview::compose_page;
use pv_preview::run_preview_context;
use pv_preview::serve_requests;
use pv_storage::PreviewTokenStore;
use pv_storage::SessionArea;
use pv_storage::SessionStorage;
use std::io::Read;
use std::io::Write;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EDITOR_SITE: &str = "editor.localhost";
const PREVIEW_SITE: &str = "preview.localhost";
const SERVE_IDLE: Duration = Duration::from_millis(250);

fn main() -> ExitCode {
    init_tracing();

    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{}", cli::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("pasteview: {message}\n{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(code = error.code, kind = error.kind.as_str(), %error, "pasteview failed");
            eprintln!("{}", error.status_message());
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: &CliArgs) -> PreviewResult<()> {
    let settings = Settings::from_env()?;
    let storage = SessionStorage::default();
    let mut editor = EditorSession::new(
        settings.origin.clone(),
        PreviewTokenStore::new(storage.area(EDITOR_SITE)),
    );
    editor.html_input = read_input(args)?;
    editor.base_url_input = args.base_url.clone().unwrap_or_default();

    if editor.has_base_url_error() {
        return Err(PreviewError::new(
            ErrorKind::InvalidBaseUrl,
            "cli.base_url_invalid",
            format!("`{}` is not an http(s) URL", editor.base_url_input),
        ));
    }

    match args.command {
        Command::Render => write_output(args, &editor.inline_document()),
        Command::Page => {
            let payload =
                PreviewPayload::now(editor.html_input.clone(), editor.normalized_base_url());
            write_output(args, &compose_page(&PreviewState::Ready(payload), &settings.sandbox))
        }
        Command::Handoff => run_handoff(args, &settings, &storage, &mut editor),
    }
}

fn run_handoff(
    args: &CliArgs,
    settings: &Settings,
    storage: &SessionStorage,
    editor: &mut EditorSession<SessionArea>,
) -> PreviewResult<()> {
    let bus = MessageBus::new();
    let editor_endpoint = bus.attach(settings.origin.clone());
    let opened = editor.open_preview(&mut BusOpener::new(&bus, &editor_endpoint))?;
    eprintln!("{}", editor.status().message);

    let mut preview_store = PreviewTokenStore::new(storage.area(PREVIEW_SITE));
    let editor_ref = &*editor;
    let state = thread::scope(|scope| {
        let server =
            scope.spawn(move || serve_requests(&editor_endpoint, editor_ref, SERVE_IDLE));
        let state = run_preview_context(
            opened.handle.endpoint,
            &opened.handle.location,
            &mut preview_store,
            settings.handoff,
        );
        match server.join() {
            Ok(replies) => tracing::debug!(replies, "editor listener finished"),
            Err(_) => tracing::warn!("editor listener panicked"),
        }
        state
    });

    write_output(args, &compose_page(&state, &settings.sandbox))?;
    match state {
        PreviewState::Error(error) => Err(error),
        PreviewState::Ready(_) | PreviewState::Loading => Ok(()),
    }
}

fn read_input(args: &CliArgs) -> PreviewResult<String> {
    let bytes = match &args.input {
        Some(path) => std::fs::read(path).map_err(|error| {
            io_error("cli.read_failed", format!("failed to read {}: {error}", path.display()))
        })?,
        None => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .map_err(|error| io_error("cli.read_failed", format!("failed to read stdin: {error}")))?;
            bytes
        }
    };
    Ok(cli::decode_input(&bytes))
}

fn write_output(args: &CliArgs, document: &str) -> PreviewResult<()> {
    match &args.output {
        Some(path) => std::fs::write(path, document).map_err(|error| {
            io_error("cli.write_failed", format!("failed to write {}: {error}", path.display()))
        }),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{document}")
                .and_then(|()| stdout.flush())
                .map_err(|error| io_error("cli.write_failed", format!("failed to write stdout: {error}")))
        }
    }
}

fn io_error(code: &'static str, message: String) -> PreviewError {
    PreviewError::new(ErrorKind::Io, code, message)
}
