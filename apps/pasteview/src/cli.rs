use pv_core::ErrorKind;
use pv_core::PreviewError;
use pv_core::PreviewResult;
use pv_preview::HandoffConfig;
use pv_security::SandboxPolicy;
use pv_url::Origin;
use std::path::PathBuf;
use std::time::Duration;

pub const USAGE: &str = "usage: pasteview <render|page|handoff> [--base-url URL] [--input FILE|-] [--output FILE]";

const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const ENV_TIMEOUT_MS: &str = "PASTEVIEW_HANDOFF_TIMEOUT_MS";
const ENV_SAME_ORIGIN: &str = "PASTEVIEW_SANDBOX_SAME_ORIGIN";
const ENV_ORIGIN: &str = "PASTEVIEW_ORIGIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Rewritten document only.
    Render,
    /// Full preview page around the document.
    Page,
    /// Editor and preview contexts in separate partitions, talking over the bus.
    Handoff,
}

impl Command {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "render" => Some(Self::Render),
            "page" => Some(Self::Page),
            "handoff" => Some(Self::Handoff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub command: Command,
    pub base_url: Option<String>,
    /// `None` reads stdin.
    pub input: Option<PathBuf>,
    /// `None` writes stdout.
    pub output: Option<PathBuf>,
}

/// Parses everything after the program name. `Ok(None)` means help was requested.
pub fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<CliArgs>, String> {
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        return Err("missing command".to_owned());
    };
    if first == "-h" || first == "--help" {
        return Ok(None);
    }

    let command = Command::from_name(&first)
        .ok_or_else(|| format!("unknown command `{first}` (expected: render|page|handoff)"))?;
    let mut parsed = CliArgs {
        command,
        base_url: None,
        input: None,
        output: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--base-url" => parsed.base_url = Some(flag_value(&mut args, &arg)?),
            "--input" => {
                let value = flag_value(&mut args, &arg)?;
                parsed.input = (value != "-").then(|| PathBuf::from(value));
            }
            "--output" => parsed.output = Some(PathBuf::from(flag_value(&mut args, &arg)?)),
            other => return Err(format!("unexpected argument `{other}`")),
        }
    }

    Ok(Some(parsed))
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("missing value after {flag}"))
}

/// Runtime settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub origin: Origin,
    pub handoff: HandoffConfig,
    pub sandbox: SandboxPolicy,
}

impl Settings {
    pub fn from_env() -> PreviewResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PreviewResult<Self> {
        let origin = Origin::parse(lookup(ENV_ORIGIN).as_deref().unwrap_or(DEFAULT_ORIGIN))?;

        let mut handoff = HandoffConfig::default();
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|error| {
                PreviewError::new(
                    ErrorKind::Config,
                    "cli.timeout_invalid",
                    format!("{ENV_TIMEOUT_MS}=`{raw}` is not a millisecond count: {error}"),
                )
            })?;
            handoff.timeout = Duration::from_millis(millis);
        }
        handoff.validate()?;

        let sandbox = match lookup(ENV_SAME_ORIGIN).as_deref().map(str::trim) {
            None | Some("1" | "true") => SandboxPolicy::default(),
            Some("0" | "false") => SandboxPolicy::isolated(),
            Some(other) => {
                return Err(PreviewError::new(
                    ErrorKind::Config,
                    "cli.same_origin_invalid",
                    format!("{ENV_SAME_ORIGIN}=`{other}` must be one of 0, 1, true, false"),
                ));
            }
        };
        sandbox.validate()?;

        Ok(Self {
            origin,
            handoff,
            sandbox,
        })
    }
}

/// Decodes raw input, honouring a byte-order mark and falling back to UTF-8.
pub fn decode_input(bytes: &[u8]) -> String {
    let (text, encoding, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        tracing::warn!(
            encoding = encoding.name(),
            "input contained invalid sequences; replaced them"
        );
    }
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use super::Command;
    use super::Settings;
    use super::decode_input;
    use super::parse_args;
    use pv_core::ErrorKind;
    use std::path::PathBuf;
    use std::time::Duration;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn parses_command_and_flags() {
        let parsed = parse_args(args(&[
            "page",
            "--base-url",
            "cdn.test",
            "--input",
            "doc.html",
            "--output",
            "out.html",
        ]));
        assert_eq!(
            parsed,
            Ok(Some(CliArgs {
                command: Command::Page,
                base_url: Some("cdn.test".to_owned()),
                input: Some(PathBuf::from("doc.html")),
                output: Some(PathBuf::from("out.html")),
            }))
        );
    }

    #[test]
    fn dash_input_means_stdin() {
        let parsed = parse_args(args(&["render", "--input", "-"]));
        assert!(matches!(parsed, Ok(Some(CliArgs { input: None, .. }))));
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(parse_args(args(&["--help"])), Ok(None));
        assert_eq!(parse_args(args(&["handoff", "-h"])), Ok(None));
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["open"])).is_err());
        assert!(parse_args(args(&["render", "--base-url"])).is_err());
        assert!(parse_args(args(&["render", "--verbose"])).is_err());
    }

    #[test]
    fn settings_default_without_environment() {
        let settings = Settings::from_lookup(|_| None);
        let settings = settings.unwrap_or_else(|_| unreachable!());
        assert_eq!(settings.origin.as_str(), "http://localhost:3000");
        assert_eq!(settings.handoff.timeout, Duration::from_millis(1400));
        assert!(settings.sandbox.allow_same_origin);
    }

    #[test]
    fn settings_read_overrides() {
        let settings = Settings::from_lookup(|name| match name {
            "PASTEVIEW_HANDOFF_TIMEOUT_MS" => Some("250".to_owned()),
            "PASTEVIEW_SANDBOX_SAME_ORIGIN" => Some("false".to_owned()),
            "PASTEVIEW_ORIGIN" => Some("https://paste.example".to_owned()),
            _ => None,
        });
        let settings = settings.unwrap_or_else(|_| unreachable!());
        assert_eq!(settings.origin.as_str(), "https://paste.example");
        assert_eq!(settings.handoff.timeout, Duration::from_millis(250));
        assert!(!settings.sandbox.allow_same_origin);
    }

    #[test]
    fn settings_reject_bad_values() {
        let zero = Settings::from_lookup(|name| {
            (name == "PASTEVIEW_HANDOFF_TIMEOUT_MS").then(|| "0".to_owned())
        });
        assert!(matches!(zero, Err(ref error) if error.kind == ErrorKind::Config));

        let garbled = Settings::from_lookup(|name| {
            (name == "PASTEVIEW_SANDBOX_SAME_ORIGIN").then(|| "maybe".to_owned())
        });
        assert!(matches!(garbled, Err(ref error) if error.code == "cli.same_origin_invalid"));
    }

    #[test]
    fn decodes_bom_and_replaces_invalid_bytes() {
        assert_eq!(decode_input(b"<p>plain</p>"), "<p>plain</p>");
        assert_eq!(decode_input(&[0xEF, 0xBB, 0xBF, b'o', b'k']), "ok");
        assert_eq!(decode_input(&[0xFF, 0xFE, b'o', 0, b'k', 0]), "ok");
        assert_eq!(decode_input(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }
}
