//! Purpose: `recfile` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Records and command results are emitted as one compact JSON value per line.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Threads are owned here; the library only provides the scanner and queue.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde::Serialize;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use recfile::api::{DEFAULT_CAPACITY, Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Run `recfile --help` for usage."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command)
        .map_err(add_io_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "recfile",
    version,
    about = "Scan and re-read newline-delimited JSON record files",
    long_about = r#"Scan newline-delimited JSON record files with a pool of consumer threads,
and re-read single records later from their byte offset and length."#,
    after_help = r#"EXAMPLES
  $ recfile scan events.jsonl --concurrency 4
  $ recfile get events.jsonl --offset 1024 --length 57
  $ recfile append events.jsonl '{"event":"login"}'

NOTES
  - Log verbosity follows RUST_LOG (default: info), written to stderr"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Scan every record once and fan it out to consumer threads",
        long_about = r#"Scan a record file once and hand each record to one of N consumer threads.

Each consumer prints `{"offset":..,"length":..,"record":{..}}` per record.
Order across consumers is not guaranteed. Malformed lines are logged and skipped.
A JSON scan summary is written to stderr when the scan ends."#,
        after_help = r#"EXAMPLES
  $ recfile scan events.jsonl
  $ recfile scan events.jsonl --concurrency 8 --capacity 256"#
    )]
    Scan {
        #[arg(help = "Record file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(
            long,
            short = 'c',
            default_value_t = 1,
            help = "Number of consumer threads"
        )]
        concurrency: usize,
        #[arg(
            long,
            default_value_t = DEFAULT_CAPACITY,
            help = "Maximum queued records before the scanner blocks"
        )]
        capacity: usize,
    },
    #[command(
        arg_required_else_help = true,
        about = "Re-read one record by byte offset and length",
        after_help = r#"EXAMPLES
  $ recfile get events.jsonl --offset 0 --length 17"#
    )]
    Get {
        #[arg(help = "Record file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, help = "Byte offset of the record")]
        offset: u64,
        #[arg(long, help = "Record length in bytes")]
        length: u32,
    },
    #[command(
        arg_required_else_help = true,
        about = "Append one JSON object as a new record line",
        after_help = r#"EXAMPLES
  $ recfile append events.jsonl '{"event":"login"}'
  $ recfile append --create new.jsonl '{"first":true}'"#
    )]
    Append {
        #[arg(help = "Record file path", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(help = "JSON object to append")]
        data: String,
        #[arg(long, help = "Create the file if it does not exist")]
        create: bool,
    },
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or("invalid arguments");
    first.trim_start_matches("error: ").trim().to_string()
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::NotFound => err.with_hint("Check the path, or pass --create when appending."),
        ErrorKind::Permission => err.with_hint("Check read/write permissions on the record file."),
        ErrorKind::Busy => err.with_hint("Another process holds the append lock; retry shortly."),
        _ => err,
    }
}

fn emit_json(value: &Value) -> Result<(), Error> {
    let json = serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{json}").map_err(|err| {
        Error::from_io(err).with_message("failed to write to stdout")
    })
}

const RED: &str = "31";
const YELLOW: &str = "33";

fn paint(label: &str, code: &str, enabled: bool) -> String {
    if enabled {
        format!("\u{1b}[{code}m{label}\u{1b}[0m")
    } else {
        label.to_string()
    }
}

/// Everything the CLI reports about a failed command, rendered as JSON on
/// pipes and as labelled lines on a terminal.
#[derive(Debug, Serialize)]
struct Diagnostic {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a Diagnostic,
}

impl Diagnostic {
    fn from_error(err: &Error) -> Self {
        let message = match err.message() {
            Some(message) => message.to_string(),
            None => fallback_message(err.kind()).to_string(),
        };
        let mut causes = Vec::new();
        let mut cur = err.source();
        while let Some(source) = cur {
            causes.push(source.to_string());
            cur = source.source();
        }
        Self {
            kind: format!("{:?}", err.kind()),
            message,
            hint: err.hint().map(str::to_string),
            path: err.path().map(|path| path.display().to_string()),
            offset: err.offset(),
            length: err.length(),
            causes,
        }
    }

    /// Record coordinates as a byte range, when the error carries them.
    fn location(&self) -> Option<String> {
        match (self.offset, self.length) {
            (Some(offset), Some(length)) => {
                let end = offset.saturating_add(u64::from(length));
                Some(format!("bytes {offset}..{end} ({length} bytes)"))
            }
            (Some(offset), None) => Some(format!("byte {offset}")),
            (None, Some(length)) => Some(format!("{length} bytes")),
            (None, None) => None,
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(&ErrorEnvelope { error: self }).unwrap_or_else(|_| {
            "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}"
                .to_string()
        })
    }

    fn to_text(&self, use_color: bool) -> String {
        let mut lines = vec![format!("{} {}", paint("error:", RED, use_color), self.message)];
        let details = [
            ("hint:", self.hint.clone()),
            ("path:", self.path.clone()),
            ("at:", self.location()),
        ];
        for (label, value) in details {
            if let Some(value) = value {
                lines.push(format!("{} {value}", paint(label, YELLOW, use_color)));
            }
        }
        for cause in &self.causes {
            lines.push(format!("{} {cause}", paint("caused by:", YELLOW, use_color)));
        }
        lines.join("\n")
    }
}

fn fallback_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::Busy => "record file is busy",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Malformed => "malformed record",
        ErrorKind::Io => "i/o error",
        ErrorKind::Interrupted => "interrupted",
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let diagnostic = Diagnostic::from_error(err);
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", diagnostic.to_text(color_mode.use_color(is_tty)));
    } else {
        eprintln!("{}", diagnostic.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::Diagnostic;
    use recfile::api::{Error, ErrorKind};
    use serde_json::Value;

    #[test]
    fn diagnostic_json_carries_coordinates_and_causes() {
        let err = Error::new(ErrorKind::Io)
            .with_message("positioned read failed")
            .with_path("/data/records.jsonl")
            .with_offset(12)
            .with_length(4)
            .with_source(std::io::Error::other("device gone"));
        let value: Value =
            serde_json::from_str(&Diagnostic::from_error(&err).to_json()).expect("json");
        let inner = value.get("error").expect("error object");
        assert_eq!(inner["kind"], "Io");
        assert_eq!(inner["message"], "positioned read failed");
        assert_eq!(inner["path"], "/data/records.jsonl");
        assert_eq!(inner["offset"], 12);
        assert_eq!(inner["length"], 4);
        assert_eq!(inner["causes"][0], "device gone");
        assert!(inner.get("hint").is_none());
    }

    #[test]
    fn diagnostic_text_shows_the_record_byte_range() {
        let err = Error::new(ErrorKind::Malformed)
            .with_message("record is not valid JSON")
            .with_offset(12)
            .with_length(4);
        let text = Diagnostic::from_error(&err).to_text(false);
        assert_eq!(text, "error: record is not valid JSON\nat: bytes 12..16 (4 bytes)");
    }

    #[test]
    fn diagnostic_text_without_color_is_plain() {
        let err = Error::new(ErrorKind::Usage).with_hint("try again");
        let text = Diagnostic::from_error(&err).to_text(false);
        assert_eq!(text, "error: usage error\nhint: try again");
    }
}
