//! Purpose: `p11probe` CLI entry point.
//! Role: Binary crate root; probes a provider module, lists slots/tokens, prints text or JSON.
//! Invariants: Records go to stdout; diagnostics and errors go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: The provider is finalized before the module is unloaded.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use p11probe::api::sys::CKR_CRYPTOKI_ALREADY_INITIALIZED;
use p11probe::api::{Cryptoki, Error, ErrorKind, Probe, inventory, rv_name, to_exit_code};
use p11probe::report::{inventory_json, render_text};

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

#[derive(Parser)]
#[command(
    name = "p11probe",
    version,
    about = "Load a PKCS#11 provider module and list its slots and tokens",
    long_about = None,
    after_help = r#"EXAMPLES
  $ p11probe /usr/lib/softhsm/libsofthsm2.so
  $ p11probe ./libtpm2-pk11.so --all-slots --json
  $ p11probe                                   # try the built-in candidate list

Without MODULE, each --candidate (or the built-in list) is tried in order
and the first module that loads is used.

EXIT CODES
  0  success
  1  module could not be probed, or a PKCS#11 call failed
  2  usage error"#
)]
struct Cli {
    #[arg(
        env = "P11PROBE_MODULE",
        help = "Provider module to load (omit to search the candidate list)",
        value_hint = ValueHint::FilePath
    )]
    module: Option<PathBuf>,
    #[arg(
        long = "candidate",
        value_name = "PATH",
        help = "Fallback module path to try when MODULE is omitted (repeatable, in order)",
        value_hint = ValueHint::FilePath
    )]
    candidates: Vec<PathBuf>,
    #[arg(long, help = "Include slots without a token")]
    all_slots: bool,
    #[arg(long, help = "Emit JSON instead of text")]
    json: bool,
    #[arg(
        long,
        default_value = "auto",
        help = "Colorize error labels (auto|always|never)"
    )]
    color: ColorMode,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Log more detail to stderr (-v info, -vv debug; RUST_LOG overrides)"
    )]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
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

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                return Ok(RunOutcome::with_code(0));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `p11probe --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.verbose);
    let color_mode = cli.color;
    probe_and_report(cli).map_err(|err| (err, color_mode))
}

fn probe_and_report(cli: Cli) -> Result<RunOutcome, Error> {
    let mut probe = Probe::new();
    if !cli.candidates.is_empty() {
        probe = probe.with_candidates(cli.candidates);
    }
    probe.probe(cli.module.as_deref())?;

    let module = probe
        .which_path()
        .map(PathBuf::from)
        .unwrap_or_default();
    let functions = probe.function_list().ok_or_else(|| {
        Error::new(ErrorKind::Internal).with_message("probe succeeded without a function table")
    })?;

    let cryptoki = Cryptoki::initialize(functions).map_err(add_initialize_hint)?;
    let inventory = inventory(&cryptoki, &module, !cli.all_slots)?;
    cryptoki.finalize()?;

    let rendered = if cli.json {
        let value = inventory_json(&inventory);
        let mut line = serde_json::to_string(&value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("json encode failed")
                .with_source(err)
        })?;
        line.push('\n');
        line
    } else {
        render_text(&inventory)
    };
    io::stdout().write_all(rendered.as_bytes()).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write output")
            .with_source(err)
    })?;
    Ok(RunOutcome::ok())
}

fn add_initialize_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.rv() {
        Some(CKR_CRYPTOKI_ALREADY_INITIALIZED) => {
            err.with_hint("Another component in this process already initialized the provider.")
        }
        Some(_) => err.with_hint(
            "The provider rejected initialization; check its configuration file and token storage.",
        ),
        None => err,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Copy, Clone)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, use_color: bool, color: AnsiColor) -> String {
    if !use_color {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Probe => "failed to probe PKCS#11 module".to_string(),
        ErrorKind::Provider => "PKCS#11 call failed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(symbol) = err.symbol() {
        inner.insert("symbol".to_string(), json!(symbol));
    }
    if let Some(rv) = err.rv() {
        inner.insert("rv".to_string(), json!(rv));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(symbol) = err.symbol() {
        lines.push(format!(
            "{} {symbol}",
            colorize_label("symbol:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(rv) = err.rv() {
        lines.push(format!(
            "{} {} ({rv:#x})",
            colorize_label("rv:", use_color, AnsiColor::Yellow),
            rv_name(rv)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Cli, error_json, error_text};
    use clap::{CommandFactory, Parser};
    use p11probe::api::{Error, ErrorKind};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn candidates_keep_command_line_order() {
        let cli = Cli::try_parse_from([
            "p11probe",
            "--candidate",
            "/b.so",
            "--candidate",
            "/a.so",
            "-vv",
        ])
        .expect("parse");
        let expected = vec![PathBuf::from("/b.so"), PathBuf::from("/a.so")];
        assert_eq!(cli.candidates, expected);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn error_json_carries_probe_context() {
        let err = Error::new(ErrorKind::Probe)
            .with_message("C_GetFunctionList returned CKR_GENERAL_ERROR")
            .with_path("/opt/p11/libacme.so")
            .with_symbol("C_GetFunctionList")
            .with_rv(0x5);

        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Probe");
        assert_eq!(value["error"]["path"], "/opt/p11/libacme.so");
        assert_eq!(value["error"]["symbol"], "C_GetFunctionList");
        assert_eq!(value["error"]["rv"], 5);
    }

    #[test]
    fn error_text_without_color_is_plain() {
        let err = Error::new(ErrorKind::Provider)
            .with_message("C_Initialize failed: CKR_GENERAL_ERROR")
            .with_rv(0x5);
        let text = error_text(&err, false);
        assert_eq!(
            text,
            "error: C_Initialize failed: CKR_GENERAL_ERROR\nrv: CKR_GENERAL_ERROR (0x5)"
        );
    }
}
