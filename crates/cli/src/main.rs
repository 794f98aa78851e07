//! bj - one-shot backup jobs
//!
//! Invoked by an orchestrator as `bj <copy|tar> -config <JSON> -target <TARGET>`.

mod commands;
mod exit_code;
mod output;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::Commands;
use exit_code::ExitCode;
use output::OutputConfig;

/// Backup job runner
#[derive(Parser, Debug)]
#[command(name = "bj", version, about)]
struct Cli {
    /// Output strict JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    /// Settings file with storage credentials and archiver options
    #[arg(long, global = true, env = "BJ_STORAGE_CONFIG")]
    storage_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Rewrite the single-dash long flags the orchestrator passes
///
/// `-config X`, `-config=X`, `-target X` and `-target=X` become their
/// double-dash forms. Everything after a bare `--` is left alone.
fn normalize_legacy_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    const LEGACY: [&str; 2] = ["-config", "-target"];

    let mut passthrough = false;
    args.into_iter()
        .map(|arg| {
            if passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }
            let name = text.split_once('=').map_or(text, |(name, _)| name);
            if LEGACY.contains(&name) {
                OsString::from(format!("-{text}"))
            } else {
                arg
            }
        })
        .collect()
}

/// Install the stderr subscriber; `json` keeps stderr machine-readable
fn init_tracing(debug: bool, json: bool) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("initialize logging: {e}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_from(normalize_legacy_flags(std::env::args_os()));

    if let Err(e) = init_tracing(cli.debug, cli.json) {
        eprintln!("{e:#}");
    }

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    let code = commands::execute(cli.command, output_config, cli.storage_config).await;
    if code != ExitCode::Success {
        tracing::debug!(code = code.as_i32(), "Job failed");
    }
    std::process::exit(code.as_i32());
}
