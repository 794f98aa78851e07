//! Job commands
//!
//! Both job kinds share one runner: decode the configuration, build the
//! job with its collaborators, run it once and map the outcome to an exit
//! code. Only job construction differs per kind.

mod copy;
mod tar;

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use bj_core::{Config, ConfigManager, Job, JobConfig, JobKind, JobReport};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Job kinds
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recursively copy files to a local directory or a bucket
    Copy(JobArgs),

    /// Stream a tar archive of the files into a bucket
    Tar(JobArgs),
}

/// Arguments shared by every job kind
#[derive(Args, Debug)]
pub struct JobArgs {
    /// Job configuration as a JSON string
    #[arg(long)]
    pub config: String,

    /// Destination root: a local directory or a bucket name
    #[arg(long)]
    pub target: String,
}

#[derive(Debug, Serialize)]
struct JobOutput<'a> {
    #[serde(flatten)]
    report: &'a JobReport,
    success: bool,
}

/// Execute a job command
pub async fn execute(
    command: Commands,
    output_config: OutputConfig,
    storage_config: Option<PathBuf>,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (kind, args) = match command {
        Commands::Copy(args) => (JobKind::Copy, args),
        Commands::Tar(args) => (JobKind::Tar, args),
    };

    let config = match JobConfig::parse(&args.config) {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    if config.files.is_empty() {
        formatter.warning("No files configured, nothing to transfer");
    }

    let loader = SettingsLoader {
        path: storage_config,
    };
    let built = match kind {
        JobKind::Copy => copy::build(&config, &loader).await,
        JobKind::Tar => tar::build(&config, &loader).await,
    };
    let job = match built {
        Ok(job) => job,
        Err(e) => {
            formatter.error(&format!("{kind} job failed: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    run_job(job.as_ref(), &config, &args.target, &formatter).await
}

/// Run a constructed job and report the outcome
async fn run_job(job: &dyn Job, config: &JobConfig, target: &str, formatter: &Formatter) -> ExitCode {
    match job.run(config, target).await {
        Ok(report) => {
            print_report(formatter, &report, target);
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("{} job failed: {e}", job.kind()));
            ExitCode::from_error(&e)
        }
    }
}

fn print_report(formatter: &Formatter, report: &JobReport, target: &str) {
    if formatter.is_json() {
        formatter.json(&JobOutput {
            report,
            success: true,
        });
        return;
    }

    let size = humansize::format_size(report.bytes, humansize::BINARY);
    formatter.success(&format!(
        "{} job finished: {} file(s), {} to {}",
        report.job,
        report.files,
        formatter.style_size(&size),
        formatter.style_name(target)
    ));
}

/// Loads the process-wide settings on first use
pub struct SettingsLoader {
    path: Option<PathBuf>,
}

impl SettingsLoader {
    fn load(&self) -> bj_core::Result<Config> {
        let manager = match &self.path {
            Some(path) => ConfigManager::with_path(path),
            None => ConfigManager::new()?,
        };
        tracing::debug!(path = %manager.path().display(), "Loading settings");
        manager.load_with_env()
    }

    #[cfg(test)]
    pub(crate) fn from_path(path: &std::path::Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }
}
