use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use greatpush_core::{InstallMode, UpdateState};
use tracing::Level;

mod completion;
mod dispatch;
mod host;
mod render;
mod transport;

use completion::CliCompletionShell;

#[derive(Parser, Debug)]
#[command(name = "greatpush")]
#[command(about = "Local over-the-air update manager for bundle-based apps", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = "greatpush.toml")]
    config: PathBuf,
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the ledger, pending record and failed updates.
    Status,
    /// Print the configuration reported to the update server.
    Config,
    Download {
        /// An http(s) URL, a file:// URL or a local path.
        source: String,
        #[arg(long)]
        hash: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        app_version: Option<String>,
        #[arg(long)]
        mandatory: bool,
        #[arg(long)]
        progress: bool,
    },
    Install {
        hash: String,
        #[arg(long, value_enum, default_value_t = CliInstallMode::OnNextRestart)]
        mode: CliInstallMode,
        #[arg(long, default_value_t = 0)]
        min_background_secs: u64,
    },
    /// Confirm that the running update booted successfully.
    Ready,
    Restart {
        #[arg(long)]
        only_if_pending: bool,
    },
    /// Simulate a process start and report the bundle that would boot.
    Start,
    Metadata {
        #[arg(long, value_enum, default_value_t = CliUpdateState::Running)]
        state: CliUpdateState,
    },
    IsFailed {
        hash: String,
    },
    FirstRun {
        hash: String,
    },
    Rollback,
    Clear,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliInstallMode {
    Immediate,
    OnNextRestart,
    OnNextResume,
    OnNextSuspend,
}

impl From<CliInstallMode> for InstallMode {
    fn from(value: CliInstallMode) -> Self {
        match value {
            CliInstallMode::Immediate => Self::Immediate,
            CliInstallMode::OnNextRestart => Self::OnNextRestart,
            CliInstallMode::OnNextResume => Self::OnNextResume,
            CliInstallMode::OnNextSuspend => Self::OnNextSuspend,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliUpdateState {
    Running,
    Pending,
    Latest,
}

impl From<CliUpdateState> for UpdateState {
    fn from(value: CliUpdateState) -> Self {
        match value {
            CliUpdateState::Running => Self::Running,
            CliUpdateState::Pending => Self::Pending,
            CliUpdateState::Latest => Self::Latest,
        }
    }
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(log_level(verbose, quiet))
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    dispatch::run_cli(cli)
}
