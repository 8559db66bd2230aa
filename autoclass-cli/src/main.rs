//! AutoClass CLI: search architectures and hyperparameters for an image
//! folder, then predict with the winning model.

mod commands;

use autoclass_core::SearchStrategy;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// AutoClass: automated image-classification search
#[derive(Parser, Debug)]
#[command(name = "autoclass", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.autoclass/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a search over a local directory or a zip archive URL
    Fit(FitArgs),
    /// Predict classes for images with a finished run
    Predict {
        /// Run directory produced by `fit`
        run_dir: PathBuf,
        /// Image files, in output order
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Print the full class probability vector per image
        #[arg(long)]
        proba: bool,
        /// Emit JSON instead of tab-separated rows
        #[arg(long)]
        json: bool,
    },
    /// Show the summary of a run
    Summary {
        run_dir: PathBuf,
        /// Emit the full summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct FitArgs {
    /// Dataset directory or http(s) URL of a zip archive
    dataset: String,
    /// Candidate architecture (repeatable)
    #[arg(short = 'a', long = "arch")]
    architectures: Vec<String>,
    #[arg(long)]
    epochs: Option<usize>,
    /// Wall-clock budget for the whole search, in seconds
    #[arg(long)]
    time_limit: Option<f64>,
    #[arg(long)]
    num_trials: Option<usize>,
    /// grid or random
    #[arg(long)]
    strategy: Option<SearchStrategy>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    ngpus_per_trial: Option<usize>,
    #[arg(long)]
    total_gpus: Option<usize>,
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Directory that receives the run directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Skip accuracy on the dataset's `test/` split after fitting
    #[arg(long)]
    no_eval: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to `.autoclass/config.toml`
    Init,
    /// Print the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "autoclass", "autoclass")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "autoclass.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
