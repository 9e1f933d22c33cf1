//! Ferry - package distribution for endpoint-management platforms
//!
//! Usage:
//!   ferry publish ./Firefox-128.pkg --config ferry.toml
//!   ferry publish ./bar.app --name "Bar" --replace --format json

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::prelude::*;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Publish packages to an endpoint-management platform", long_about = None)]
struct Cli {
    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Distribute a package artifact and reconcile its metadata record
    Publish {
        /// Path to the package file or bundle directory
        artifact: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long, default_value = "ferry.toml")]
        config: PathBuf,

        /// Display name shown on the platform (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Replace the package binary if it already exists
        #[arg(long)]
        replace: bool,

        /// Force a metadata-only update even when nothing was uploaded
        #[arg(long)]
        replace_metadata: bool,

        /// Skip the metadata record entirely
        #[arg(long)]
        skip_metadata: bool,

        /// Request an inventory recalculation after a metadata update
        #[arg(long)]
        recalculate: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "ferry_core=info,ferry_cli=info",
        1 => "ferry_core=debug,ferry_cli=debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Publish {
            artifact,
            config,
            name,
            replace,
            replace_metadata,
            skip_metadata,
            recalculate,
            format,
        } => {
            let mut run_config = load_run_config(&config)?;
            debug!(config = %config.display(), server = %run_config.base_url(), "loaded configuration");
            // Env, then CLI flags, layer over the file; all strict booleans.
            apply_env_overrides(&mut run_config, |name| std::env::var(name).ok())?;
            run_config.replace_package |= replace;
            run_config.replace_metadata |= replace_metadata;
            run_config.skip_metadata_upload |= skip_metadata;
            run_config.recalculate_after_upload |= recalculate;

            let artifact = Artifact::from_path(artifact, name)?;

            let credentials = Credentials::from_config(&run_config.auth)?;
            let transport = HttpTransport::new(run_config.base_url(), credentials)?;
            transport.acquire_token().await?;
            let store = S3ObjectStore;

            let orchestrator = DistributionOrchestrator::new(&run_config, &transport, &store);
            let report = orchestrator.run(&artifact).await?;

            render(&report, format)?;
            Ok(())
        }
    }
}

fn render(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            let summary = &report.summary;
            println!("package:          {}", summary.file_name);
            println!("display name:     {}", summary.display_name);
            if let Some(category) = &summary.category {
                println!("category:         {category}");
            }
            println!("platform version: {}", summary.platform_version);
            println!("uploaded:         {}", summary.uploaded);
            println!("metadata updated: {}", summary.metadata_updated);
            println!("recalculated:     {}", summary.recalculated);
        }
    }
    Ok(())
}
