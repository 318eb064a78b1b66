mod backend;
mod commands;
mod context;
mod output;

use clap::{Parser, Subcommand};
use cloudops_core::CancellationToken;
use colored::Colorize;

#[derive(Parser)]
#[command(name = "cloudops")]
#[command(about = "Manage instances, functions, buckets and objects", long_about = None)]
struct Cli {
    /// Region (overrides config and CLOUDOPS_REGION)
    #[arg(long, global = true)]
    region: Option<String>,
    /// API endpoint; `memory://` runs against an in-process backend
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute instances
    #[command(subcommand)]
    Instance(commands::instance::InstanceCommands),
    /// Serverless functions
    #[command(subcommand)]
    Function(commands::function::FunctionCommands),
    /// Storage buckets
    #[command(subcommand)]
    Bucket(commands::bucket::BucketCommands),
    /// Objects inside a bucket
    #[command(subcommand)]
    Object(commands::object::ObjectCommands),
    /// Show version
    Version,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if matches!(cli.command, Commands::Version) {
        println!("cloudops {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = cloudops_config::load()?;
    if let Some(region) = cli.region {
        config.region = region;
    }
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    config.validate()?;
    tracing::debug!(region = %config.region, endpoint = %config.endpoint, "configuration loaded");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received, cancelling...".yellow());
            trigger.cancel();
        }
    });

    let transport = backend::build_transport(&config)?;
    let ctx = context::Context::new(config, transport, cli.json, cancel);

    match cli.command {
        Commands::Instance(cmd) => commands::instance::handle(&ctx, cmd).await,
        Commands::Function(cmd) => commands::function::handle(&ctx, cmd).await,
        Commands::Bucket(cmd) => commands::bucket::handle(&ctx, cmd).await,
        Commands::Object(cmd) => commands::object::handle(&ctx, cmd).await,
        Commands::Version => Ok(()),
    }
}
