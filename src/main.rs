//! Lakestack CLI — compile lakehouse stacks into provisioning documents.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lakestack",
    version,
    about = "Resource graph compiler — lakehouse stacks to Pulumi and Terraform documents"
)]
struct Cli {
    /// Log compilation stages to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: lakestack::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "lakestack=debug" } else { "lakestack=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = lakestack::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
