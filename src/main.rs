use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod env;
mod error;
mod lookup;
mod settings;
mod stack;
mod template;

use cli::context::ContextCommands;
use lookup::context::DEFAULT_CONTEXT_FILE;
use template::Format;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory with stack.toml / local.toml overrides
    #[arg(long, global = true, env = "STACK_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// File caching VPC and account lookups
    #[arg(long, global = true, default_value = DEFAULT_CONTEXT_FILE)]
    context: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize the CloudFormation template
    Synth {
        /// Template format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        /// Directory the template is written to
        #[arg(long, short, default_value = "cdk.out")]
        output_dir: PathBuf,
        /// Print the template instead of writing it to a file
        #[arg(long, conflicts_with = "output_dir")]
        stdout: bool,
    },
    /// Check credentials and settings for errors and unused options
    CheckConfig,
    /// Show resources in deployment order with their dependencies
    #[command(visible_alias = "deps")]
    Graph,
    /// Inspect or clear cached lookups
    #[command(subcommand)]
    Context(ContextCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `synth --stdout` can be piped
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_dir = cli.config_dir.as_deref();

    match cli.command {
        Commands::Synth {
            format,
            output_dir,
            stdout,
        } => {
            cli::synth::handle_synth(config_dir, &cli.context, format, &output_dir, stdout).await
        }
        Commands::CheckConfig => cli::check::handle_check_config(config_dir),
        Commands::Graph => cli::graph::handle_graph(config_dir, &cli.context).await,
        Commands::Context(cmd) => cli::context::handle_context_command(cmd, &cli.context),
    }
}
