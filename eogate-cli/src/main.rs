//! EOGate CLI - search and download Earth-observation products.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eogate::config::config_file_path;

use commands::common::{OutputFormat, SearchArgs};
use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "eogate")]
#[command(version, about = "Search and download Earth-observation products from many providers", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.eogate/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known product types
    ProductTypes {
        /// Only types this provider offers
        #[arg(short, long)]
        provider: Option<String>,

        /// Ask providers for product types not in the built-in catalog
        #[arg(long)]
        fetch: bool,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// List providers in priority order
    Providers {
        /// Only providers offering this product type
        #[arg(short = 't', long)]
        product_type: Option<String>,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Search for products
    Search {
        #[command(flatten)]
        args: SearchArgs,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Search, then download every product found
    Download(DownloadArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        e.exit();
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = cli.config;
    let runner = || CliRunner::new(config.as_deref(), cli.debug, cli.verbose);
    match cli.command {
        Commands::ProductTypes {
            provider,
            fetch,
            format,
        } => commands::product_types::run(provider, fetch, format, runner()?),
        Commands::Providers {
            product_type,
            format,
        } => commands::providers::run(product_type, format, runner()?),
        Commands::Search { args, format } => commands::search::run(args, format, runner()?),
        Commands::Download(args) => commands::download::run(args, runner()?),
        // Works without logging so a broken config file can be replaced.
        Commands::Config { command } => {
            let path = config.clone().unwrap_or_else(config_file_path);
            commands::config::run(command, &path)
        }
    }
}
