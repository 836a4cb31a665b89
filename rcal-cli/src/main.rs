use anyhow::Result;
use clap::{Parser, Subcommand};
use rcal_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "rcal")]
#[command(about = "Release tooling for the rcalendar service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the release image and apply the full tag set
    Build {
        /// Version to release (overrides the configured version)
        #[arg(short, long)]
        version: Option<String>,

        /// Generate API documentation after a successful build
        #[arg(long)]
        with_docs: bool,
    },

    /// List registered images
    Images,

    /// List tag bindings
    Tags,

    /// Validate the release configuration without building
    Validate,

    /// Generate API documentation
    Docs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    rcal_core::init_observability(&config.log_level)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    match cli.command {
        Commands::Build { version, with_docs } => {
            if let Some(version) = version {
                config.version = version;
            }
            commands::build(&config, with_docs).await?;
        }

        Commands::Images => {
            commands::images(&config).await?;
        }

        Commands::Tags => {
            commands::tags(&config).await?;
        }

        Commands::Validate => {
            commands::validate(&config)?;
        }

        Commands::Docs => {
            commands::docs(&config)?;
        }
    }

    Ok(())
}
