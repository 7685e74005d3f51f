use clap::{Parser, Subcommand};
use confluence_rag::Result;
use confluence_rag::commands::{ingest, init_config, serve, show_config};

#[derive(Parser, Debug)]
#[command(name = "confluence-rag")]
#[command(about = "RAG chat service over Confluence content")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest Confluence content into the vector store
    Ingest {
        /// Ingest a single document instead of the whole space
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Start the HTTP chat server
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                init_config()?;
            }
        }
        Commands::Ingest { document_id } => {
            ingest(document_id).await?;
        }
        Commands::Serve => {
            serve().await?;
        }
    }

    Ok(())
}
