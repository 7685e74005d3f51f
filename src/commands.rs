use anyhow::{Context, Result};
use tracing::info;

use crate::config::{Config, get_config_dir};
use crate::confluence::ConfluenceClient;
use crate::database::lancedb::VectorStore;
use crate::enrich::KeywordEnricher;
use crate::ingest::{ConfluenceSource, Ingestor};
use crate::llm::LlmClient;
use crate::server::{self, AppState};

fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    Config::load(config_dir)
}

/// Start the HTTP chat and ingestion server
#[inline]
pub async fn serve() -> Result<()> {
    let config = load_config()?;
    let state = AppState::from_config(&config)
        .await
        .context("Failed to initialize application state")?;

    server::serve(&config, state).await
}

/// Run ingestion from the command line, for the whole configured space
/// or a single document
#[inline]
pub async fn ingest(document_id: Option<String>) -> Result<()> {
    let config = load_config()?;

    let llm = LlmClient::new(&config)?;
    let confluence = ConfluenceClient::new(&config)?;
    let source = ConfluenceSource::new(
        confluence,
        config.confluence.base_url.clone(),
        config.confluence.space_key.clone(),
    );
    let enricher = config
        .ingestion
        .enrich_keywords
        .then(|| KeywordEnricher::new(llm.clone(), config.ingestion.keyword_count));
    let ingestor = Ingestor::new(
        source,
        llm,
        enricher,
        config.chunking.clone(),
        config.ingestion.page_size,
    );

    let mut store = VectorStore::new(&config.vector_database_path()).await?;

    match document_id {
        Some(document_id) => {
            let chunks = ingestor.ingest_document(&mut store, &document_id).await?;
            println!("Ingested document {document_id}: {chunks} chunks");
        }
        None => {
            let report = ingestor.ingest_all(&mut store).await?;
            println!(
                "Ingested {} documents ({} chunks, {} failures)",
                report.documents, report.chunks, report.failures
            );
        }
    }

    Ok(())
}

/// Print the active configuration as TOML. Secrets are never part of the
/// serialized form.
#[inline]
pub fn show_config() -> Result<()> {
    let config = load_config()?;
    let rendered =
        toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("Configuration directory: {}", config.base_dir.display());
    println!();
    print!("{rendered}");
    Ok(())
}

/// Write a default configuration file if none exists yet
#[inline]
pub fn init_config() -> Result<()> {
    let config_dir = get_config_dir()?;
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!("Configuration already exists at {}", config_path.display());
        return Ok(());
    }

    let config = Config::load(&config_dir)?;
    config.save()?;
    info!("Wrote default configuration");
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}
