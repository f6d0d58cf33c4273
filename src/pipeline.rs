//! `mafood pipeline`: scrape → extract → embed.
//!
//! Each step builds the clients it needs from config and environment,
//! runs, and prints a short summary. `all` runs the steps in order and
//! stops at the first one that fails.

use anyhow::Result;
use std::time::Duration;

use crate::config::{Config, Secrets};
use crate::embed::embed_parsed_documents;
use crate::embedding::OpenAIEmbedder;
use crate::extract::extract_text_from_pdfs;
use crate::scraper::RegulationScraper;
use crate::storage::S3Client;
use crate::vector_index::PineconeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Scrape,
    Extract,
    Embed,
    All,
}

pub async fn run_pipeline(config: &Config, secrets: &Secrets, step: Step) -> Result<()> {
    match step {
        Step::Scrape => run_scrape(config, secrets).await,
        Step::Extract => run_extract(config, secrets).await,
        Step::Embed => run_embed(config, secrets).await,
        Step::All => {
            run_scrape(config, secrets).await?;
            run_extract(config, secrets).await?;
            run_embed(config, secrets).await
        }
    }
}

pub async fn run_scrape(config: &Config, secrets: &Secrets) -> Result<()> {
    let store = S3Client::new(&config.storage, secrets)?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.endpoints.timeout_secs))
        .build()?;
    let scraper = RegulationScraper {
        config: &config.scraper,
        store: &store,
        http,
        prefix: &config.storage.regulations_prefix,
    };

    let stats = scraper
        .run(
            &config.endpoints.webdriver,
            Duration::from_secs(config.endpoints.timeout_secs),
        )
        .await?;

    println!("pipeline scrape");
    println!("  search pages: {}", stats.pages);
    println!("  PDFs downloaded: {}", stats.downloaded);
    println!("  pages printed: {}", stats.printed);
    println!("  failed: {}", stats.failed);
    Ok(())
}

pub async fn run_extract(config: &Config, secrets: &Secrets) -> Result<()> {
    let store = S3Client::new(&config.storage, secrets)?;
    let stats = extract_text_from_pdfs(
        &store,
        &config.storage.regulations_prefix,
        &config.storage.parsed_prefix,
    )
    .await?;

    println!("pipeline extract");
    println!("  PDFs found: {}", stats.found);
    println!("  JSON written: {}", stats.written);
    println!("  failed: {}", stats.failed);
    Ok(())
}

pub async fn run_embed(config: &Config, secrets: &Secrets) -> Result<()> {
    let store = S3Client::new(&config.storage, secrets)?;
    let embedder = OpenAIEmbedder::new(
        &config.endpoints,
        &config.models,
        Secrets::get(&secrets.openai_api_key, "OPENAI_API_KEY")?,
    )?;
    let index_name = Secrets::get(&secrets.pinecone_index_name, "PINECONE_INDEX_NAME")?;
    let index = PineconeIndex::ensure_index(
        &config.endpoints,
        &config.vector_index,
        Secrets::get(&secrets.pinecone_api_key, "PINECONE_API_KEY")?,
        &index_name,
    )
    .await?;

    let stats = embed_parsed_documents(
        &store,
        &embedder,
        &index,
        &config.storage.parsed_prefix,
        &config.embedding,
    )
    .await?;

    println!("pipeline embed");
    println!("  documents found: {}", stats.found);
    println!("  embedded: {}", stats.embedded);
    println!("  skipped: {}", stats.skipped);
    Ok(())
}
