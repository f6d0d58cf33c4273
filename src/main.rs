//! # mafood CLI
//!
//! ```bash
//! mafood --config ./config/mafood.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mafood init` | Create the SQLite database and tables |
//! | `mafood serve` | Start the REST API |
//! | `mafood pipeline scrape\|extract\|embed\|all` | Regulation pipeline steps |
//! | `mafood places [--limit-points N]` | Rebuild the restaurant dataset |
//! | `mafood ask "<question>"` | One regulation question |
//! | `mafood news [input]` | Run the news pipeline |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mafood::config::{self, Secrets};
use mafood::llm::{ChatModel, OpenAIChat};
use mafood::maps::MapsClient;
use mafood::pipeline::{run_pipeline, Step};
use mafood::places::PlacesPipeline;
use mafood::storage::S3Client;
use mafood::{db, logging, migrate, server};

/// Massachusetts restaurant lookup and food-regulation Q&A backend.
///
/// Credentials are read from the environment; everything else comes from
/// the TOML file given with `--config`.
#[derive(Parser)]
#[command(name = "mafood", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mafood.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and tables. Safe to run repeatedly.
    Init,

    /// Start the REST API on `[server].bind`.
    Serve,

    /// Run regulation pipeline steps.
    Pipeline {
        #[command(subcommand)]
        step: PipelineStep,
    },

    /// Sweep the state grid and reload `restaurant_details`.
    Places {
        /// Visit only the first N grid points.
        #[arg(long)]
        limit_points: Option<usize>,
    },

    /// Answer one question from the regulation index.
    Ask {
        question: String,
    },

    /// Run the news pipeline and print the items as JSON.
    News {
        /// Defaults to `[news].default_input`.
        input: Option<String>,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum PipelineStep {
    /// Download regulation PDFs into object storage.
    Scrape,
    /// Extract PDF text into JSON documents.
    Extract,
    /// Embed JSON documents into the vector index.
    Embed,
    /// scrape, then extract, then embed.
    All,
}

impl From<PipelineStep> for Step {
    fn from(step: PipelineStep) -> Self {
        match step {
            PipelineStep::Scrape => Step::Scrape,
            PipelineStep::Extract => Step::Extract,
            PipelineStep::Embed => Step::Embed,
            PipelineStep::All => Step::All,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg, &secrets).await?;
        }
        Commands::Pipeline { step } => {
            run_pipeline(&cfg, &secrets, step.into()).await?;
        }
        Commands::Places { limit_points } => {
            let maps = MapsClient::new(
                &cfg.endpoints,
                Secrets::get(&secrets.google_maps_api_key, "GOOGLE_MAPS_API_KEY")?,
            )?;
            let store = S3Client::new(&cfg.storage, &secrets)?;
            let pool = db::connect(&cfg).await?;
            migrate::ensure_schema(&pool).await?;

            let pipeline = PlacesPipeline {
                maps: &maps,
                store: &store,
                pool: &pool,
                config: &cfg.places,
                places_key: &cfg.storage.places_key,
            };
            let stats = pipeline.run(limit_points).await?;
            pool.close().await;

            println!("places");
            println!("  grid points: {}", stats.grid_points);
            println!("  visited: {}", stats.visited);
            println!("  restaurants loaded: {}", stats.restaurants);
        }
        Commands::Ask { question } => {
            let chat: Arc<dyn ChatModel> = Arc::new(OpenAIChat::new(
                &cfg.endpoints,
                Secrets::get(&secrets.openai_api_key, "OPENAI_API_KEY")?,
            )?);
            let regulations = server::regulation_service(&cfg, &secrets, chat).await?;
            let answer = regulations.ask(&question).await?;
            println!("{}", answer);
        }
        Commands::News { input } => {
            let news = server::news_pipeline(&cfg, &secrets)?.ok_or_else(|| {
                anyhow::anyhow!("ANTHROPIC_API_KEY and SERPAPI_API_KEY must both be set")
            })?;
            let input = input.unwrap_or_else(|| cfg.news.default_input.clone());
            let items = news.get_news(&input).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }

    Ok(())
}
