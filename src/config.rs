//! TOML configuration and environment-provided credentials.
//!
//! Non-secret settings (bind address, database path, model names, pipeline
//! tuning, third-party base URLs) live in a TOML file. Credentials are only
//! ever read from the environment through [`Secrets::from_env`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub restaurants: RestaurantsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub places: PlacesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_minutes: default_token_ttl_minutes(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_token_ttl_minutes() -> i64 {
    60
}
fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

/// Base URLs of every third-party service. Overridable so tests can point
/// the clients at local mock servers.
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    #[serde(default = "default_openai")]
    pub openai: String,
    #[serde(default = "default_anthropic")]
    pub anthropic: String,
    #[serde(default = "default_pinecone_control")]
    pub pinecone_control: String,
    #[serde(default = "default_google_maps")]
    pub google_maps: String,
    #[serde(default = "default_tavily")]
    pub tavily: String,
    #[serde(default = "default_serpapi")]
    pub serpapi: String,
    #[serde(default = "default_webdriver")]
    pub webdriver: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            openai: default_openai(),
            anthropic: default_anthropic(),
            pinecone_control: default_pinecone_control(),
            google_maps: default_google_maps(),
            tavily: default_tavily(),
            serpapi: default_serpapi(),
            webdriver: default_webdriver(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openai() -> String {
    "https://api.openai.com".to_string()
}
fn default_anthropic() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_pinecone_control() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_google_maps() -> String {
    "https://maps.googleapis.com".to_string()
}
fn default_tavily() -> String {
    "https://api.tavily.com".to_string()
}
fn default_serpapi() -> String {
    "https://serpapi.com".to_string()
}
fn default_webdriver() -> String {
    "http://localhost:9515".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding: String,
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_agent_model")]
    pub agent: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic: String,
    #[serde(default = "default_anthropic_max_tokens")]
    pub anthropic_max_tokens: u32,
    /// Retries for the embeddings endpoint. Zero means a single attempt.
    #[serde(default)]
    pub embedding_max_retries: u32,
    #[serde(default = "default_anthropic_attempts")]
    pub anthropic_attempts: u32,
    #[serde(default = "default_backoff_min_secs")]
    pub anthropic_backoff_min_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub anthropic_backoff_max_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding: default_embedding_model(),
            chat: default_chat_model(),
            agent: default_agent_model(),
            anthropic: default_anthropic_model(),
            anthropic_max_tokens: default_anthropic_max_tokens(),
            embedding_max_retries: 0,
            anthropic_attempts: default_anthropic_attempts(),
            anthropic_backoff_min_secs: default_backoff_min_secs(),
            anthropic_backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_chat_model() -> String {
    "gpt-4".to_string()
}
fn default_agent_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_anthropic_model() -> String {
    "claude-3-opus-20240229".to_string()
}
fn default_anthropic_max_tokens() -> u32 {
    1024
}
fn default_anthropic_attempts() -> u32 {
    3
}
fn default_backoff_min_secs() -> u64 {
    4
}
fn default_backoff_max_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorIndexConfig {
    /// Data-plane host. When unset it is resolved from the control plane.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_index_region")]
    pub region: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            host: None,
            dimension: default_dimension(),
            metric: default_metric(),
            cloud: default_cloud(),
            region: default_index_region(),
            top_k: default_top_k(),
            create_if_missing: true,
        }
    }
}

fn default_dimension() -> usize {
    1536
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_index_region() -> String {
    "us-east-1".to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RestaurantsConfig {
    /// Five miles.
    #[serde(default = "default_radius_meters")]
    pub radius_meters: u32,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for RestaurantsConfig {
    fn default() -> Self {
        Self {
            radius_meters: default_radius_meters(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_radius_meters() -> u32 {
    8047
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_cache_capacity() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_execution_secs")]
    pub max_execution_secs: u64,
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_execution_secs: default_max_execution_secs(),
            max_tokens: default_agent_max_tokens(),
            temperature: 0.0,
        }
    }
}

fn default_max_iterations() -> usize {
    10
}
fn default_max_execution_secs() -> u64 {
    120
}
fn default_agent_max_tokens() -> u32 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    #[serde(default = "default_news_input")]
    pub default_input: String,
    #[serde(default = "default_news_topic")]
    pub fallback_topic: String,
    #[serde(default = "default_results_per_topic")]
    pub results_per_topic: u32,
    #[serde(default = "default_news_location")]
    pub location: String,
    #[serde(default = "default_time_window")]
    pub time_window: String,
    #[serde(default = "default_link_timeout_secs")]
    pub link_timeout_secs: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            default_input: default_news_input(),
            fallback_topic: default_news_topic(),
            results_per_topic: default_results_per_topic(),
            location: default_news_location(),
            time_window: default_time_window(),
            link_timeout_secs: default_link_timeout_secs(),
        }
    }
}

fn default_news_input() -> String {
    "Find the latest trends in small business technology.".to_string()
}
fn default_news_topic() -> String {
    "Latest small business news for food business owners in massachusetts".to_string()
}
fn default_results_per_topic() -> u32 {
    20
}
fn default_news_location() -> String {
    "Massachusetts, United States".to_string()
}
fn default_time_window() -> String {
    "qdr:w".to_string()
}
fn default_link_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_storage_region")]
    pub region: String,
    /// S3-compatible endpoint (MinIO, LocalStack). Uses path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_regulations_prefix")]
    pub regulations_prefix: String,
    #[serde(default = "default_parsed_prefix")]
    pub parsed_prefix: String,
    #[serde(default = "default_places_key")]
    pub places_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_storage_region(),
            endpoint_url: None,
            regulations_prefix: default_regulations_prefix(),
            parsed_prefix: default_parsed_prefix(),
            places_key: default_places_key(),
        }
    }
}

fn default_storage_region() -> String {
    "us-east-2".to_string()
}
fn default_regulations_prefix() -> String {
    "regulations/".to_string()
}
fn default_parsed_prefix() -> String {
    "parsed_pdfs/".to_string()
}
fn default_places_key() -> String {
    "data/massachusetts_restaurants.csv".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    /// Search URL with a `{}` placeholder for the page number.
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
    #[serde(default = "default_page_increment")]
    pub page_increment: u32,
    #[serde(default = "default_page_load_ms")]
    pub page_load_ms: u64,
    #[serde(default = "default_detail_load_ms")]
    pub detail_load_ms: u64,
    #[serde(default = "default_page_load_ms")]
    pub back_ms: u64,
    #[serde(default = "default_result_selector")]
    pub result_selector: String,
    #[serde(default = "default_download_selector")]
    pub download_selector: String,
    #[serde(default = "default_browser_args")]
    pub browser_args: Vec<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            total_pages: default_total_pages(),
            page_increment: default_page_increment(),
            page_load_ms: default_page_load_ms(),
            detail_load_ms: default_detail_load_ms(),
            back_ms: default_page_load_ms(),
            result_selector: default_result_selector(),
            download_selector: default_download_selector(),
            browser_args: default_browser_args(),
        }
    }
}

fn default_search_url() -> String {
    "https://search.mass.gov/laws-regulations?page={}&q=Food%20Establishments".to_string()
}
fn default_total_pages() -> u32 {
    10
}
fn default_page_increment() -> u32 {
    10
}
fn default_page_load_ms() -> u64 {
    3000
}
fn default_detail_load_ms() -> u64 {
    2000
}
fn default_result_selector() -> String {
    "a[data-result-type='result']".to_string()
}
fn default_download_selector() -> String {
    "a.ma__download-link__file-link".to_string()
}
fn default_browser_args() -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_tokens: default_max_tokens(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    8192
}
fn default_max_tokens() -> usize {
    8192
}
fn default_preview_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlacesConfig {
    #[serde(default = "default_min_lat")]
    pub min_lat: f64,
    #[serde(default = "default_max_lat")]
    pub max_lat: f64,
    #[serde(default = "default_min_lng")]
    pub min_lng: f64,
    #[serde(default = "default_max_lng")]
    pub max_lng: f64,
    /// Roughly 2 km.
    #[serde(default = "default_grid_step")]
    pub grid_step: f64,
    #[serde(default = "default_places_radius")]
    pub radius_meters: u32,
    #[serde(default = "default_point_delay_ms")]
    pub point_delay_ms: u64,
    #[serde(default = "default_page_token_delay_ms")]
    pub page_token_delay_ms: u64,
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            min_lat: default_min_lat(),
            max_lat: default_max_lat(),
            min_lng: default_min_lng(),
            max_lng: default_max_lng(),
            grid_step: default_grid_step(),
            radius_meters: default_places_radius(),
            point_delay_ms: default_point_delay_ms(),
            page_token_delay_ms: default_page_token_delay_ms(),
            local_dir: default_local_dir(),
        }
    }
}

fn default_min_lat() -> f64 {
    41.0
}
fn default_max_lat() -> f64 {
    42.9
}
fn default_min_lng() -> f64 {
    -73.5
}
fn default_max_lng() -> f64 {
    -69.9
}
fn default_grid_step() -> f64 {
    0.02
}
fn default_places_radius() -> u32 {
    1500
}
fn default_point_delay_ms() -> u64 {
    1000
}
fn default_page_token_delay_ms() -> u64 {
    2000
}
fn default_local_dir() -> PathBuf {
    PathBuf::from("./data/stage")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.auth.token_ttl_minutes <= 0 {
        anyhow::bail!("auth.token_ttl_minutes must be > 0");
    }
    if !(4..=31).contains(&config.auth.bcrypt_cost) {
        anyhow::bail!("auth.bcrypt_cost must be in [4, 31]");
    }
    if config.vector_index.top_k < 1 {
        anyhow::bail!("vector_index.top_k must be >= 1");
    }
    if config.vector_index.dimension == 0 {
        anyhow::bail!("vector_index.dimension must be > 0");
    }
    if config.embedding.max_chars == 0 {
        anyhow::bail!("embedding.max_chars must be > 0");
    }
    if config.embedding.max_tokens == 0 {
        anyhow::bail!("embedding.max_tokens must be > 0");
    }
    if config.places.grid_step <= 0.0 {
        anyhow::bail!("places.grid_step must be > 0");
    }
    if config.places.min_lat > config.places.max_lat
        || config.places.min_lng > config.places.max_lng
    {
        anyhow::bail!("places bounds are inverted");
    }
    if config.scraper.page_increment == 0 {
        anyhow::bail!("scraper.page_increment must be > 0");
    }
    if !config.scraper.search_url.contains("{}") {
        anyhow::bail!("scraper.search_url must contain a '{{}}' page placeholder");
    }
    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }
    if config.models.anthropic_attempts == 0 {
        anyhow::bail!("models.anthropic_attempts must be >= 1");
    }
    Ok(())
}

/// Credentials read from the process environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub secret_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_name: Option<String>,
    pub google_maps_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub serpapi_api_key: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("pinecone_index_name", &self.pinecone_index_name)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            secret_key: var("SECRET_KEY"),
            openai_api_key: var("OPENAI_API_KEY"),
            pinecone_api_key: var("PINECONE_API_KEY"),
            pinecone_index_name: var("PINECONE_INDEX_NAME"),
            google_maps_api_key: var("GOOGLE_MAPS_API_KEY"),
            tavily_api_key: var("TAVILY_API_KEY"),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            serpapi_api_key: var("SERPAPI_API_KEY"),
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            aws_session_token: var("AWS_SESSION_TOKEN"),
        }
    }

    /// Fails when a credential the API server cannot start without is missing.
    pub fn require_api(&self) -> Result<()> {
        let required = [
            ("SECRET_KEY", &self.secret_key),
            ("GOOGLE_MAPS_API_KEY", &self.google_maps_api_key),
            ("PINECONE_API_KEY", &self.pinecone_api_key),
            ("PINECONE_INDEX_NAME", &self.pinecone_index_name),
            ("OPENAI_API_KEY", &self.openai_api_key),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }
        Ok(())
    }

    pub fn get(value: &Option<String>, name: &str) -> Result<String> {
        value
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", name))
    }
}
