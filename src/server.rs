//! REST API.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/register` | – | Create a user |
//! | `POST` | `/token` | – | Form login, returns a bearer token |
//! | `GET`  | `/protected-endpoint` | bearer | Token check |
//! | `POST` | `/ask` | – | Regulation Q&A |
//! | `GET`  | `/restaurants?zip_code=` | bearer | Restaurants near a ZIP |
//! | `POST` | `/qn_agent` | bearer | Business assistant |
//! | `GET`  | `/get_news` | – | Curated small-business news |
//! | `GET`  | `/` | – | Hello world |
//! | `GET`  | `/health` | – | Status and version |
//!
//! # Error Contract
//!
//! Every error is `{"detail": "<message>"}` with the matching status code.
//! A 401 also carries `WWW-Authenticate: Bearer`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection, QueryRejection},
        FromRequestParts, Query, State,
    },
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::{build_prompt, Assistant};
use crate::auth::{AuthError, AuthService, Registered, SqliteUserStore};
use crate::config::{Config, Secrets};
use crate::db;
use crate::embedding::OpenAIEmbedder;
use crate::llm::{AnthropicClient, ChatModel, OpenAIChat};
use crate::maps::MapsClient;
use crate::migrate::ensure_schema;
use crate::models::{NewsItem, Restaurant, User};
use crate::news::NewsPipeline;
use crate::regulations::{AskError, RegulationService};
use crate::restaurants::{LookupError, RestaurantService};
use crate::traits::{ToolContext, ToolRegistry};
use crate::vector_index::PineconeIndex;
use crate::web::{browser_client, TavilyClient};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub restaurants: Arc<RestaurantService>,
    pub regulations: Arc<RegulationService>,
    pub assistant: Arc<Assistant>,
    /// `None` when the Anthropic or SerpAPI key is missing.
    pub news: Option<Arc<NewsPipeline>>,
    pub news_input: String,
}

impl AppState {
    /// Wires every service from configuration, environment credentials and
    /// an open database pool. Resolves the vector index host up front.
    pub async fn build(
        config: &Config,
        secrets: &Secrets,
        pool: sqlx::SqlitePool,
    ) -> anyhow::Result<Self> {
        let secret = Secrets::get(&secrets.secret_key, "SECRET_KEY")?;
        let auth = AuthService::new(
            Arc::new(SqliteUserStore::new(pool)),
            secret,
            config.auth.token_ttl_minutes,
            config.auth.bcrypt_cost,
        );

        let maps = MapsClient::new(
            &config.endpoints,
            Secrets::get(&secrets.google_maps_api_key, "GOOGLE_MAPS_API_KEY")?,
        )?;
        let restaurants = Arc::new(RestaurantService::new(maps, &config.restaurants));

        let openai_key = Secrets::get(&secrets.openai_api_key, "OPENAI_API_KEY")?;
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAIChat::new(&config.endpoints, openai_key)?);
        let regulations = Arc::new(regulation_service(config, secrets, chat.clone()).await?);

        let tavily = match &secrets.tavily_api_key {
            Some(key) => Some(Arc::new(TavilyClient::new(&config.endpoints, key.clone())?)),
            None => {
                tracing::warn!("TAVILY_API_KEY not set; web_search tool will report an error");
                None
            }
        };
        let ctx = ToolContext {
            regulations: regulations.clone(),
            restaurants: restaurants.clone(),
            tavily,
            browser: browser_client(Duration::from_secs(config.endpoints.timeout_secs))?,
        };
        let assistant = Arc::new(Assistant::new(
            chat,
            Arc::new(ToolRegistry::with_builtins()),
            Arc::new(ctx),
            config.models.agent.clone(),
            config.agent.clone(),
        ));

        let news = news_pipeline(config, secrets)?.map(Arc::new);
        if news.is_none() {
            tracing::warn!("ANTHROPIC_API_KEY or SERPAPI_API_KEY not set; /get_news disabled");
        }

        Ok(Self {
            auth,
            restaurants,
            regulations,
            assistant,
            news,
            news_input: config.news.default_input.clone(),
        })
    }
}

/// Regulation Q&A over the hosted index, using `chat` for answers.
pub async fn regulation_service(
    config: &Config,
    secrets: &Secrets,
    chat: Arc<dyn ChatModel>,
) -> anyhow::Result<RegulationService> {
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
    .await
    .with_context(|| format!("Failed to open vector index {}", index_name))?;

    Ok(RegulationService::new(
        Arc::new(embedder),
        Arc::new(index),
        chat,
        config.models.chat.clone(),
        config.vector_index.top_k,
    ))
}

/// News pipeline, or `None` without both the Anthropic and SerpAPI keys.
pub fn news_pipeline(config: &Config, secrets: &Secrets) -> anyhow::Result<Option<NewsPipeline>> {
    let (Some(anthropic_key), Some(serpapi_key)) =
        (&secrets.anthropic_api_key, &secrets.serpapi_api_key)
    else {
        return Ok(None);
    };
    let llm = AnthropicClient::new(&config.endpoints, &config.models, anthropic_key.clone())?;
    Ok(Some(NewsPipeline::new(
        Arc::new(llm),
        &config.endpoints,
        &config.news,
        serpapi_key.clone(),
    )?))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/register", post(handle_register))
        .route("/token", post(handle_token))
        .route("/protected-endpoint", get(handle_protected))
        .route("/ask", post(handle_ask))
        .route("/restaurants", get(handle_restaurants))
        .route("/qn_agent", post(handle_qn_agent))
        .route("/get_news", get(handle_get_news))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `[server].bind` and serves until the process is stopped.
pub async fn run_server(config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
    secrets.require_api()?;

    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    let state = AppState::build(config, secrets, pool).await?;
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    println!("mafood API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                detail: self.detail,
            }),
        )
            .into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UserExists | AuthError::InvalidCredentials => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            AuthError::CouldNotValidate => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            AuthError::Internal(e) => {
                tracing::error!(error = %e, "auth failure");
                Self::internal(e)
            }
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            LookupError::Upstream(e) => Self::internal(e),
        }
    }
}

impl From<AskError> for ApiError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::NoMatches => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            AskError::Failed(e) => Self::internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

// ============ Bearer auth ============

/// The authenticated caller, resolved from `Authorization: Bearer <jwt>`.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                let (scheme, token) = v.split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
            })
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Not authenticated"))?;

        let user = state.auth.current_user(token).await?;
        Ok(CurrentUser(user))
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "Hello": "World" }))
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn handle_register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<Registered>, ApiError> {
    let Json(creds) = payload?;
    let registered = state.auth.register(&creds.username, &creds.password).await?;
    Ok(Json(registered))
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

async fn handle_token(
    State(state): State<AppState>,
    form: Result<Form<Credentials>, FormRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Form(creds) = form?;
    let access_token = state.auth.login(&creds.username, &creds.password).await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_protected(CurrentUser(user): CurrentUser) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: format!("Hello, {}. You are authenticated!", user.username),
    })
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AnswerResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Json(req) = payload?;
    let answer = state.regulations.ask(&req.question).await?;
    Ok(Json(AnswerResponse { answer }))
}

#[derive(Deserialize)]
struct ZipQuery {
    zip_code: String,
}

#[derive(Serialize)]
struct RestaurantsResponse {
    restaurants: Vec<Restaurant>,
}

async fn handle_restaurants(
    State(state): State<AppState>,
    _user: CurrentUser,
    query: Result<Query<ZipQuery>, QueryRejection>,
) -> Result<Json<RestaurantsResponse>, ApiError> {
    let Query(q) = query?;
    let restaurants = state.restaurants.lookup(&q.zip_code).await?;
    Ok(Json(RestaurantsResponse {
        restaurants: restaurants.as_ref().clone(),
    }))
}

#[derive(Deserialize)]
struct QnRequest {
    question: String,
    #[serde(default)]
    restaurants_data: Vec<Restaurant>,
    zip_code: String,
}

async fn handle_qn_agent(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<QnRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Json(req) = payload?;
    tracing::info!(username = %user.username, zip = %req.zip_code, "assistant request");
    let prompt = build_prompt(&req.zip_code, &req.restaurants_data, &req.question);
    let answer = state.assistant.run(&prompt).await.map_err(|e| {
        tracing::error!(error = %e, "assistant failed");
        ApiError::internal(e)
    })?;
    Ok(Json(AnswerResponse { answer }))
}

async fn handle_get_news(State(state): State<AppState>) -> Result<Json<Vec<NewsItem>>, ApiError> {
    let news = state
        .news
        .as_ref()
        .ok_or_else(|| ApiError::internal("News is not configured"))?;
    let items = news
        .get_news(&state.news_input)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unauthorized_carries_bearer_challenge() {
        let response = ApiError::from(AuthError::CouldNotValidate).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Could not validate credentials");
    }

    #[test]
    fn error_statuses() {
        assert_eq!(ApiError::from(AuthError::UserExists).status, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(LookupError::NotFound).status, StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(AskError::NoMatches).status, StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(AskError::Failed(anyhow::anyhow!("boom"))).detail,
            "boom"
        );
    }
}
