use anyhow::Result;
use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use companion_engine::{
    ChatStore, CompanionEngine, CompletionProvider, EmbeddingProvider, EngineError,
    OllamaProvider, OpenAiProvider, SqliteVectorStore,
};
use companion_schemas::{ChatRequest, ExchangeView, HistoryFilter, UserId};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, Level};

mod identity;

use identity::{Identity, IdentityStore};

#[derive(Clone)]
struct AppState {
    engine: Arc<CompanionEngine>,
    identity: Arc<IdentityStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Companion Memory Service v0.1.0");

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    std::fs::create_dir_all(&data_dir)?;

    let chat_db = format!("{}/chat.db", data_dir);
    let vector_db = format!("{}/vectors.db", data_dir);

    let store = ChatStore::new(&chat_db)?;
    let vectors = SqliteVectorStore::new(&vector_db)?;
    info!("Stores initialized under {}", data_dir);

    let identity = Arc::new(IdentityStore::new(&chat_db)?);
    if let Ok(admin_token) = std::env::var("ADMIN_TOKEN") {
        identity.ensure_admin(&admin_token)?;
    }

    let (completions, embedder) = build_providers()?;

    let engine = CompanionEngine::new(
        store,
        Box::new(vectors),
        completions,
        embedder,
        identity.clone(),
    );

    let state = AppState {
        engine: Arc::new(engine),
        identity,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        // User-facing
        .route("/chat", post(send_message))
        .route("/chat/history", get(get_history))
        .route("/chat/history", delete(clear_history))
        // Admin-facing
        .route("/admin/summary/:user_id", get(admin_summary))
        .route("/admin/chat/:user_id", get(admin_full_history))
        .route("/admin/chat/:user_id", delete(admin_delete_history))
        .route("/admin/moderation", get(admin_moderation_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:21970".to_string());
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// OpenAI when a key is configured, local Ollama otherwise.
fn build_providers() -> Result<(Arc<dyn CompletionProvider>, Arc<dyn EmbeddingProvider>)> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(api_key) => {
            let model = std::env::var("OPENAI_MODEL").ok();
            let provider = Arc::new(OpenAiProvider::new(api_key, model)?);
            info!("Using OpenAI providers");
            let completions: Arc<dyn CompletionProvider> = provider.clone();
            let embedder: Arc<dyn EmbeddingProvider> = provider;
            Ok((completions, embedder))
        }
        Err(_) => {
            let model = std::env::var("OLLAMA_MODEL").ok();
            let base_url = std::env::var("OLLAMA_URL").ok();
            let provider = Arc::new(OllamaProvider::new(model, base_url)?);
            info!("OPENAI_API_KEY not set, using Ollama providers");
            let completions: Arc<dyn CompletionProvider> = provider.clone();
            let embedder: Arc<dyn EmbeddingProvider> = provider;
            Ok((completions, embedder))
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            detail: "missing or invalid credentials".to_string(),
        }
    }

    fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "forbidden",
            detail: "admin access required".to_string(),
        }
    }

    fn bad_request(detail: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            detail,
        }
    }

    /// Engine failures map to stable codes. Provider internals are only
    /// echoed back to administrators.
    fn from_engine(err: EngineError, admin: bool) -> Self {
        let status = match &err {
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
            EngineError::VectorCleanupPending { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = match &err {
            EngineError::Provider(_) if !admin => "AI provider unavailable".to_string(),
            EngineError::Storage(_) if !admin => "internal storage error".to_string(),
            _ => err.to_string(),
        };

        Self {
            status,
            code: err.code(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.code,
            "detail": self.detail,
        }));
        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(ApiError::unauthorized)?;

    match state.identity.resolve_token(token) {
        Ok(Some(identity)) => {
            debug!(
                "Authenticated {} (admin: {})",
                identity.display_name, identity.is_admin
            );
            Ok(identity)
        }
        Ok(None) => Err(ApiError::unauthorized()),
        Err(e) => {
            error!("Identity resolution failed: {}", e);
            Err(ApiError::unauthorized())
        }
    }
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let identity = authenticate(state, headers)?;
    if !identity.is_admin {
        return Err(ApiError::forbidden());
    }
    Ok(identity)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "companion",
        "status": "healthy",
        "version": "0.1.0"
    }))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;

    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty".to_string()));
    }

    let exchange = state
        .engine
        .send_message(identity.user_id, &request.message)
        .await
        .map_err(|e| ApiError::from_engine(e, false))?;

    Ok(Json(ExchangeView::from(exchange)))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;

    let page = state
        .engine
        .get_history(
            identity.user_id,
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(|e| ApiError::from_engine(e, false))?;

    Ok(Json(page))
}

async fn clear_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;

    let deleted = state
        .engine
        .soft_delete_history(identity.user_id)
        .await
        .map_err(|e| ApiError::from_engine(e, false))?;

    Ok(Json(serde_json::json!({ "deleted_count": deleted })))
}

async fn admin_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let report = state
        .engine
        .get_summary(UserId(user_id))
        .await
        .map_err(|e| ApiError::from_engine(e, true))?;

    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
struct AdminHistoryQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    filter: Option<String>,
}

async fn admin_full_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Query(query): Query<AdminHistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let filter = match query.filter.as_deref() {
        None => HistoryFilter::All,
        Some(raw) => raw.parse().map_err(ApiError::bad_request)?,
    };

    let page = state
        .engine
        .get_full_history(
            UserId(user_id),
            query.limit.unwrap_or(100),
            query.offset.unwrap_or(0),
            filter,
        )
        .await
        .map_err(|e| ApiError::from_engine(e, true))?;

    Ok(Json(page))
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    permanent: Option<bool>,
}

async fn admin_delete_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let report = state
        .engine
        .delete_history(UserId(user_id), query.permanent.unwrap_or(false))
        .await
        .map_err(|e| ApiError::from_engine(e, true))?;

    Ok(Json(report))
}

async fn admin_moderation_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let entries = state
        .engine
        .recent_moderation_flags(query.limit.unwrap_or(100))
        .await
        .map_err(|e| ApiError::from_engine(e, true))?;

    Ok(Json(entries))
}
