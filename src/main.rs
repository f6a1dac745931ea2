mod adapters;
mod controller;
mod credentials;
mod http;
mod idempotency;
mod items;
mod jobs;
mod metrics;
mod models;
mod oracle;
mod orchestrator;
mod preflight;
mod registry;
mod security;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use controller::{ControllerError, ListNowOutcome, SmartListingController, SubmitHandler};
use credentials::CredentialSet;
use items::{ItemStore, ItemStoreError, MemoryItemStore};
use jobs::{BulkOp, JobQueue};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, InventoryItem, Marketplace, PreflightResult, ValidationIssue};
use oracle::{FillOracle, oracle_from_env};
use orchestrator::{
    BulkReport, CrosslistReport, DelistReport, ListOptions, NOT_CONNECTED, Orchestrator,
    OrchestratorError, SyncReport,
};
use preflight::{FixMode, PreflightValidator, ValidationContext};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "crosslist.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let registry = registry::registry_from_env();
    let items = Arc::new(MemoryItemStore::new());
    let credentials = Arc::new(CredentialSet::from_env());
    let adapter_set = adapters::build_adapters();
    let orchestrator = Arc::new(Orchestrator::new(adapter_set.map, registry, items.clone()));
    let (queue, _worker) = JobQueue::spawn(orchestrator.clone(), credentials.clone());
    let openapi: serde_json::Value =
        serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());

    let state = AppState {
        orchestrator,
        credentials,
        items,
        queue,
        oracle: oracle_from_env(),
        demos: Arc::new(adapter_set.demos),
        sessions: Arc::new(Mutex::new(HashMap::new())),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        openapi: Arc::new(openapi),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/items", post(put_item))
        .route("/items/{id}", get(get_item))
        .route("/items/{id}/crosslist", post(crosslist_item))
        .route("/items/{id}/delist", post(delist_item))
        .route("/items/{id}/delist/{marketplace}", post(delist_one))
        .route("/items/{id}/relist", post(relist_item))
        .route("/items/{id}/listings", axum::routing::delete(forget_item))
        .route("/demo/{marketplace}/sold", post(seed_demo_sale))
        .route("/sync/sold", post(sync_sold))
        .route("/preflight", post(run_preflight))
        .nest(
            "/bulk",
            Router::new()
                .route("/list", post(bulk_list))
                .route("/delist", post(bulk_delist))
                .route("/relist", post(bulk_relist)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/bulk/{op}", post(enqueue_bulk_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(close_session))
        .route("/sessions/{id}/start", post(start_session))
        .route(
            "/sessions/{id}/marketplaces",
            post(toggle_session_marketplace),
        )
        .route("/sessions/{id}/autofill", post(toggle_session_autofill))
        .route("/sessions/{id}/fix", post(apply_session_fix))
        .route("/sessions/{id}/list", post(session_list_now))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "crosslist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    credentials: Arc<CredentialSet>,
    items: Arc<MemoryItemStore>,
    queue: JobQueue,
    oracle: Arc<dyn FillOracle>,
    demos: Arc<HashMap<Marketplace, Arc<adapters::demo::DemoAdapter>>>,
    sessions: Arc<Mutex<HashMap<Uuid, SmartListingController>>>,
    idempotency: Arc<Mutex<HashMap<String, CrosslistReport>>>,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

impl AppState {
    fn validator(&self) -> PreflightValidator {
        let threshold = std::env::var("AUTOFILL_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| (0.0..=1.0).contains(v))
            .unwrap_or(preflight::DEFAULT_CONFIDENCE_THRESHOLD);
        PreflightValidator::new(self.oracle.clone()).with_threshold(threshold)
    }
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "crosslist-api-rs",
        "connected_marketplaces": state.credentials.connected(),
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::BadRequest("unauthorized".to_string()));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

// -------- Inventory --------

/// Registers (or replaces) an inventory item in the in-process store.
async fn put_item(
    State(state): State<AppState>,
    Json(item): Json<InventoryItem>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::metrics::inc_requests("/items");
    if item.id.trim().is_empty() {
        return Err(AppError::BadRequest("item id is required".to_string()));
    }
    let id = item.id.clone();
    state.items.put(item).await;
    Ok(Json(json!({ "id": id })))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InventoryItem>, AppError> {
    let item = state.items.get(&id).await?;
    Ok(Json(item))
}

/// Drops the item's registry records (the inventory record is elsewhere).
async fn forget_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::metrics::inc_requests("/items/listings_delete");
    let forgotten = state.orchestrator.forget_item(&id).await?;
    Ok(Json(json!({ "forgotten": forgotten })))
}

#[derive(Debug, Deserialize)]
struct SeedSaleRequest {
    listing_id: String,
}

/// Demo-mode only: queue a sale so `/sync/sold` has something to pick up.
async fn seed_demo_sale(
    State(state): State<AppState>,
    Path(marketplace): Path<String>,
    Json(payload): Json<SeedSaleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(marketplace) = Marketplace::from_str(&marketplace) else {
        return Err(AppError::BadRequest(format!(
            "unknown marketplace `{marketplace}`"
        )));
    };
    let Some(demo) = state.demos.get(&marketplace) else {
        return Err(AppError::BadRequest(format!(
            "`{marketplace}` is not running the demo adapter"
        )));
    };
    demo.mark_sold(&payload.listing_id).await;
    Ok(Json(json!({
        "queued": payload.listing_id,
        "active_listings": demo.active_count().await,
    })))
}

// -------- Orchestrator endpoints --------

#[derive(Debug, Deserialize)]
struct CrosslistRequest {
    marketplaces: Vec<Marketplace>,
    #[serde(default)]
    options: Option<ListOptions>,
}

/// Crosslist one item across the requested marketplaces.
///
/// - Method: `POST`
/// - Path: `/items/{id}/crosslist`
/// - Auth: `Authorization: Bearer <key>` or `X-Crosslist-Key: <key>`
/// - Response: `CrosslistReport` (per-marketplace successes and errors)
async fn crosslist_item(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<CrosslistRequest>,
) -> Result<Json<CrosslistReport>, AppError> {
    crate::metrics::inc_requests("/items/crosslist");
    info!(
        target = "crosslist.api",
        org_id = %context.org_id,
        item = %id,
        marketplaces = payload.marketplaces.len(),
        "crosslist invoked",
    );
    let options = payload.options.unwrap_or_default();

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let report = state
                .orchestrator
                .crosslist(&id, &payload.marketplaces, &state.credentials, &options)
                .await;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &report, ttl).await;
            return Ok(Json(report));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let report = state
            .orchestrator
            .crosslist(&id, &payload.marketplaces, &state.credentials, &options)
            .await;
        state.idempotency.lock().await.insert(key, report.clone());
        return Ok(Json(report));
    }

    let report = state
        .orchestrator
        .crosslist(&id, &payload.marketplaces, &state.credentials, &options)
        .await;
    Ok(Json(report))
}

async fn delist_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DelistReport>, AppError> {
    crate::metrics::inc_requests("/items/delist");
    let report = state
        .orchestrator
        .delist_everywhere(&id, &state.credentials)
        .await?;
    Ok(Json(report))
}

/// Delist from a single marketplace, leaving other listings untouched.
async fn delist_one(
    State(state): State<AppState>,
    Path((id, marketplace)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    crate::metrics::inc_requests("/items/delist_one");
    let Some(marketplace) = Marketplace::from_str(&marketplace) else {
        return Err(AppError::BadRequest(format!(
            "unknown marketplace `{marketplace}`"
        )));
    };
    let Some(credential) = state
        .credentials
        .get(marketplace)
        .filter(|credential| credential.is_active())
    else {
        return Err(AppError::Orchestrator(OrchestratorError::NotConnected(
            marketplace,
        )));
    };
    state
        .orchestrator
        .delist_from_marketplace(&id, marketplace, credential)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn relist_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CrosslistRequest>,
) -> Result<Json<orchestrator::BulkItemOutcome>, AppError> {
    crate::metrics::inc_requests("/items/relist");
    let options = payload.options.unwrap_or_default();
    let outcome = state
        .orchestrator
        .relist_item(&id, &payload.marketplaces, &state.credentials, &options)
        .await?;
    Ok(Json(outcome))
}

async fn sync_sold(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    crate::metrics::inc_requests("/sync/sold");
    let report = state.orchestrator.sync_sold_items(&state.credentials).await;
    Ok(Json(report))
}

/// Stateless validation of submitted draft forms.
async fn run_preflight(
    State(state): State<AppState>,
    Json(ctx): Json<ValidationContext>,
) -> Result<Json<PreflightResult>, AppError> {
    crate::metrics::inc_requests("/preflight");
    let result = state
        .validator()
        .run(&ctx, FixMode::Surface, &mut |_| {})
        .await;
    Ok(Json(result))
}

// -------- Bulk endpoints --------

#[derive(Debug, Deserialize)]
struct BulkRequest {
    item_ids: Vec<String>,
    #[serde(default)]
    marketplaces: Vec<Marketplace>,
    #[serde(default)]
    options: Option<ListOptions>,
}

async fn bulk_list(
    State(state): State<AppState>,
    Json(payload): Json<BulkRequest>,
) -> Result<Json<BulkReport>, AppError> {
    crate::metrics::inc_requests("/bulk/list");
    let options = payload.options.unwrap_or_default();
    Ok(Json(
        state
            .orchestrator
            .bulk_list_items(
                &payload.item_ids,
                &payload.marketplaces,
                &state.credentials,
                &options,
            )
            .await,
    ))
}

async fn bulk_delist(
    State(state): State<AppState>,
    Json(payload): Json<BulkRequest>,
) -> Result<Json<BulkReport>, AppError> {
    crate::metrics::inc_requests("/bulk/delist");
    let options = payload.options.unwrap_or_default();
    Ok(Json(
        state
            .orchestrator
            .bulk_delist_items(&payload.item_ids, &state.credentials, &options)
            .await,
    ))
}

async fn bulk_relist(
    State(state): State<AppState>,
    Json(payload): Json<BulkRequest>,
) -> Result<Json<BulkReport>, AppError> {
    crate::metrics::inc_requests("/bulk/relist");
    let options = payload.options.unwrap_or_default();
    Ok(Json(
        state
            .orchestrator
            .bulk_relist_items(
                &payload.item_ids,
                &payload.marketplaces,
                &state.credentials,
                &options,
            )
            .await,
    ))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_bulk_job(
    State(state): State<AppState>,
    Path(op): Path<String>,
    Json(payload): Json<BulkRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/bulk");
    let op = match op.as_str() {
        "list" => BulkOp::List,
        "delist" => BulkOp::Delist,
        "relist" => BulkOp::Relist,
        other => {
            return Err(AppError::BadRequest(format!("unknown bulk op `{other}`")));
        }
    };
    let id = state
        .queue
        .enqueue_bulk(
            op,
            payload.item_ids,
            payload.marketplaces,
            payload.options.unwrap_or_default(),
        )
        .await
        .map_err(|err| AppError::BadRequest(err.error))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(AppError::BadRequest("invalid job id".to_string()));
    };
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::NotFound("job")),
    }
}

// -------- Smart listing sessions --------

/// Bridges the controller's submit step onto the orchestrator.
struct OrchestratorSubmit {
    orchestrator: Arc<Orchestrator>,
    credentials: Arc<CredentialSet>,
    options: ListOptions,
}

#[async_trait::async_trait]
impl SubmitHandler for OrchestratorSubmit {
    async fn submit(&self, item_id: &str, marketplace: Marketplace) -> Result<(), String> {
        let Some(credential) = self.credentials.active(marketplace) else {
            return Err(NOT_CONNECTED.to_string());
        };
        self.orchestrator
            .list_on_marketplace(item_id, marketplace, credential, &self.options)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    item_id: String,
    #[serde(default)]
    marketplaces: Vec<Marketplace>,
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    gate: Option<controller::GateReport>,
    session: controller::SmartListingSession,
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    crate::metrics::inc_requests("/sessions");
    let item = state.items.get(&payload.item_id).await?;
    let forms = ValidationContext::for_item(&item, payload.marketplaces);
    let submit = Arc::new(OrchestratorSubmit {
        orchestrator: state.orchestrator.clone(),
        credentials: state.credentials.clone(),
        options: ListOptions::default(),
    });
    let mut controller =
        SmartListingController::new(item.id.clone(), forms, state.validator(), submit);
    let gate = controller.open_modal();

    let id = Uuid::new_v4();
    let session = controller.session().clone();
    state.sessions.lock().await.insert(id, controller);
    Ok(Json(SessionResponse {
        session_id: id.to_string(),
        gate: Some(gate),
        session,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let uuid = parse_session_id(&id)?;
    let sessions = state.sessions.lock().await;
    let controller = sessions.get(&uuid).ok_or(AppError::NotFound("session"))?;
    Ok(Json(json!({
        "session": controller.session(),
        "forms": controller.forms(),
    })))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let uuid = parse_session_id(&id)?;
    if let Some(mut controller) = state.sessions.lock().await.remove(&uuid) {
        controller.close_modal();
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let uuid = parse_session_id(&id)?;
    let mut sessions = state.sessions.lock().await;
    let controller = sessions
        .get_mut(&uuid)
        .ok_or(AppError::NotFound("session"))?;
    let gate = controller.handle_start_listing().await?;
    Ok(Json(SessionResponse {
        session_id: id,
        gate: Some(gate),
        session: controller.session().clone(),
    }))
}

#[derive(Debug, Deserialize)]
struct ToggleMarketplaceRequest {
    marketplace: Marketplace,
}

async fn toggle_session_marketplace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ToggleMarketplaceRequest>,
) -> Result<Json<controller::SmartListingSession>, AppError> {
    let uuid = parse_session_id(&id)?;
    let mut sessions = state.sessions.lock().await;
    let controller = sessions
        .get_mut(&uuid)
        .ok_or(AppError::NotFound("session"))?;
    controller.toggle_marketplace(payload.marketplace);
    Ok(Json(controller.session().clone()))
}

async fn toggle_session_autofill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<controller::SmartListingSession>, AppError> {
    let uuid = parse_session_id(&id)?;
    let mut sessions = state.sessions.lock().await;
    let controller = sessions
        .get_mut(&uuid)
        .ok_or(AppError::NotFound("session"))?;
    controller.toggle_auto_fill();
    Ok(Json(controller.session().clone()))
}

#[derive(Debug, Deserialize)]
struct ApplyFixRequest {
    issue: ValidationIssue,
    value: serde_json::Value,
}

async fn apply_session_fix(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ApplyFixRequest>,
) -> Result<Json<controller::SmartListingSession>, AppError> {
    crate::metrics::inc_requests("/sessions/fix");
    let uuid = parse_session_id(&id)?;
    let mut sessions = state.sessions.lock().await;
    let controller = sessions
        .get_mut(&uuid)
        .ok_or(AppError::NotFound("session"))?;
    controller
        .handle_apply_fix(&payload.issue, payload.value)
        .await?;
    Ok(Json(controller.session().clone()))
}

#[derive(Debug, Deserialize, Default)]
struct ListNowRequest {
    #[serde(default)]
    marketplaces: Option<Vec<Marketplace>>,
}

async fn session_list_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<ListNowRequest>>,
) -> Result<Json<ListNowOutcome>, AppError> {
    crate::metrics::inc_requests("/sessions/list");
    let uuid = parse_session_id(&id)?;
    let mut sessions = state.sessions.lock().await;
    let controller = sessions
        .get_mut(&uuid)
        .ok_or(AppError::NotFound("session"))?;
    let marketplaces = payload.and_then(|Json(req)| req.marketplaces);
    let outcome = controller.handle_list_now(marketplaces).await?;
    // a fully-successful flow discards the session
    if !controller.session().modal_open {
        sessions.remove(&uuid);
    }
    Ok(Json(outcome))
}

fn parse_session_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::BadRequest("invalid session id".to_string()))
}

// -------- Error plumbing --------

#[derive(Debug)]
enum AppError {
    Orchestrator(OrchestratorError),
    Controller(ControllerError),
    Items(ItemStoreError),
    BadRequest(String),
    NotFound(&'static str),
}

impl From<OrchestratorError> for AppError {
    fn from(value: OrchestratorError) -> Self {
        Self::Orchestrator(value)
    }
}

impl From<ControllerError> for AppError {
    fn from(value: ControllerError) -> Self {
        Self::Controller(value)
    }
}

impl From<ItemStoreError> for AppError {
    fn from(value: ItemStoreError) -> Self {
        Self::Items(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Orchestrator(err) => {
                let status = match &err {
                    OrchestratorError::Item(ItemStoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                    OrchestratorError::NotConnected(_) | OrchestratorError::NotListed(_) => {
                        StatusCode::CONFLICT
                    }
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, "orchestrator".to_string(), err.to_string())
            }
            AppError::Controller(err) => {
                (StatusCode::CONFLICT, "session".to_string(), err.to_string())
            }
            AppError::Items(err) => (StatusCode::NOT_FOUND, "items".to_string(), err.to_string()),
            AppError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "bad_request".to_string(), detail)
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found".to_string(),
                format!("{what} not found"),
            ),
        };
        let payload = ApiError {
            error,
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
