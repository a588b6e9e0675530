use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::coordinator::Coordinator;
use crate::coordinator::CoordinatorError;
use crate::coordinator::Phase;
use crate::coordinator::ProviderChange;
use crate::provider::FieldKind;
use crate::provider::FieldValues;
use crate::provider::Provider;
use crate::sensor::Board;
use crate::sensor::SensorView;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    phase: Phase,
    enabled: Vec<String>,
}

#[derive(Serialize)]
struct ProviderInfo {
    id: &'static str,
    name: &'static str,
    icon: &'static str,
    enabled: bool,
    default_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval_secs: Option<u64>,
    fields: Vec<FieldInfo>,
    sensors: Vec<&'static str>,
}

#[derive(Serialize)]
struct FieldInfo {
    key: &'static str,
    label: &'static str,
    kind: String,
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'static [&'static str]>,
}

/// Body of PUT /v1/providers/:provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderUpdate {
    #[serde(default = "default_true")]
    enabled: bool,
    interval_minutes: Option<u64>,
    timeout_secs: Option<u64>,
    fields: Option<FieldValues>,
}

fn default_true() -> bool {
    true
}

impl From<ProviderUpdate> for ProviderChange {
    fn from(update: ProviderUpdate) -> Self {
        ProviderChange {
            enabled: update.enabled,
            interval: update.interval_minutes.map(|m| Duration::from_secs(m * 60)),
            timeout: update.timeout_secs.map(Duration::from_secs),
            fields: update.fields,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// A [`CoordinatorError`] rendered as a JSON error response.
struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::UnknownProvider(_) | CoordinatorError::NotEnabled(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::Config { .. } => StatusCode::BAD_REQUEST,
            CoordinatorError::InvalidPhase(_) => StatusCode::CONFLICT,
            CoordinatorError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::debug!("Request failed with {}: {}", status, self.0);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Shared application state
pub struct AppState {
    version: &'static str,
    coordinator: Arc<Coordinator>,
    board: Arc<Board>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, board: Arc<Board>) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION"),
            coordinator,
            board,
        })
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            phase: state.coordinator.phase(),
            enabled: state.coordinator.enabled_ids(),
        }),
    )
}

fn describe_provider(coordinator: &Coordinator, provider: &dyn Provider) -> ProviderInfo {
    ProviderInfo {
        id: provider.id(),
        name: provider.display_name(),
        icon: provider.icon(),
        enabled: coordinator.is_enabled(provider.id()),
        default_interval_secs: provider.default_interval().as_secs(),
        interval_secs: coordinator.interval(provider.id()).map(|d| d.as_secs()),
        fields: provider
            .config_schema()
            .iter()
            .map(|field| FieldInfo {
                key: field.key,
                label: field.label,
                kind: field.kind.to_string(),
                required: field.required,
                default: match field.kind {
                    // Never echo secrets, not even their defaults.
                    FieldKind::Secret => None,
                    _ => field.default,
                },
                options: match field.kind {
                    FieldKind::Select(options) => Some(options),
                    _ => None,
                },
            })
            .collect(),
        sensors: provider.sensors().iter().map(|s| s.key).collect(),
    }
}

/// Handler for GET /v1/providers
#[tracing::instrument(skip(state))]
async fn providers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let providers: Vec<_> = state
        .coordinator
        .registry()
        .iter()
        .map(|p| describe_provider(&state.coordinator, p.as_ref()))
        .collect();

    Json(providers)
}

/// Handler for GET /v1/sensors
#[tracing::instrument(skip(state))]
async fn sensors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let views: Vec<SensorView> = state.board.views().values().flatten().cloned().collect();
    Json(views)
}

/// Handler for GET /v1/sensors/:provider
#[tracing::instrument(skip(state))]
async fn provider_sensors(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SensorView>>, ApiError> {
    if !state.coordinator.registry().contains(&id) {
        return Err(CoordinatorError::UnknownProvider(id).into());
    }

    state
        .board
        .provider(&id)
        .map(Json)
        .ok_or_else(|| CoordinatorError::NotEnabled(id).into())
}

/// Handler for PUT /v1/providers/:provider
#[tracing::instrument(skip(state, update))]
async fn update_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<ProviderUpdate>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.reconfigure(&id, update.into())?;
    // So that a read straight after this response already sees the change.
    state.board.refresh(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /v1/providers/:provider/refresh
#[tracing::instrument(skip(state))]
async fn refresh_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.refresh(&id)?;
    Ok(StatusCode::ACCEPTED)
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/providers", get(providers))
        .route("/v1/providers/:provider", put(update_provider))
        .route("/v1/providers/:provider/refresh", post(refresh_provider))
        .route("/v1/sensors", get(sensors))
        .route("/v1/sensors/:provider", get(provider_sensors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = SocketAddr::new(listen.parse::<IpAddr>()?, port);
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
