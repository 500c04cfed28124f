use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::engine::Acknowledgment;
use crate::engine::DeviceState;
use crate::engine::Engine;
use crate::engine::Profile;
use crate::engine::ProfileDefaults;
use crate::engine::ProfileError;
use crate::engine::ScheduledAction;

/// Engine shared between the ticker and the request handlers.
pub type SharedEngine = Arc<Mutex<Engine>>;

/// Source of "now" for commands arriving over HTTP.
pub type Clock = fn() -> NaiveDateTime;

/// Local wall-clock time, which is what spoken times of day refer to.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

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
    active_profile: String,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct NewProfileRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LanguageRequest {
    language: String,
}

#[derive(Serialize)]
struct ProfileSummary {
    id: String,
    name: String,
    defaults: ProfileDefaults,
}

impl From<&Profile> for ProfileSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            defaults: profile.defaults.clone(),
        }
    }
}

#[derive(Serialize)]
struct ProfilesResponse {
    active: String,
    profiles: Vec<ProfileSummary>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("no scheduled entry with id {0}")]
    ScheduleNotFound(u64),

    #[error("{0}")]
    BadRequest(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Profile(ProfileError::NotFound(_)) | ApiError::ScheduleNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Profile(ProfileError::LastProfile) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        tracing::debug!(%status, "request failed: {}", self);
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: SharedEngine,
    clock: Clock,
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
async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let active_profile = state.engine.lock().await.active_profile().name.clone();

    Json(InfoResponse {
        version: state.version.to_string(),
        hostname,
        active_profile,
    })
}

#[tracing::instrument(skip(state))]
async fn get_state(State(state): State<AppState>) -> Json<DeviceState> {
    Json(state.engine.lock().await.state().clone())
}

#[tracing::instrument(skip(state))]
async fn list_schedules(State(state): State<AppState>) -> Json<Vec<ScheduledAction>> {
    Json(state.engine.lock().await.user_schedules().cloned().collect())
}

#[tracing::instrument(skip(state))]
async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .lock()
        .await
        .remove_schedule(id)
        .ok_or(ApiError::ScheduleNotFound(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
async fn command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Json<Acknowledgment> {
    let now = (state.clock)();
    Json(state.engine.lock().await.handle_command(&request.text, now))
}

#[tracing::instrument(skip(state))]
async fn list_profiles(State(state): State<AppState>) -> Json<ProfilesResponse> {
    let engine = state.engine.lock().await;
    Json(ProfilesResponse {
        active: engine.active_profile().id.clone(),
        profiles: engine.profiles().iter().map(ProfileSummary::from).collect(),
    })
}

#[tracing::instrument(skip(state))]
async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<NewProfileRequest>,
) -> Result<(StatusCode, Json<ProfileSummary>), ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("profile name must not be empty"));
    }
    let mut engine = state.engine.lock().await;
    let profile = engine.add_profile(name);
    Ok((StatusCode::CREATED, Json(ProfileSummary::from(profile))))
}

#[tracing::instrument(skip(state))]
async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.lock().await.delete_profile(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
async fn activate_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileSummary>, ApiError> {
    let mut engine = state.engine.lock().await;
    let profile = engine.set_active_profile(&id)?;
    Ok(Json(ProfileSummary::from(profile)))
}

#[tracing::instrument(skip(state))]
async fn set_language(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LanguageRequest>,
) -> Result<Json<ProfileSummary>, ApiError> {
    let language = request.language.trim();
    if language.is_empty() {
        return Err(ApiError::BadRequest("language must not be empty"));
    }
    let mut engine = state.engine.lock().await;
    let profile = engine.set_language(&id, language)?;
    Ok(Json(ProfileSummary::from(profile)))
}

/// Create the API router with all endpoints
pub fn create_router(engine: SharedEngine, clock: Clock) -> Router {
    let state = AppState {
        version: env!("CARGO_PKG_VERSION"),
        engine,
        clock,
    };
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/state", get(get_state))
        .route("/v1/schedules", get(list_schedules))
        .route("/v1/schedules/:id", delete(delete_schedule))
        .route("/v1/command", post(command))
        .route("/v1/profiles", get(list_profiles).post(create_profile))
        .route("/v1/profiles/:id", delete(delete_profile))
        .route("/v1/profiles/:id/activate", post(activate_profile))
        .route("/v1/profiles/:id/language", put(set_language))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    engine: SharedEngine,
    listen: String,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(engine, local_now);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
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
