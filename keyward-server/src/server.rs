use crate::config::Config;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use keyward_core::{
    CreateUserOperationOutcome, DeleteUserOperationOutcome, GetUserOperationOutcome, KeywardError,
    KvStore, LockManager, Result, StoreBuilder, UpdateUserOperationOutcome, UserRecord,
    UserService,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub users: Arc<UserService>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    username: String,
}

/// Maps core errors onto HTTP statuses with a `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError(KeywardError);

impl From<KeywardError> for ApiError {
    fn from(error: KeywardError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(KeywardError::InvalidRequest(rejection.body_text()))
    }
}

pub fn status_for(error: &KeywardError) -> StatusCode {
    match error {
        KeywardError::UserNotFound(_) => StatusCode::NOT_FOUND,
        KeywardError::UserExists(_) => StatusCode::CONFLICT,
        KeywardError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        KeywardError::LockAcquisitionFailed { .. }
        | KeywardError::Store(_)
        | KeywardError::Config(_)
        | KeywardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            if self.0.is_retryable() {
                tracing::warn!("Request failed, client may retry: {}", self.0);
            } else {
                tracing::error!("Request failed: {}", self.0);
            }
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Connects the shared store and lock instances and wires up the user
/// service. Everything here lives for the whole process.
pub async fn build_state(config: &Config) -> Result<Arc<ServerState>> {
    let mut store_builder = StoreBuilder::new().backend(config.store.backend.as_str());
    if let Some(redis) = config.store.redis.as_ref() {
        store_builder = store_builder.redis_url(redis.url.clone());
    }
    let store = store_builder.build().await?;

    let mut instances: Vec<Arc<dyn KvStore>> = Vec::with_capacity(config.lock.instances.len());
    for url in &config.lock.instances {
        let instance = StoreBuilder::new()
            .backend("redis")
            .redis_url(url.clone())
            .build()
            .await?;
        instances.push(instance);
    }
    if instances.is_empty() {
        instances.push(store.clone());
    }

    let locks = LockManager::new(instances, config.lock.manager_options())?;
    tracing::info!(
        "Lock manager ready: {} instance(s), quorum {}, scope {:?}",
        locks.instance_count(),
        locks.quorum(),
        config.lock.scope
    );

    let users = UserService::new(store, Arc::new(locks), config.user_policy());
    Ok(Arc::new(ServerState {
        users: Arc::new(users),
    }))
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let state = build_state(&config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn root_handler() -> &'static str {
    "Hello, World!"
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn list_users(State(state): State<Arc<ServerState>>) -> ApiResult<Json<Vec<String>>> {
    let keys = state.users.list_users().await?;
    Ok(Json(keys))
}

async fn get_user(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserRecord>> {
    match state.users.get_user(&id).await? {
        GetUserOperationOutcome::Found(record) => Ok(Json(record)),
        GetUserOperationOutcome::NotFound { key } => Err(KeywardError::UserNotFound(key).into()),
    }
}

async fn create_user(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<UserPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserRecord>)> {
    let Json(payload) = payload?;

    match state.users.create_user(&payload.username).await? {
        CreateUserOperationOutcome::Created(record) => Ok((StatusCode::CREATED, Json(record))),
        CreateUserOperationOutcome::Conflict { key } => {
            Err(KeywardError::UserExists(key).into())
        }
    }
}

async fn update_user(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UserPayload>, JsonRejection>,
) -> ApiResult<Json<UserRecord>> {
    let Json(payload) = payload?;

    match state.users.update_user(&id, &payload.username).await? {
        UpdateUserOperationOutcome::Updated(record) => Ok(Json(record)),
        UpdateUserOperationOutcome::NotFound { key } => {
            Err(KeywardError::UserNotFound(key).into())
        }
    }
}

async fn delete_user(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    match state.users.delete_user(&id).await? {
        DeleteUserOperationOutcome::Deleted { key } => {
            Ok(Json(serde_json::json!({ "deleted": key })))
        }
        DeleteUserOperationOutcome::NotFound { key } => {
            Err(KeywardError::UserNotFound(key).into())
        }
    }
}
