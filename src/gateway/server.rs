//! Axum HTTP server exposing the login session operations.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use secrecy::SecretString;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::SessionRegistry;
use crate::error::{GatewayError, SessionError};
use crate::gateway::auth::{AuthState, auth_middleware};
use crate::gateway::types::*;

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
    server_task: RwLock<Option<JoinHandle<()>>>,
}

impl GatewayState {
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            shutdown_tx: RwLock::new(None),
            server_task: RwLock::new(None),
        })
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.server_task.write().await.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Gateway server task ended abnormally: {}", e);
        }
    }
}

/// Session errors rendered as JSON with a matching HTTP status.
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

/// Malformed or incomplete JSON bodies are invalid requests, not 422s.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(SessionError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
            SessionError::StateMismatch { .. } | SessionError::DuplicateKey { .. } => {
                StatusCode::CONFLICT
            }
            SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::CapacityExceeded { .. }
            | SessionError::ActivationUnavailable { .. }
            | SessionError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        let payload = self.0.to_payload();
        let retryable = payload.retryable;
        let mut response = (status, Json(payload)).into_response();
        if retryable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        }
        response
    }
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>, auth_token: String, cors_addr: SocketAddr) -> Router {
    let auth_state = AuthState { token: auth_token };

    let public = Router::new().route("/api/health", get(health_handler));

    let protected = Router::new()
        .route("/api/auth/sessions", post(start_session_handler))
        .route(
            "/api/auth/sessions/{session_key}",
            get(session_status_handler).delete(cleanup_session_handler),
        )
        .route(
            "/api/auth/sessions/{session_key}/code",
            post(submit_code_handler),
        )
        .route(
            "/api/auth/sessions/{session_key}/password",
            post(submit_password_handler),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    // Only same-host browser origins may call the API.
    let mut origins = vec![format!("http://localhost:{}", cors_addr.port())];
    if !cors_addr.ip().is_unspecified() {
        origins.push(format!("http://{}:{}", cors_addr.ip(), cors_addr.port()));
    }
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        ))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .with_state(state)
}

/// Bind the gateway and serve it in the background. Returns the bound address.
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
    auth_token: String,
) -> Result<SocketAddr, GatewayError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::StartupFailed {
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::StartupFailed {
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(Arc::clone(&state), auth_token, bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Gateway shutting down");
            })
            .await
        {
            tracing::error!("Gateway server error: {}", e);
        }
    });
    *state.server_task.write().await = Some(task);

    tracing::info!("Gateway listening on http://{}", bound_addr);
    Ok(bound_addr)
}

// --- Handlers ---

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        active_sessions: state.registry.len().await,
    })
}

async fn start_session_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartSessionResponse>), ApiError> {
    let Json(body) = body?;
    let started = state.registry.create(body.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_key: started.session_key,
            status: started.status,
        }),
    ))
}

async fn session_status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_key): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let view = state.registry.status(&session_key).await?;
    Ok(Json(view.into()))
}

async fn submit_code_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_key): Path<String>,
    body: Result<Json<SubmitCodeRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(body) = body?;
    let status = state
        .registry
        .submit_code(&session_key, SecretString::from(body.code))
        .await?;
    Ok(Json(SubmitResponse {
        session_key,
        status,
    }))
}

async fn submit_password_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_key): Path<String>,
    body: Result<Json<SubmitPasswordRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(body) = body?;
    let status = state
        .registry
        .submit_password(&session_key, SecretString::from(body.password))
        .await?;
    Ok(Json(SubmitResponse {
        session_key,
        status,
    }))
}

async fn cleanup_session_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_key): Path<String>,
) -> Json<CleanupResponse> {
    let removed = state.registry.cleanup(&session_key).await;
    Json(CleanupResponse {
        success: true,
        removed,
    })
}
