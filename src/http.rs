//! Axum HTTP surface.
//!
//! Endpoints answer with the fixed body `{"success":true}` served as
//! JavaScript, which is what the browser client expects. Broadcasts run in
//! the background after `/sendAlert` has already responded.

use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::error::RegistryError;
use crate::registry::Registry;

const ACK_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";
const ACK_BODY: &str = r#"{"success":true}"#;

/// Shared application state for Axum handlers.
pub struct AppState {
    pub registry: Registry,
    pub dispatcher: Arc<Dispatcher>,
    /// Served to browsers as `applicationServerKey`.
    pub vapid_public_key: Option<String>,
}

/// Build the router. Paths not matched by an endpoint fall through to
/// `static_dir` when one is given.
pub fn build_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/register", post(handle_register))
        .route("/unregister", post(handle_unregister))
        .route("/sendAlert", post(handle_send_alert))
        .route("/vapidPublicKey", get(handle_vapid_public_key))
        .route("/health", get(handle_health))
        .route("/index.html", get(redirect_to_root));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(middleware::from_fn(service_worker_cache_header))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    endpoint: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default, rename = "authSecret")]
    auth_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnregisterRequest {
    endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
struct AlertRequest {
    #[serde(default)]
    payload: Option<String>,
}

/// POST /register
async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let result = state
        .registry
        .register(
            req.endpoint,
            req.key.unwrap_or_default(),
            req.auth_secret.unwrap_or_default(),
        )
        .await;

    match result {
        Ok(()) => acknowledge(),
        Err(err) => registry_failure(err),
    }
}

/// POST /unregister
async fn handle_unregister(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnregisterRequest>,
) -> Response {
    match state.registry.unregister(req.endpoint).await {
        Ok(_) => acknowledge(),
        Err(err) => registry_failure(err),
    }
}

/// POST /sendAlert
///
/// The body is optional; an empty body sends the default alert.
async fn handle_send_alert(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        AlertRequest::default()
    } else {
        match serde_json::from_slice::<AlertRequest>(&body) {
            Ok(req) => req,
            Err(err) => return failure(StatusCode::BAD_REQUEST, &format!("invalid body: {}", err)),
        }
    };

    let _ = state.dispatcher.spawn_alert(req.payload);
    acknowledge()
}

/// GET /vapidPublicKey
async fn handle_vapid_public_key(State(state): State<Arc<AppState>>) -> Response {
    match &state.vapid_public_key {
        Some(key) => Json(serde_json::json!({ "publicKey": key })).into_response(),
        None => failure(StatusCode::NOT_FOUND, "VAPID is not configured"),
    }
}

/// GET /health
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.list().await {
        Ok(subs) => Json(serde_json::json!({
            "status": "ok",
            "subscribers": subs.len(),
        }))
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn redirect_to_root() -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/")]).into_response()
}

/// Service workers must be revalidated on every load or browsers keep
/// running a stale copy.
async fn service_worker_cache_header(request: Request, next: Next) -> Response {
    let is_worker = matches!(
        request.uri().path().rsplit('/').next(),
        Some("service-worker.js") | Some("worker.js")
    );
    let mut response = next.run(request).await;
    if is_worker {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=0"),
        );
    }
    response
}

fn acknowledge() -> Response {
    ([(header::CONTENT_TYPE, ACK_CONTENT_TYPE)], ACK_BODY).into_response()
}

fn failure(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "success": false, "error": message }).to_string();
    (status, [(header::CONTENT_TYPE, ACK_CONTENT_TYPE)], body).into_response()
}

fn registry_failure(err: RegistryError) -> Response {
    let status = match err {
        RegistryError::InvalidSubscription(_) => StatusCode::BAD_REQUEST,
        RegistryError::StoreUnavailable(_) | RegistryError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    };
    warn!(error = %err, %status, "registry request failed");
    failure(status, &err.to_string())
}
