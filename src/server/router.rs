//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::warn;

use crate::authorizer::{AuthorizerEvent, AuthorizerResponse, TokenAuthorizer, Verdict};

/// Shared application state
pub struct AppState {
    /// Token authorizer (holds the process-wide store handle)
    pub authorizer: Arc<TokenAuthorizer>,
    /// Upper bound for a whole invocation; exceeding it yields Deny
    pub request_timeout: Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/authorize", post(authorize_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /authorize` - gateway invocation endpoint
async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthorizerEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(event) => event,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed authorizer event");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_event",
                    "message": rejection.body_text(),
                })),
            )
                .into_response();
        }
    };

    let authorizer = &state.authorizer;
    let response = match tokio::time::timeout(state.request_timeout, authorizer.handle(&event)).await
    {
        Ok(response) => response,
        Err(_) => {
            warn!(
                resource = %event.method_arn,
                timeout_ms = state.request_timeout.as_millis(),
                "Authorization timed out, denying"
            );
            AuthorizerResponse::from(Verdict::deny(
                authorizer.config().principal_id.as_str(),
                event.method_arn.as_str(),
            ))
        }
    };

    let ttl = authorizer.config().result_ttl.as_secs();
    let cache_control = HeaderValue::from_str(&format!("private, max-age={ttl}"))
        .unwrap_or_else(|_| HeaderValue::from_static("no-store"));

    ([(header::CACHE_CONTROL, cache_control)], Json(response)).into_response()
}
