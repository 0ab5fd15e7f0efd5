//! The northbound HTTP surface: `POST /v1/messages`, `POST
//! /v1/chat/completions`, `GET /status`, guarded by a shared-token bearer
//! auth middleware. Out of scope: the configuration-editing admin UI and
//! its CRUD REST surface (spec §1/§9) — this crate exposes only the
//! routing gateway itself.

mod proxy;
mod status;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use rcc_core::Manager;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RouterState {
    pub manager: Arc<Manager>,
    pub auth_token: Option<Arc<str>>,
}

/// Builds the full router: the two inbound dialects plus the status
/// endpoint, wrapped in the bearer-auth middleware (spec §6).
pub fn build_router(manager: Arc<Manager>, auth_token: Option<String>) -> Router {
    let state = RouterState {
        manager,
        auth_token: auth_token.map(Arc::from),
    };

    Router::new()
        .route("/v1/messages", post(proxy::claude_messages))
        .route("/v1/chat/completions", post(proxy::openai_chat_completions))
        .route("/status", get(status::status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            cancellation_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    axum::extract::State(state): axum::extract::State<RouterState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if rcc_core::check_bearer(state.auth_token.as_deref(), presented) {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response()
    }
}

/// Issues this request's cancellation token (spec §5 trigger "(iii) manager
/// shutdown" is wired transitively through [`Manager::request_cancellation_token`])
/// and hands it to the handler via request extensions. The [`CancelOnDrop`]
/// guard fires trigger "(i) the caller's connection closing": hyper drops
/// the in-flight service future — this middleware's own stack frame
/// included — the moment the client disconnects mid-request, so the guard's
/// `Drop` runs and cancels the token. On a normal response the guard is
/// disarmed first, so completing a request never cancels anything.
async fn cancellation_middleware(
    axum::extract::State(state): axum::extract::State<RouterState>,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    let token = state.manager.request_cancellation_token();
    request.extensions_mut().insert(token.clone());

    let guard = CancelOnDrop {
        token,
        armed: true,
    };
    let response = next.run(request).await;
    guard.disarm();
    response
}

struct CancelOnDrop {
    token: CancellationToken,
    armed: bool,
}

impl CancelOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}
