//! The two northbound inference endpoints (spec §6): `POST /v1/messages`
//! (Anthropic-shaped) and `POST /v1/chat/completions` (OpenAI-shaped). Both
//! normalize their inbound body, route it through the `Manager` (C5), and
//! denormalize whatever comes back into the caller's own dialect — a client
//! speaking OpenAI never has to know the target virtual model is actually
//! served by an Anthropic-protocol provider underneath.

use std::time::Duration;

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rcc_core::CoreError;
use rcc_protocol::claude::create_message::CreateMessageRequestBody;
use rcc_protocol::claude::error::{ClaudeErrorBody, ClaudeErrorDetail};
use rcc_protocol::openai::create_chat_completions::CreateChatCompletionsRequestBody;
use rcc_protocol::openai::error::{OpenAiErrorBody, OpenAiErrorDetail};
use tokio_util::sync::CancellationToken;

use crate::RouterState;

/// No per-request deadline is negotiated over the wire today; every
/// request gets the same generous ceiling, long enough for a non-streaming
/// completion against a slow upstream without letting one hung request
/// hold its scheduler slot forever.
const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(120);

pub async fn claude_messages(
    State(state): State<RouterState>,
    Extension(cancellation): Extension<CancellationToken>,
    Json(body): Json<CreateMessageRequestBody>,
) -> Response {
    let normalized = match rcc_transform::claude::to_normalized(body) {
        Ok(request) => request,
        Err(err) => return claude_error(StatusCode::BAD_REQUEST, "invalid_request_error", &err.to_string()),
    };

    match dispatch(&state, normalized, cancellation).await {
        Ok(response) => match rcc_transform::claude::from_normalized(response) {
            Ok(body) => (StatusCode::OK, Json(body)).into_response(),
            Err(err) => claude_error(StatusCode::BAD_GATEWAY, "api_error", &err.to_string()),
        },
        Err(err) => claude_error(
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            err.kind_code(),
            &format!("{err} (request_id={})", err.request_id()),
        ),
    }
}

pub async fn openai_chat_completions(
    State(state): State<RouterState>,
    Extension(cancellation): Extension<CancellationToken>,
    Json(body): Json<CreateChatCompletionsRequestBody>,
) -> Response {
    let normalized = match rcc_transform::openai::to_normalized(body) {
        Ok(request) => request,
        Err(err) => return openai_error(StatusCode::BAD_REQUEST, "invalid_request_error", &err.to_string()),
    };

    match dispatch(&state, normalized, cancellation).await {
        Ok(response) => match rcc_transform::openai::from_normalized(response) {
            Ok(body) => (StatusCode::OK, Json(body)).into_response(),
            Err(err) => openai_error(StatusCode::BAD_GATEWAY, "api_error", &err.to_string()),
        },
        Err(err) => openai_error(
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            err.kind_code(),
            &format!("{err} (request_id={})", err.request_id()),
        ),
    }
}

async fn dispatch(
    state: &RouterState,
    request: rcc_transform::normalized::NormalizedRequest,
    cancellation: CancellationToken,
) -> Result<rcc_transform::normalized::NormalizedResponse, CoreError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let virtual_model_id = request.model.clone();
    let ctx = rcc_core::RequestContext::new(
        request_id,
        virtual_model_id,
        request,
        DEFAULT_REQUEST_DEADLINE,
        cancellation,
    );
    state.manager.route(ctx).await
}

fn claude_error(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = ClaudeErrorBody {
        kind: "error".to_string(),
        error: ClaudeErrorDetail {
            kind: kind.to_string(),
            message: message.to_string(),
        },
    };
    (status, Json(body)).into_response()
}

fn openai_error(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = OpenAiErrorBody {
        error: OpenAiErrorDetail {
            message: message.to_string(),
            kind: Some(kind.to_string()),
            param: None,
            code: None,
        },
    };
    (status, Json(body)).into_response()
}
