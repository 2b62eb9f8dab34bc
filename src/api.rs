//! REST + WebSocket query surface over the workflow coordinator.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::model::{AccessRequest, SourceContext};
use crate::error::{ApprovalError, Error, ProvisioningError};
use crate::events::LedgerEvent;
use crate::workflow::{Decision, WorkflowCoordinator};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<WorkflowCoordinator>,
}

/// Build the Axum router with request, history and WebSocket routes.
pub fn api_routes(coordinator: Arc<WorkflowCoordinator>) -> Router {
    let state = AppState { coordinator };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/requests", get(list_pending).post(submit_request))
        .route("/api/requests/{id}", get(get_request))
        .route("/api/requests/{id}/approve", post(approve_request))
        .route("/api/requests/{id}/reject", post(reject_request))
        .route("/api/requests/{id}/cancel", post(cancel_request))
        .route("/api/requests/{id}/retry", post(retry_provisioning))
        .route("/api/history", get(history))
        .route("/api/history/{outcome_id}/revoke", post(revoke))
        .route("/api/revocations", get(revocations))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// JSON error response with a status derived from the error kind.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Approval(ApprovalError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Approval(ApprovalError::DuplicateId { .. }) => StatusCode::CONFLICT,
            Error::Approval(ApprovalError::MissingApprover { .. }) => StatusCode::BAD_REQUEST,
            Error::Provisioning(ProvisioningError::OutcomeNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            Error::Provisioning(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<ProvisioningError> for ApiError {
    fn from(e: ProvisioningError) -> Self {
        Error::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "access-agent"
    }))
}

// ── Requests ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    id: Option<String>,
    request: AccessRequest,
    #[serde(default)]
    source_context: SourceContext,
}

/// Body of approve, reject and cancel. Cancel callers may say `actor`
/// and `reason` instead.
#[derive(Debug, Deserialize)]
struct DecisionBody {
    #[serde(alias = "actor")]
    approver: String,
    #[serde(default, alias = "reason")]
    comments: Option<String>,
}

async fn list_pending(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.pending_summaries().await?))
}

async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<impl IntoResponse, ApiError> {
    let record = match body.id {
        Some(id) => {
            state
                .coordinator
                .submit_with_id(&id, body.request, body.source_context)
                .await?
        }
        None => {
            state
                .coordinator
                .submit_detected_request(body.request, body.source_context)
                .await?
        }
    };
    info!(request_id = %record.id, "Request submitted via API");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.coordinator.get(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(Error::from(ApprovalError::NotFound { id }).into()),
    }
}

async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .coordinator
        .decide(&id, Decision::Approve, &body.approver, body.comments)
        .await?;
    Ok(Json(outcome))
}

async fn reject_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .coordinator
        .decide(&id, Decision::Reject, &body.approver, body.comments)
        .await?;
    Ok(Json(outcome))
}

async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .coordinator
        .cancel(&id, &body.approver, body.comments)
        .await?;
    Ok(Json(record))
}

async fn retry_provisioning(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.retry_provisioning(&id).await?))
}

// ── History ─────────────────────────────────────────────────────────────

async fn history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.history().await)
}

async fn revocations(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.revocations().await)
}

async fn revoke(
    State(state): State<AppState>,
    Path(outcome_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.revoke(outcome_id).await?))
}

// ── WebSocket ───────────────────────────────────────────────────────────

/// Actions a client can send over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WsAction {
    Approve {
        id: String,
        approver: String,
        #[serde(default)]
        comments: Option<String>,
    },
    Reject {
        id: String,
        approver: String,
        #[serde(default)]
        comments: Option<String>,
    },
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.coordinator))
}

async fn send_sync(socket: &mut WebSocket, coordinator: &WorkflowCoordinator) -> bool {
    let requests = match coordinator.pending_summaries().await {
        Ok(requests) => requests,
        Err(e) => {
            warn!(error = %e, "Failed to load pending requests for sync");
            Vec::new()
        }
    };
    let sync = LedgerEvent::RequestsSync { requests };
    match serde_json::to_string(&sync) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

async fn handle_socket(mut socket: WebSocket, coordinator: Arc<WorkflowCoordinator>) {
    info!("WebSocket client connected");

    // Subscribe before the sync so nothing published in between is missed
    let mut rx = coordinator.events().subscribe();

    if !send_sync(&mut socket, &coordinator).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event)
                            && socket.send(Message::Text(json.into())).await.is_err()
                        {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_sync(&mut socket, &coordinator).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &coordinator).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn handle_client_message(text: &str, coordinator: &WorkflowCoordinator) {
    let (id, decision, approver, comments) = match serde_json::from_str::<WsAction>(text) {
        Ok(WsAction::Approve {
            id,
            approver,
            comments,
        }) => (id, Decision::Approve, approver, comments),
        Ok(WsAction::Reject {
            id,
            approver,
            comments,
        }) => (id, Decision::Reject, approver, comments),
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return;
        }
    };

    // Results reach the client through the event broadcast
    match coordinator.decide(&id, decision, &approver, comments).await {
        Ok(_) => info!(request_id = %id, decision = ?decision, "Decision applied via WS"),
        Err(e) => warn!(request_id = %id, error = %e, "Decision failed via WS"),
    }
}
