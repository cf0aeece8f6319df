use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use ledgerlens_agent::runtime::invalid_role_message;
use ledgerlens_agent::AgentRuntime;
use ledgerlens_core::domain::role::Role;
use ledgerlens_core::domain::sensitivity::SensitivityLabel;
use ledgerlens_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub guardrail_triggered: bool,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveQuery {
    pub question: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub sensitivity: SensitivityLabel,
    pub source: String,
    pub category: String,
    pub year: i32,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub role: Role,
    pub documents: Vec<RetrievedDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub corpus_size: usize,
    pub checked_at: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/ask", post(ask))
        .route("/api/v1/retrieve", get(retrieve))
        .with_state(ApiState { runtime })
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready".to_string(),
        model: state.runtime.model_name().to_string(),
        corpus_size: state.runtime.retriever().corpus_size(),
        checked_at: Utc::now().to_rfc3339(),
    })
}

async fn ask(
    State(state): State<ApiState>,
    Json(body): Json<AskRequest>,
) -> ApiResult<AskResponse> {
    let correlation_id = Uuid::new_v4().to_string();
    let role = parse_role(&body.role, &correlation_id)?;

    let outcome = state
        .runtime
        .answer_with_correlation(&body.question, role, &correlation_id)
        .await
        .map_err(|error| application_error(error, correlation_id.clone()))?;

    info!(
        event_name = "api.ask.completed",
        correlation_id = %correlation_id,
        role = %role,
        guardrail_triggered = outcome.guardrail_triggered,
        "ask request served"
    );

    Ok(Json(AskResponse {
        answer: outcome.response,
        guardrail_triggered: outcome.guardrail_triggered,
    }))
}

async fn retrieve(
    State(state): State<ApiState>,
    Query(query): Query<RetrieveQuery>,
) -> ApiResult<RetrieveResponse> {
    let correlation_id = Uuid::new_v4().to_string();
    let role = parse_role(&query.role, &correlation_id)?;

    let result = state
        .runtime
        .retrieve_for_display(&query.question, role)
        .await
        .map_err(|error| application_error(error, correlation_id.clone()))?;

    let documents = result
        .items
        .into_iter()
        .map(|item| RetrievedDocument {
            content: item.document.content,
            sensitivity: item.document.sensitivity,
            source: item.document.source,
            category: item.document.category,
            year: item.document.year,
            score: item.score,
        })
        .collect();

    Ok(Json(RetrieveResponse { role, documents }))
}

fn parse_role(role_name: &str, correlation_id: &str) -> Result<Role, (StatusCode, Json<ApiError>)> {
    role_name.parse::<Role>().map_err(|_| {
        warn!(
            event_name = "api.invalid_role",
            correlation_id = %correlation_id,
            role = %role_name,
            "request rejected"
        );
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: invalid_role_message(role_name),
                correlation_id: correlation_id.to_string(),
            }),
        )
    })
}

fn application_error(
    error: ApplicationError,
    correlation_id: String,
) -> (StatusCode, Json<ApiError>) {
    warn!(
        event_name = "api.request_failed",
        correlation_id = %correlation_id,
        error = %error,
        "request failed"
    );
    let interface = error.into_interface(correlation_id);
    let status = match interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: interface.user_message().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
