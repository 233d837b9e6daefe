//! Unauthenticated verification endpoints.
//!
//! The token in the query string is the only credential; there is no login
//! session. Both endpoints are reached from the link embedded in the
//! verification email.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::confirm::{EmployeeInfo, SubmissionOutcome};
use crate::model::SubmissionPayload;

use super::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

pub async fn verification_info(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<EmployeeInfo>> {
    Ok(Json(state.processor.employee_info(&query.token).await?))
}

pub async fn submit(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(payload): Json<SubmissionPayload>,
) -> ApiResult<Json<SubmissionOutcome>> {
    Ok(Json(state.processor.submit(&query.token, payload).await?))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
