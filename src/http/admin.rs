//! Admin API handlers: phone lifecycle, departures, campaign management.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tracing::info;

use crate::campaign::{CampaignRequest, ProgressSnapshot, ResendReport};
use crate::error::EngineError;
use crate::lifecycle::{self, PhoneUpdate, RiskDisposition};
use crate::model::{
    CampaignId, EmployeeId, PhoneId, PhoneNumber, PhoneOrigin, PhoneStatus, is_valid_phone_number,
};
use crate::results::CampaignResults;
use crate::risk::DepartureSweep;

use super::{ApiResult, AppState};

// ============================================================================
// Phones
// ============================================================================

/// Body for `POST /phones`.
#[derive(Debug, Deserialize)]
pub struct CreatePhoneRequest {
    pub number: String,
    #[serde(default = "default_creation_status")]
    pub status: PhoneStatus,
    pub registrant_employee_id: EmployeeId,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub remarks: String,
    pub application_date: NaiveDate,
    #[serde(default)]
    pub cancellation_date: Option<NaiveDate>,
    pub department_id: crate::model::DepartmentId,
}

const fn default_creation_status() -> PhoneStatus {
    PhoneStatus::Idle
}

pub async fn create_phone(
    State(state): State<AppState>,
    Json(req): Json<CreatePhoneRequest>,
) -> ApiResult<(StatusCode, Json<PhoneNumber>)> {
    if !is_valid_phone_number(&req.number) {
        return Err(EngineError::Validation(format!(
            "'{}' is not a plausible phone number",
            req.number
        ))
        .into());
    }
    lifecycle::check_creation_status(req.status)?;
    let registrant = state
        .directory
        .get(&req.registrant_employee_id)
        .await?
        .ok_or_else(|| EngineError::not_found("employee", &req.registrant_employee_id))?;

    let phone = PhoneNumber {
        id: PhoneId::new(),
        number: req.number,
        status: req.status,
        registrant_employee_id: registrant.id,
        current_user_employee_id: None,
        vendor: req.vendor,
        purpose: req.purpose,
        remarks: req.remarks,
        application_date: req.application_date,
        cancellation_date: req.cancellation_date,
        department_id: req.department_id,
        origin: PhoneOrigin::Registered,
        usage_history: Vec::new(),
    };
    state.store.insert_phone(phone.clone()).await?;
    info!(phone = %phone.id, number = %phone.number, "phone registered");
    Ok((StatusCode::CREATED, Json(phone)))
}

pub async fn list_phones(State(state): State<AppState>) -> ApiResult<Json<Vec<PhoneNumber>>> {
    Ok(Json(state.store.phones().await?))
}

pub async fn get_phone(
    State(state): State<AppState>,
    Path(id): Path<PhoneId>,
) -> ApiResult<Json<PhoneNumber>> {
    Ok(Json(state.store.phone(id).await?))
}

pub async fn update_phone(
    State(state): State<AppState>,
    Path(id): Path<PhoneId>,
    Json(update): Json<PhoneUpdate>,
) -> ApiResult<Json<PhoneNumber>> {
    let mut phone = state.store.phone(id).await?;
    lifecycle::apply_update(&mut phone, update)?;
    state.store.update_phone(phone.clone()).await?;
    Ok(Json(phone))
}

pub async fn delete_phone(
    State(state): State<AppState>,
    Path(id): Path<PhoneId>,
) -> ApiResult<StatusCode> {
    let phone = state.store.phone(id).await?;
    if !phone.deletable() {
        return Err(EngineError::Validation(format!(
            "phone {} has usage history and cannot be deleted",
            phone.number
        ))
        .into());
    }
    state.store.delete_phone(id).await?;
    info!(phone = %id, "phone deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Body for `POST /phones/{id}/assign`.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub employee_id: EmployeeId,
}

pub async fn assign_phone(
    State(state): State<AppState>,
    Path(id): Path<PhoneId>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<PhoneNumber>> {
    let employee = state
        .directory
        .get(&req.employee_id)
        .await?
        .ok_or_else(|| EngineError::not_found("employee", &req.employee_id))?;
    let mut phone = state.store.phone(id).await?;
    lifecycle::assign(&mut phone, &employee, Local::now().date_naive())?;
    state.store.update_phone(phone.clone()).await?;
    info!(phone = %id, employee = %employee.id, "phone assigned");
    Ok(Json(phone))
}

pub async fn unassign_phone(
    State(state): State<AppState>,
    Path(id): Path<PhoneId>,
) -> ApiResult<Json<PhoneNumber>> {
    let mut phone = state.store.phone(id).await?;
    lifecycle::unassign(&mut phone, Local::now().date_naive())?;
    state.store.update_phone(phone.clone()).await?;
    info!(phone = %id, "phone unassigned");
    Ok(Json(phone))
}

// ============================================================================
// Risk handling
// ============================================================================

/// Body for `POST /phones/{id}/handle-risk`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HandleRiskRequest {
    ChangeApplicant {
        new_registrant: EmployeeId,
        #[serde(default = "default_resolved_by")]
        resolved_by: String,
    },
    Reclaim {
        #[serde(default = "default_resolved_by")]
        resolved_by: String,
    },
    Deactivate {
        #[serde(default)]
        cancellation_date: Option<NaiveDate>,
        #[serde(default = "default_resolved_by")]
        resolved_by: String,
    },
}

fn default_resolved_by() -> String {
    "admin".to_string()
}

pub async fn handle_risk(
    State(state): State<AppState>,
    Path(id): Path<PhoneId>,
    Json(req): Json<HandleRiskRequest>,
) -> ApiResult<Json<PhoneNumber>> {
    let (disposition, resolved_by) = match req {
        HandleRiskRequest::ChangeApplicant {
            new_registrant,
            resolved_by,
        } => (RiskDisposition::ChangeApplicant { new_registrant }, resolved_by),
        HandleRiskRequest::Reclaim { resolved_by } => (RiskDisposition::Reclaim, resolved_by),
        HandleRiskRequest::Deactivate {
            cancellation_date,
            resolved_by,
        } => (RiskDisposition::Deactivate { cancellation_date }, resolved_by),
    };
    let phone = state.detector.resolve(id, disposition, &resolved_by).await?;
    Ok(Json(phone))
}

/// Body for `POST /admin/employees/{id}/departed`.
#[derive(Debug, Default, Deserialize)]
pub struct DepartedRequest {
    #[serde(default)]
    pub termination_date: Option<NaiveDate>,
}

pub async fn employee_departed(
    State(state): State<AppState>,
    Path(id): Path<EmployeeId>,
    body: Option<Json<DepartedRequest>>,
) -> ApiResult<Json<DepartureSweep>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let date = req
        .termination_date
        .unwrap_or_else(|| Local::now().date_naive());
    let employee = state.directory.mark_departed(&id, date).await?;
    info!(employee = %employee.id, %date, "employee marked departed");
    let sweep = state.detector.flag_departed(&id).await?;
    Ok(Json(sweep))
}

// ============================================================================
// Campaigns
// ============================================================================

pub async fn initiate_batch(
    State(state): State<AppState>,
    Json(req): Json<CampaignRequest>,
) -> ApiResult<(StatusCode, Json<ProgressSnapshot>)> {
    let snapshot = state.orchestrator.initiate(req).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

pub async fn batch_status(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
) -> ApiResult<Json<ProgressSnapshot>> {
    Ok(Json(state.orchestrator.batch_status(id).await?))
}

/// Body for `POST /verification/batch/{id}/resend`.
#[derive(Debug, Default, Deserialize)]
pub struct ResendRequest {
    /// Restrict the retry to these employees; all failed recipients when
    /// omitted.
    #[serde(default)]
    pub employee_ids: Option<Vec<EmployeeId>>,
}

pub async fn resend_batch(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    body: Option<Json<ResendRequest>>,
) -> ApiResult<Json<ResendReport>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(state.orchestrator.resend(id, req.employee_ids).await?))
}

/// Query for `GET /verification/admin/phone-status`.
#[derive(Debug, Deserialize)]
pub struct PhoneStatusQuery {
    pub batch_id: CampaignId,
}

pub async fn phone_status(
    State(state): State<AppState>,
    Query(query): Query<PhoneStatusQuery>,
) -> ApiResult<Json<CampaignResults>> {
    Ok(Json(state.aggregator.results(query.batch_id).await?))
}
