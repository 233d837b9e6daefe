//! Risk detection and disposition.
//!
//! When an employee departs, every phone registered to them becomes an
//! unaccountable asset. The detector flags those phones `risk_pending` and
//! opens a risk case recording the pre-flag status; an administrator later
//! resolves each case with one of the three dispositions.

use std::sync::Arc;

use chrono::{Local, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::directory::EmployeeDirectory;
use crate::error::EngineError;
use crate::lifecycle::{self, RiskDisposition};
use crate::model::{
    EmployeeId, PhoneId, PhoneNumber, PhoneStatus, RiskCase, RiskReason, RiskResolution,
};
use crate::observability::metrics;
use crate::store::Store;

/// Result of a departure sweep over one employee's registered phones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DepartureSweep {
    pub flagged: Vec<PhoneId>,
    /// Phones skipped because they were deactivated or already flagged.
    pub skipped: Vec<PhoneId>,
}

/// Flags at-risk phones and applies administrative dispositions.
pub struct RiskDetector {
    store: Arc<dyn Store>,
    directory: Arc<dyn EmployeeDirectory>,
}

impl RiskDetector {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, directory: Arc<dyn EmployeeDirectory>) -> Self {
        Self { store, directory }
    }

    /// Sweeps the phones registered to a departed employee, flagging each
    /// one `risk_pending` and opening a case that remembers the prior
    /// status. Deactivated and already-flagged phones are skipped, which
    /// makes the sweep idempotent.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] if the employee is still Active,
    /// [`EngineError::NotFound`] if the directory does not know them.
    pub async fn flag_departed(&self, employee_id: &EmployeeId) -> Result<DepartureSweep, EngineError> {
        let employee = self
            .directory
            .get(employee_id)
            .await?
            .ok_or_else(|| EngineError::not_found("employee", employee_id))?;
        if employee.is_active() {
            return Err(EngineError::Validation(format!(
                "employee {employee_id} is still active; mark the departure first"
            )));
        }

        let mut sweep = DepartureSweep::default();
        for phone in self.store.phones_by_registrant(employee_id).await? {
            if matches!(
                phone.status,
                PhoneStatus::Deactivated | PhoneStatus::RiskPending
            ) {
                sweep.skipped.push(phone.id);
                continue;
            }
            let phone_id = phone.id;
            match self.flag_one(phone).await {
                Ok(id) => sweep.flagged.push(id),
                // A concurrent sweep already opened the case; same outcome.
                Err(EngineError::Conflict(_)) => sweep.skipped.push(phone_id),
                Err(err) => return Err(err),
            }
        }
        info!(
            employee = %employee_id,
            flagged = sweep.flagged.len(),
            skipped = sweep.skipped.len(),
            "departure sweep finished"
        );
        Ok(sweep)
    }

    async fn flag_one(&self, mut phone: PhoneNumber) -> Result<PhoneId, EngineError> {
        let case = RiskCase {
            id: Uuid::new_v4(),
            phone_id: phone.id,
            reason: RiskReason::RegistrantDeparted,
            prior_status: phone.status,
            detected_at: Utc::now(),
            resolution: None,
        };
        // The open-case uniqueness constraint is the idempotency gate; the
        // phone row is only touched after the case insert wins.
        self.store.insert_risk_case(case).await?;
        phone.status = PhoneStatus::RiskPending;
        self.store.update_phone(phone.clone()).await?;
        metrics::record_risk_case(RiskReason::RegistrantDeparted);
        warn!(phone = %phone.id, number = %phone.number, "phone flagged for risk");
        Ok(phone.id)
    }

    /// Applies an administrative disposition to a flagged phone and closes
    /// its open case.
    ///
    /// The prior status restored by `change_applicant` comes from the open
    /// case; a phone in `user_reported` without a case falls back to `idle`.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransitionRejected`] if the phone is not flagged,
    /// [`EngineError::Validation`] if a new registrant is not Active.
    pub async fn resolve(
        &self,
        phone_id: PhoneId,
        disposition: RiskDisposition,
        resolved_by: &str,
    ) -> Result<PhoneNumber, EngineError> {
        if let RiskDisposition::ChangeApplicant { new_registrant } = &disposition {
            let employee = self
                .directory
                .get(new_registrant)
                .await?
                .ok_or_else(|| EngineError::not_found("employee", new_registrant))?;
            if !employee.is_active() {
                return Err(EngineError::Validation(format!(
                    "new registrant {new_registrant} is not an active employee"
                )));
            }
        }

        let mut phone = self.store.phone(phone_id).await?;
        let open_case = self.store.open_risk_case(phone_id).await?;
        let prior_status = open_case
            .as_ref()
            .map_or(PhoneStatus::Idle, |case| case.prior_status);

        let today = Local::now().date_naive();
        lifecycle::resolve_risk(&mut phone, prior_status, &disposition, today)?;
        self.store.update_phone(phone.clone()).await?;

        if let Some(mut case) = open_case {
            case.resolution = Some(RiskResolution {
                action: match disposition {
                    RiskDisposition::ChangeApplicant { .. } => crate::model::RiskAction::ChangeApplicant,
                    RiskDisposition::Reclaim => crate::model::RiskAction::Reclaim,
                    RiskDisposition::Deactivate { .. } => crate::model::RiskAction::Deactivate,
                },
                resolved_by: resolved_by.to_string(),
                resolved_at: Utc::now(),
            });
            self.store.update_risk_case(case).await?;
        }
        info!(phone = %phone_id, status = %phone.status, resolved_by, "risk case resolved");
        Ok(phone)
    }
}
