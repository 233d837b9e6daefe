//! Phone lifecycle state machine.
//!
//! The transition table is the single source of truth for which status
//! changes a generic update may apply. It is expressed as a total match
//! over [`PhoneStatus`], so adding a state without deciding its legal
//! targets fails to compile.

use chrono::NaiveDate;

use crate::error::EngineError;
use crate::model::{Employee, EmployeeId, PhoneNumber, PhoneStatus, UsagePeriod};

use PhoneStatus::{
    CardReplacing, Deactivated, Idle, InUse, PendingDeactivationAdmin, PendingDeactivationUser,
    RiskPending, Suspended, UserReported,
};

/// Statuses a phone may be created with. Everything else only arises from
/// operations on an existing phone.
pub const CREATABLE_STATUSES: [PhoneStatus; 4] =
    [Idle, PendingDeactivationAdmin, Suspended, CardReplacing];

/// Legal targets a generic update may move a phone to, per source state.
///
/// Self-loops are listed explicitly: an update that does not change the
/// status is always permitted. `risk_pending` is only entered by the risk
/// detector and only left through a risk disposition, never through a
/// generic update.
#[must_use]
pub const fn allowed_targets(from: PhoneStatus) -> &'static [PhoneStatus] {
    match from {
        Idle => &[
            Idle,
            PendingDeactivationAdmin,
            PendingDeactivationUser,
            UserReported,
            Deactivated,
            Suspended,
            CardReplacing,
        ],
        InUse => &[
            InUse,
            PendingDeactivationAdmin,
            PendingDeactivationUser,
            UserReported,
            Deactivated,
            Suspended,
            CardReplacing,
        ],
        PendingDeactivationUser => &[
            PendingDeactivationUser,
            InUse,
            UserReported,
            Deactivated,
            Suspended,
            CardReplacing,
        ],
        PendingDeactivationAdmin => &[
            PendingDeactivationAdmin,
            InUse,
            UserReported,
            Deactivated,
            Suspended,
            CardReplacing,
        ],
        UserReported => &[
            UserReported,
            InUse,
            PendingDeactivationAdmin,
            PendingDeactivationUser,
            Deactivated,
            Suspended,
            CardReplacing,
        ],
        Deactivated => &[
            Deactivated,
            Idle,
            PendingDeactivationAdmin,
            PendingDeactivationUser,
            UserReported,
            Suspended,
            CardReplacing,
        ],
        RiskPending => &[RiskPending],
        Suspended => &[
            Suspended,
            Idle,
            InUse,
            PendingDeactivationAdmin,
            PendingDeactivationUser,
            Deactivated,
        ],
        CardReplacing => &[
            CardReplacing,
            Idle,
            InUse,
            PendingDeactivationAdmin,
            PendingDeactivationUser,
            Deactivated,
        ],
    }
}

/// Checks a status change against the transition table.
///
/// # Errors
///
/// Returns [`EngineError::TransitionRejected`] with both sides of the
/// rejected transition.
pub fn check_transition(from: PhoneStatus, to: PhoneStatus) -> Result<(), EngineError> {
    let mut targets = allowed_targets(from).iter();
    if targets.any(|t| *t == to) {
        Ok(())
    } else {
        Err(EngineError::TransitionRejected { from, to })
    }
}

/// Checks that `status` is a legal creation status.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] naming the offending status.
pub fn check_creation_status(status: PhoneStatus) -> Result<(), EngineError> {
    if CREATABLE_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "phones cannot be created with status '{status}'; allowed: idle, \
             pending_deactivation_admin, suspended, card_replacing"
        )))
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Fields a generic phone update may change. Absent fields are untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PhoneUpdate {
    pub status: Option<PhoneStatus>,
    pub vendor: Option<String>,
    pub purpose: Option<String>,
    pub remarks: Option<String>,
    pub cancellation_date: Option<NaiveDate>,
    pub department_id: Option<crate::model::DepartmentId>,
}

/// Applies a validated update to a phone.
///
/// Status changes are checked against the transition table; moving to
/// `deactivated` requires a cancellation date (either in the update or
/// already on the record).
///
/// # Errors
///
/// [`EngineError::TransitionRejected`] for an illegal status change,
/// [`EngineError::Validation`] for a deactivation without a date.
pub fn apply_update(phone: &mut PhoneNumber, update: PhoneUpdate) -> Result<(), EngineError> {
    if let Some(to) = update.status {
        check_transition(phone.status, to)?;
        if to == Deactivated && update.cancellation_date.is_none() && phone.cancellation_date.is_none()
        {
            return Err(EngineError::validation(
                "cancellation_date is required when setting status to 'deactivated'",
            ));
        }
        phone.status = to;
    }
    if let Some(vendor) = update.vendor {
        phone.vendor = vendor;
    }
    if let Some(purpose) = update.purpose {
        phone.purpose = purpose;
    }
    if let Some(remarks) = update.remarks {
        phone.remarks = remarks;
    }
    if let Some(date) = update.cancellation_date {
        phone.cancellation_date = Some(date);
    }
    if let Some(department) = update.department_id {
        phone.department_id = department;
    }
    Ok(())
}

/// Assigns a phone to an employee, opening a usage-history entry.
///
/// Only `idle` and `deactivated` phones may be assigned, and only to an
/// Active employee.
///
/// # Errors
///
/// [`EngineError::TransitionRejected`] when the phone is in any other
/// status, [`EngineError::Validation`] for a non-Active employee.
pub fn assign(phone: &mut PhoneNumber, employee: &Employee, today: NaiveDate) -> Result<(), EngineError> {
    if !employee.is_active() {
        return Err(EngineError::Validation(format!(
            "cannot assign phone to departed employee {}",
            employee.id
        )));
    }
    if !matches!(phone.status, Idle | Deactivated) {
        return Err(EngineError::TransitionRejected {
            from: phone.status,
            to: InUse,
        });
    }
    phone.status = InUse;
    phone.current_user_employee_id = Some(employee.id.clone());
    phone.usage_history.push(UsagePeriod {
        employee_id: employee.id.clone(),
        start_date: today,
        end_date: None,
    });
    Ok(())
}

/// Unassigns an `in_use` phone: closes the open usage entry with today's
/// date, clears the current user, and returns the phone to `idle`.
///
/// # Errors
///
/// [`EngineError::TransitionRejected`] when the phone is not `in_use`.
pub fn unassign(phone: &mut PhoneNumber, today: NaiveDate) -> Result<(), EngineError> {
    if phone.status != InUse {
        return Err(EngineError::TransitionRejected {
            from: phone.status,
            to: Idle,
        });
    }
    close_open_usage(phone, today);
    phone.status = Idle;
    phone.current_user_employee_id = None;
    Ok(())
}

/// Administrative disposition applied to a risk phone.
#[derive(Debug, Clone)]
pub enum RiskDisposition {
    /// Re-register the phone to an Active employee and restore the
    /// pre-risk status.
    ChangeApplicant { new_registrant: EmployeeId },
    /// Take the phone back into the pool.
    Reclaim,
    /// Cancel the line.
    Deactivate { cancellation_date: Option<NaiveDate> },
}

/// Applies a risk disposition to a phone in `risk_pending` or
/// `user_reported` status.
///
/// `prior_status` is the status recorded on the risk case when the phone
/// was flagged; `change_applicant` restores it. The caller verifies that
/// the new registrant is an Active employee before calling.
///
/// # Errors
///
/// [`EngineError::TransitionRejected`] when the phone is in any other
/// status.
pub fn resolve_risk(
    phone: &mut PhoneNumber,
    prior_status: PhoneStatus,
    disposition: &RiskDisposition,
    today: NaiveDate,
) -> Result<(), EngineError> {
    if !matches!(phone.status, RiskPending | UserReported) {
        return Err(EngineError::TransitionRejected {
            from: phone.status,
            to: match disposition {
                RiskDisposition::ChangeApplicant { .. } => prior_status,
                RiskDisposition::Reclaim => Idle,
                RiskDisposition::Deactivate { .. } => Deactivated,
            },
        });
    }
    match disposition {
        RiskDisposition::ChangeApplicant { new_registrant } => {
            phone.registrant_employee_id = new_registrant.clone();
            phone.status = prior_status;
        }
        RiskDisposition::Reclaim => {
            close_open_usage(phone, today);
            phone.current_user_employee_id = None;
            phone.status = Idle;
        }
        RiskDisposition::Deactivate { cancellation_date } => {
            phone.cancellation_date = Some(cancellation_date.unwrap_or(today));
            phone.status = Deactivated;
        }
    }
    Ok(())
}

fn close_open_usage(phone: &mut PhoneNumber, today: NaiveDate) {
    if let Some(idx) = phone.open_usage_index() {
        phone.usage_history[idx].end_date = Some(today);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::test_phone;
    use crate::model::{DepartmentId, EmploymentStatus};

    fn active_employee(id: &str) -> Employee {
        Employee {
            id: EmployeeId::new(id),
            full_name: "Mina Okabe".to_string(),
            department_id: DepartmentId::new("D10"),
            employment_status: EmploymentStatus::Active,
            email: format!("{id}@example.co.jp"),
            hire_date: NaiveDate::from_ymd_opt(2020, 4, 1).unwrap(),
            termination_date: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
    }

    #[test]
    fn every_unlisted_pair_is_rejected() {
        for from in PhoneStatus::ALL {
            let allowed = allowed_targets(from);
            for to in PhoneStatus::ALL {
                let result = check_transition(from, to);
                if allowed.contains(&to) {
                    assert!(result.is_ok(), "expected {from} -> {to} to be allowed");
                } else {
                    match result {
                        Err(EngineError::TransitionRejected { from: f, to: t }) => {
                            assert_eq!(f, from);
                            assert_eq!(t, to);
                        }
                        other => panic!("expected rejection for {from} -> {to}, got {other:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn self_loops_are_always_allowed_except_documented() {
        // Every state permits a no-op status write (self-loop in the table).
        for status in PhoneStatus::ALL {
            assert!(check_transition(status, status).is_ok(), "{status} self-loop");
        }
    }

    #[test]
    fn risk_pending_unreachable_by_update() {
        for from in PhoneStatus::ALL {
            if from == PhoneStatus::RiskPending {
                continue;
            }
            assert!(
                check_transition(from, PhoneStatus::RiskPending).is_err(),
                "{from} -> risk_pending must be rejected"
            );
        }
    }

    #[test]
    fn creation_status_restriction() {
        for status in CREATABLE_STATUSES {
            assert!(check_creation_status(status).is_ok());
        }
        for status in [
            PhoneStatus::InUse,
            PhoneStatus::PendingDeactivationUser,
            PhoneStatus::UserReported,
            PhoneStatus::RiskPending,
            PhoneStatus::Deactivated,
        ] {
            match check_creation_status(status) {
                Err(EngineError::Validation(msg)) => {
                    assert!(msg.contains(status.as_str()), "message names the status");
                }
                other => panic!("expected validation error for {status}, got {other:?}"),
            }
        }
    }

    #[test]
    fn deactivation_requires_cancellation_date() {
        let mut phone = test_phone();
        let err = apply_update(
            &mut phone,
            PhoneUpdate {
                status: Some(PhoneStatus::Deactivated),
                ..PhoneUpdate::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(phone.status, PhoneStatus::Idle, "phone untouched on error");

        apply_update(
            &mut phone,
            PhoneUpdate {
                status: Some(PhoneStatus::Deactivated),
                cancellation_date: Some(today()),
                ..PhoneUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(phone.status, PhoneStatus::Deactivated);
        assert_eq!(phone.cancellation_date, Some(today()));
    }

    #[test]
    fn update_rejects_illegal_transition_before_touching_fields() {
        let mut phone = test_phone();
        phone.status = PhoneStatus::Suspended;
        let err = apply_update(
            &mut phone,
            PhoneUpdate {
                status: Some(PhoneStatus::UserReported),
                purpose: Some("changed".to_string()),
                ..PhoneUpdate::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::TransitionRejected { .. }));
        assert_eq!(phone.purpose, "field sales", "no partial application");
    }

    #[test]
    fn assign_opens_usage_history() {
        let mut phone = test_phone();
        let emp = active_employee("E7");
        assign(&mut phone, &emp, today()).unwrap();
        assert_eq!(phone.status, PhoneStatus::InUse);
        assert_eq!(phone.current_user_employee_id, Some(emp.id.clone()));
        assert_eq!(phone.usage_history.len(), 1);
        assert_eq!(phone.usage_history[0].start_date, today());
        assert!(phone.usage_history[0].end_date.is_none());
    }

    #[test]
    fn assign_in_use_phone_fails() {
        let mut phone = test_phone();
        let emp = active_employee("E7");
        assign(&mut phone, &emp, today()).unwrap();
        let err = assign(&mut phone, &active_employee("E8"), today()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::TransitionRejected {
                from: PhoneStatus::InUse,
                to: PhoneStatus::InUse
            }
        ));
        assert_eq!(phone.usage_history.len(), 1, "no second entry opened");
    }

    #[test]
    fn assign_to_departed_employee_fails() {
        let mut phone = test_phone();
        let mut emp = active_employee("E7");
        emp.employment_status = EmploymentStatus::Departed;
        assert!(matches!(
            assign(&mut phone, &emp, today()),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn assign_deactivated_phone_reactivates() {
        let mut phone = test_phone();
        phone.status = PhoneStatus::Deactivated;
        assign(&mut phone, &active_employee("E7"), today()).unwrap();
        assert_eq!(phone.status, PhoneStatus::InUse);
    }

    #[test]
    fn unassign_closes_history_and_idles() {
        let mut phone = test_phone();
        let emp = active_employee("E7");
        assign(&mut phone, &emp, NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()).unwrap();
        unassign(&mut phone, today()).unwrap();
        assert_eq!(phone.status, PhoneStatus::Idle);
        assert!(phone.current_user_employee_id.is_none());
        assert_eq!(phone.usage_history[0].end_date, Some(today()));
    }

    #[test]
    fn unassign_requires_in_use() {
        let mut phone = test_phone();
        assert!(matches!(
            unassign(&mut phone, today()),
            Err(EngineError::TransitionRejected { .. })
        ));
    }

    #[test]
    fn reclaim_clears_user_and_idles() {
        let mut phone = test_phone();
        assign(&mut phone, &active_employee("E7"), today()).unwrap();
        phone.status = PhoneStatus::RiskPending;
        resolve_risk(&mut phone, PhoneStatus::InUse, &RiskDisposition::Reclaim, today()).unwrap();
        assert_eq!(phone.status, PhoneStatus::Idle);
        assert!(phone.current_user_employee_id.is_none());
        assert_eq!(phone.usage_history[0].end_date, Some(today()));
    }

    #[test]
    fn change_applicant_restores_prior_status() {
        let mut phone = test_phone();
        phone.status = PhoneStatus::RiskPending;
        resolve_risk(
            &mut phone,
            PhoneStatus::InUse,
            &RiskDisposition::ChangeApplicant {
                new_registrant: EmployeeId::new("E9"),
            },
            today(),
        )
        .unwrap();
        assert_eq!(phone.status, PhoneStatus::InUse);
        assert_eq!(phone.registrant_employee_id, EmployeeId::new("E9"));
    }

    #[test]
    fn deactivate_disposition_defaults_cancellation_to_today() {
        let mut phone = test_phone();
        phone.status = PhoneStatus::UserReported;
        resolve_risk(
            &mut phone,
            PhoneStatus::InUse,
            &RiskDisposition::Deactivate {
                cancellation_date: None,
            },
            today(),
        )
        .unwrap();
        assert_eq!(phone.status, PhoneStatus::Deactivated);
        assert_eq!(phone.cancellation_date, Some(today()));
    }

    #[test]
    fn risk_disposition_requires_risk_status() {
        let mut phone = test_phone();
        assert!(matches!(
            resolve_risk(&mut phone, PhoneStatus::Idle, &RiskDisposition::Reclaim, today()),
            Err(EngineError::TransitionRejected { .. })
        ));
    }
}
