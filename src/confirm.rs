//! Confirmation processing.
//!
//! The employee-facing half of a campaign: token-gated info reads and the
//! one-shot submission. A submission is all-or-nothing; every verdict and
//! unlisted entry is validated before the token is consumed or any state is
//! touched, and per-token serialization plus the store's consume-once
//! guarantee make exactly one of two racing submissions win.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::directory::EmployeeDirectory;
use crate::error::EngineError;
use crate::lifecycle;
use crate::model::{
    ConfirmationRecord, Employee, IssueReport, IssueStatus, PhoneId, PhoneNumber, PhoneOrigin,
    PhoneStatus, RiskCase, RiskReason, SubmissionPayload, TokenId, VerdictAction,
    VerificationToken, is_valid_phone_number,
};
use crate::observability::metrics;
use crate::store::Store;

/// What the verification page shows: the employee, their listed phones, and
/// numbers they self-reported in earlier campaigns.
#[derive(Debug, Clone, Serialize)]
pub struct EmployeeInfo {
    pub employee: Employee,
    pub phones: Vec<PhoneNumber>,
    pub unlisted_history: Vec<PhoneNumber>,
    pub expires_at: DateTime<Utc>,
}

/// Result of an accepted submission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionOutcome {
    pub confirmed: u64,
    pub issues_reported: u64,
    pub unlisted_created: u64,
}

enum PlannedVerdict {
    Confirm {
        phone: PhoneNumber,
        purpose: String,
    },
    Issue {
        phone: PhoneNumber,
        category: String,
        comment: String,
    },
}

/// Validates and applies token-gated confirmation submissions.
pub struct ConfirmationProcessor {
    store: Arc<dyn Store>,
    directory: Arc<dyn EmployeeDirectory>,
    /// One lock per token so two submissions against the same token are
    /// serialized; the consume-once flag in the store is the real gate.
    submit_locks: DashMap<TokenId, Arc<Mutex<()>>>,
}

impl ConfirmationProcessor {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, directory: Arc<dyn EmployeeDirectory>) -> Self {
        Self {
            store,
            directory,
            submit_locks: DashMap::new(),
        }
    }

    async fn live_token(&self, raw: &str) -> Result<VerificationToken, EngineError> {
        let id = raw
            .parse::<Uuid>()
            .map_err(|_| EngineError::validation("malformed verification token"))?;
        let token = self.store.token(TokenId(id)).await?;
        if token.consumed {
            return Err(EngineError::TokenAlreadyConsumed);
        }
        if token.is_expired(Utc::now()) {
            return Err(EngineError::TokenExpired {
                expired_at: token.expires_at,
            });
        }
        Ok(token)
    }

    /// Resolves a token to the employee's verification view.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] for a malformed token,
    /// [`EngineError::TokenAlreadyConsumed`] / [`EngineError::TokenExpired`]
    /// for a dead one.
    pub async fn employee_info(&self, raw_token: &str) -> Result<EmployeeInfo, EngineError> {
        let token = self.live_token(raw_token).await?;
        let employee = self
            .directory
            .get(&token.employee_id)
            .await?
            .ok_or_else(|| EngineError::not_found("employee", &token.employee_id))?;

        let mut phones = Vec::new();
        let mut unlisted_history = Vec::new();
        for phone in self.store.phones_for_employee(&token.employee_id).await? {
            if phone.status == PhoneStatus::Deactivated {
                continue;
            }
            match phone.origin {
                PhoneOrigin::Registered => phones.push(phone),
                PhoneOrigin::SelfReported { .. } => unlisted_history.push(phone),
            }
        }
        Ok(EmployeeInfo {
            employee,
            phones,
            unlisted_history,
            expires_at: token.expires_at,
        })
    }

    /// Applies a confirmation submission against a token.
    ///
    /// The payload is validated in full before any state changes; the token
    /// is then consumed (exactly once across racing submissions) and the
    /// verdicts applied.
    pub async fn submit(
        &self,
        raw_token: &str,
        payload: SubmissionPayload,
    ) -> Result<SubmissionOutcome, EngineError> {
        let token = self.live_token(raw_token).await?;
        let lock = Arc::clone(
            self.submit_locks
                .entry(token.token)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _guard = lock.lock().await;

        let plan = self.validate(&token, &payload).await?;

        // Point of no return. The store rejects the second of two racing
        // consumers even if they slipped past the lock on different nodes.
        let consumed = self.store.consume_token(token.token).await;
        // The consumed flag alone gates late submitters from here on; the
        // lock entry must not outlive the token, win or lose.
        self.submit_locks.remove(&token.token);
        let token = consumed?;
        let outcome = self.apply(&token, plan, payload.unlisted).await?;
        metrics::record_submission(
            outcome.confirmed,
            outcome.issues_reported,
            outcome.unlisted_created,
        );
        info!(
            employee = %token.employee_id,
            campaign = %token.campaign_id,
            confirmed = outcome.confirmed,
            issues = outcome.issues_reported,
            unlisted = outcome.unlisted_created,
            "submission accepted"
        );
        Ok(outcome)
    }

    async fn validate(
        &self,
        token: &VerificationToken,
        payload: &SubmissionPayload,
    ) -> Result<Vec<PlannedVerdict>, EngineError> {
        let mut plan = Vec::with_capacity(payload.phones.len());
        let mut seen = std::collections::HashSet::new();
        for verdict in &payload.phones {
            if !seen.insert(verdict.phone_id) {
                return Err(EngineError::Validation(format!(
                    "phone {} appears more than once in the submission",
                    verdict.phone_id
                )));
            }
            let phone = self.store.phone(verdict.phone_id).await?;
            let mine = phone.registrant_employee_id == token.employee_id
                || phone.current_user_employee_id.as_ref() == Some(&token.employee_id);
            if !mine {
                return Err(EngineError::Validation(format!(
                    "phone {} is not listed for this employee",
                    phone.number
                )));
            }
            match &verdict.action {
                VerdictAction::ConfirmUsage { purpose } => {
                    if purpose.trim().is_empty() {
                        return Err(EngineError::Validation(format!(
                            "purpose must not be empty when confirming {}",
                            phone.number
                        )));
                    }
                    plan.push(PlannedVerdict::Confirm {
                        phone,
                        purpose: purpose.clone(),
                    });
                }
                VerdictAction::ReportIssue { category, comment } => {
                    if category.trim().is_empty() {
                        return Err(EngineError::Validation(format!(
                            "issue category must not be empty for {}",
                            phone.number
                        )));
                    }
                    lifecycle::check_transition(phone.status, PhoneStatus::UserReported)?;
                    plan.push(PlannedVerdict::Issue {
                        phone,
                        category: category.clone(),
                        comment: comment.clone(),
                    });
                }
            }
        }

        for entry in &payload.unlisted {
            if !is_valid_phone_number(&entry.number) {
                return Err(EngineError::Validation(format!(
                    "'{}' is not a plausible phone number",
                    entry.number
                )));
            }
            if entry.purpose.trim().is_empty() {
                return Err(EngineError::Validation(format!(
                    "purpose must not be empty for unlisted number {}",
                    entry.number
                )));
            }
        }
        Ok(plan)
    }

    async fn apply(
        &self,
        token: &VerificationToken,
        plan: Vec<PlannedVerdict>,
        unlisted: Vec<crate::model::UnlistedEntry>,
    ) -> Result<SubmissionOutcome, EngineError> {
        let mut outcome = SubmissionOutcome::default();
        let now = Utc::now();

        for planned in plan {
            match planned {
                PlannedVerdict::Confirm { mut phone, purpose } => {
                    phone.purpose.clone_from(&purpose);
                    let record = ConfirmationRecord {
                        campaign_id: token.campaign_id,
                        phone_id: phone.id,
                        number: phone.number.clone(),
                        employee_id: token.employee_id.clone(),
                        purpose,
                        confirmed_at: now,
                    };
                    self.store.update_phone(phone).await?;
                    self.store.insert_confirmation(record).await?;
                    outcome.confirmed += 1;
                }
                PlannedVerdict::Issue {
                    mut phone,
                    category,
                    comment,
                } => {
                    let prior_status = phone.status;
                    phone.status = PhoneStatus::UserReported;
                    let issue = IssueReport {
                        id: Uuid::new_v4(),
                        campaign_id: token.campaign_id,
                        phone_id: phone.id,
                        number: phone.number.clone(),
                        reporter_employee_id: token.employee_id.clone(),
                        category,
                        comment,
                        reported_at: now,
                        admin_status: IssueStatus::Pending,
                    };
                    let case = RiskCase {
                        id: Uuid::new_v4(),
                        phone_id: phone.id,
                        reason: RiskReason::SelfReported,
                        prior_status,
                        detected_at: now,
                        resolution: None,
                    };
                    self.store.update_phone(phone).await?;
                    self.store.insert_issue(issue).await?;
                    match self.store.insert_risk_case(case).await {
                        // Already flagged by an earlier report; the existing
                        // case keeps its prior status.
                        Ok(()) | Err(EngineError::Conflict(_)) => {}
                        Err(err) => return Err(err),
                    }
                    metrics::record_risk_case(RiskReason::SelfReported);
                    outcome.issues_reported += 1;
                }
            }
        }

        let employee = self
            .directory
            .get(&token.employee_id)
            .await?
            .ok_or_else(|| EngineError::not_found("employee", &token.employee_id))?;
        for entry in unlisted {
            // A number another flow already registered stays as it is.
            if self.store.phone_by_number(&entry.number).await?.is_some() {
                continue;
            }
            let phone = PhoneNumber {
                id: PhoneId::new(),
                number: entry.number,
                status: PhoneStatus::Idle,
                registrant_employee_id: token.employee_id.clone(),
                current_user_employee_id: None,
                vendor: String::new(),
                purpose: entry.purpose,
                remarks: String::new(),
                application_date: Local::now().date_naive(),
                cancellation_date: None,
                department_id: employee.department_id.clone(),
                origin: PhoneOrigin::SelfReported {
                    campaign_id: token.campaign_id,
                },
                usage_history: Vec::new(),
            };
            match self.store.insert_phone(phone).await {
                Ok(()) => outcome.unlisted_created += 1,
                // Raced with another registration of the same number.
                Err(EngineError::Conflict(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DepartmentTree, InMemoryDirectory};
    use crate::model::tests::test_phone;
    use crate::model::{
        CampaignId, DepartmentId, EmployeeId, EmploymentStatus, PhoneVerdict, UnlistedEntry,
    };
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn employee(id: &str) -> Employee {
        Employee {
            id: EmployeeId::new(id),
            full_name: format!("Employee {id}"),
            department_id: DepartmentId::new("D10"),
            employment_status: EmploymentStatus::Active,
            email: format!("{id}@example.co.jp"),
            hire_date: NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
            termination_date: None,
        }
    }

    struct Fixture {
        processor: ConfirmationProcessor,
        store: Arc<MemoryStore>,
        campaign: CampaignId,
        token: TokenId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(InMemoryDirectory::new(DepartmentTree::default()));
        directory.upsert(employee("E1"));

        let campaign = CampaignId::new();
        let token = TokenId::new();
        store
            .insert_token(VerificationToken {
                token,
                campaign_id: campaign,
                employee_id: EmployeeId::new("E1"),
                issued_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::days(7),
                consumed: false,
            })
            .await
            .unwrap();

        let processor = ConfirmationProcessor::new(
            Arc::clone(&store) as Arc<dyn Store>,
            directory as Arc<dyn EmployeeDirectory>,
        );
        Fixture {
            processor,
            store,
            campaign,
            token,
        }
    }

    #[tokio::test]
    async fn info_lists_employee_phones() {
        let fx = fixture().await;
        let mut listed = test_phone();
        listed.status = PhoneStatus::InUse;
        listed.current_user_employee_id = Some(EmployeeId::new("E1"));
        let mut dead = test_phone();
        dead.id = PhoneId::new();
        dead.number = "090-0000-1111".to_string();
        dead.status = PhoneStatus::Deactivated;
        for phone in [&listed, &dead] {
            fx.store.insert_phone(phone.clone()).await.unwrap();
        }

        let info = fx
            .processor
            .employee_info(&fx.token.to_string())
            .await
            .unwrap();
        assert_eq!(info.employee.id, EmployeeId::new("E1"));
        assert_eq!(info.phones.len(), 1, "deactivated phones are hidden");
        assert_eq!(info.phones[0].id, listed.id);
    }

    #[tokio::test]
    async fn malformed_token_is_a_validation_error() {
        let fx = fixture().await;
        let err = fx.processor.employee_info("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let fx = fixture().await;
        let mut token = fx.store.token(fx.token).await.unwrap();
        token.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let expired = TokenId::new();
        token.token = expired;
        token.campaign_id = CampaignId::new();
        fx.store.insert_token(token).await.unwrap();

        let err = fx
            .processor
            .employee_info(&expired.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TokenExpired { .. }));
    }

    #[tokio::test]
    async fn confirm_updates_purpose_and_records() {
        let fx = fixture().await;
        let phone = test_phone();
        fx.store.insert_phone(phone.clone()).await.unwrap();

        let outcome = fx
            .processor
            .submit(
                &fx.token.to_string(),
                SubmissionPayload {
                    phones: vec![PhoneVerdict {
                        phone_id: phone.id,
                        action: VerdictAction::ConfirmUsage {
                            purpose: "on-call rotation".to_string(),
                        },
                    }],
                    unlisted: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.confirmed, 1);

        let updated = fx.store.phone(phone.id).await.unwrap();
        assert_eq!(updated.purpose, "on-call rotation");
        let records = fx
            .store
            .confirmations_for_campaign(fx.campaign)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, phone.number);
    }

    #[tokio::test]
    async fn empty_purpose_rejects_whole_submission() {
        let fx = fixture().await;
        let phone = test_phone();
        fx.store.insert_phone(phone.clone()).await.unwrap();

        let err = fx
            .processor
            .submit(
                &fx.token.to_string(),
                SubmissionPayload {
                    phones: vec![PhoneVerdict {
                        phone_id: phone.id,
                        action: VerdictAction::ConfirmUsage {
                            purpose: "   ".to_string(),
                        },
                    }],
                    unlisted: vec![UnlistedEntry {
                        number: "090-8888-9999".to_string(),
                        purpose: "personal hotspot".to_string(),
                    }],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Nothing was applied, the token is still live.
        assert!(!fx.store.token(fx.token).await.unwrap().consumed);
        assert!(
            fx.store
                .phone_by_number("090-8888-9999")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn issue_report_flags_phone_and_opens_case() {
        let fx = fixture().await;
        let mut phone = test_phone();
        phone.status = PhoneStatus::InUse;
        phone.current_user_employee_id = Some(EmployeeId::new("E1"));
        fx.store.insert_phone(phone.clone()).await.unwrap();

        let outcome = fx
            .processor
            .submit(
                &fx.token.to_string(),
                SubmissionPayload {
                    phones: vec![PhoneVerdict {
                        phone_id: phone.id,
                        action: VerdictAction::ReportIssue {
                            category: "not_mine".to_string(),
                            comment: "handed back last year".to_string(),
                        },
                    }],
                    unlisted: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.issues_reported, 1);

        let updated = fx.store.phone(phone.id).await.unwrap();
        assert_eq!(updated.status, PhoneStatus::UserReported);
        let case = fx.store.open_risk_case(phone.id).await.unwrap().unwrap();
        assert_eq!(case.reason, RiskReason::SelfReported);
        assert_eq!(case.prior_status, PhoneStatus::InUse);
        let issues = fx.store.issues_for_campaign(fx.campaign).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].admin_status, IssueStatus::Pending);
    }

    #[tokio::test]
    async fn unlisted_numbers_materialize_as_self_reported_rows() {
        let fx = fixture().await;
        let existing = test_phone();
        fx.store.insert_phone(existing.clone()).await.unwrap();

        let outcome = fx
            .processor
            .submit(
                &fx.token.to_string(),
                SubmissionPayload {
                    phones: Vec::new(),
                    unlisted: vec![
                        UnlistedEntry {
                            number: "090-8888-9999".to_string(),
                            purpose: "site survey".to_string(),
                        },
                        UnlistedEntry {
                            // Already registered; left alone.
                            number: existing.number.clone(),
                            purpose: "duplicate".to_string(),
                        },
                    ],
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.unlisted_created, 1);

        let created = fx
            .store
            .phone_by_number("090-8888-9999")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.status, PhoneStatus::Idle);
        assert_eq!(
            created.origin,
            PhoneOrigin::SelfReported {
                campaign_id: fx.campaign
            }
        );
        assert_eq!(created.registrant_employee_id, EmployeeId::new("E1"));
    }

    #[tokio::test]
    async fn second_submission_loses() {
        let fx = fixture().await;
        fx.processor
            .submit(&fx.token.to_string(), SubmissionPayload::default())
            .await
            .unwrap();
        let err = fx
            .processor
            .submit(&fx.token.to_string(), SubmissionPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TokenAlreadyConsumed));
    }

    #[tokio::test]
    async fn consumed_token_leaves_no_lock_behind() {
        let fx = fixture().await;
        fx.processor
            .submit(&fx.token.to_string(), SubmissionPayload::default())
            .await
            .unwrap();
        assert!(fx.processor.submit_locks.is_empty());
    }

    #[tokio::test]
    async fn racing_submissions_have_exactly_one_winner() {
        let fx = fixture().await;
        let processor = Arc::new(fx.processor);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let processor = Arc::clone(&processor);
            let raw = fx.token.to_string();
            tasks.spawn(async move { processor.submit(&raw, SubmissionPayload::default()).await });
        }
        let mut wins = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert!(processor.submit_locks.is_empty(), "losers evict their lock too");
    }

    #[tokio::test]
    async fn foreign_phone_is_rejected() {
        let fx = fixture().await;
        let mut phone = test_phone();
        phone.registrant_employee_id = EmployeeId::new("E9");
        fx.store.insert_phone(phone.clone()).await.unwrap();

        let err = fx
            .processor
            .submit(
                &fx.token.to_string(),
                SubmissionPayload {
                    phones: vec![PhoneVerdict {
                        phone_id: phone.id,
                        action: VerdictAction::ConfirmUsage {
                            purpose: "x".to_string(),
                        },
                    }],
                    unlisted: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
