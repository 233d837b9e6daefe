//! Campaign initiation and status.
//!
//! The orchestrator owns the progress registry. Initiation resolves the
//! scope against the directory once, issues one token per recipient, and
//! hands the fan-out to the dispatcher on a background task; the HTTP
//! handler returns as soon as the campaign is accepted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, LocalResult, TimeZone, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{error, info};

use crate::directory::EmployeeDirectory;
use crate::error::EngineError;
use crate::model::{
    Campaign, CampaignId, CampaignScope, CampaignStatus, Employee, TokenId, VerificationToken,
};
use crate::observability::metrics;
use crate::store::Store;

use super::dispatch::{DispatchJob, NotificationDispatcher, ResendReport};
use super::progress::{CampaignProgress, ProgressSnapshot};

/// Request body for initiating a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignRequest {
    #[serde(flatten)]
    pub scope: CampaignScope,
    /// Token validity in days; the configured default applies when omitted.
    pub duration_days: Option<u32>,
}

/// Drives campaigns end to end and serves their status.
pub struct CampaignOrchestrator {
    store: Arc<dyn Store>,
    directory: Arc<dyn EmployeeDirectory>,
    dispatcher: Arc<NotificationDispatcher>,
    progress: DashMap<CampaignId, Arc<CampaignProgress>>,
    default_duration_days: u32,
    max_duration_days: u32,
}

impl CampaignOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn EmployeeDirectory>,
        dispatcher: Arc<NotificationDispatcher>,
        default_duration_days: u32,
        max_duration_days: u32,
    ) -> Self {
        Self {
            store,
            directory,
            dispatcher,
            progress: DashMap::new(),
            default_duration_days,
            max_duration_days,
        }
    }

    /// Creates a campaign, issues its tokens, and spawns the email fan-out.
    /// Returns the accepted campaign's initial snapshot.
    pub async fn initiate(&self, request: CampaignRequest) -> Result<ProgressSnapshot, EngineError> {
        let duration_days = request.duration_days.unwrap_or(self.default_duration_days);
        if duration_days == 0 || duration_days > self.max_duration_days {
            return Err(EngineError::validation(format!(
                "duration_days must be between 1 and {}",
                self.max_duration_days
            )));
        }

        let recipients = self.resolve_scope(&request.scope).await?;
        let campaign_id = CampaignId::new();
        let now = Utc::now();
        let mut campaign = Campaign {
            id: campaign_id,
            scope: request.scope,
            duration_days,
            status: CampaignStatus::Pending,
            total_employees: recipients.len() as u64,
            tokens_generated: 0,
            emails_attempted: 0,
            emails_succeeded: 0,
            emails_failed: 0,
            error_summary: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_campaign(campaign.clone()).await?;
        info!(
            %campaign_id,
            recipients = recipients.len(),
            duration_days,
            "campaign accepted"
        );

        let progress = Arc::new(CampaignProgress::new(campaign_id, campaign.total_employees));
        self.progress.insert(campaign_id, Arc::clone(&progress));

        let expires_at = token_expiry(Local::now(), duration_days);
        let mut jobs = Vec::with_capacity(recipients.len());
        for employee in recipients {
            let token = VerificationToken {
                token: TokenId::new(),
                campaign_id,
                employee_id: employee.id.clone(),
                issued_at: Utc::now(),
                expires_at,
                consumed: false,
            };
            if let Err(err) = self.store.insert_token(token.clone()).await {
                // Token issuance is all-or-nothing; a partial batch must not
                // reach employees.
                error!(%campaign_id, error = %err, "token issuance failed");
                progress.record_fatal(format!("token issuance failed: {err}"));
                progress.finalize();
                progress.sync_into(&mut campaign);
                self.store.update_campaign(campaign).await?;
                return Err(err);
            }
            jobs.push(DispatchJob { token, employee });
        }
        progress.set_tokens_generated(jobs.len() as u64);
        progress.mark_in_progress();
        progress.sync_into(&mut campaign);
        self.store.update_campaign(campaign).await?;
        metrics::record_campaign_initiated(jobs.len() as u64);

        let dispatcher = Arc::clone(&self.dispatcher);
        let store = Arc::clone(&self.store);
        let spawned = Arc::clone(&progress);
        tokio::spawn(async move {
            dispatcher.dispatch(spawned, store, jobs).await;
        });

        Ok(progress.snapshot())
    }

    /// Resolves the scope rule into a deduplicated recipient list. The list
    /// is a snapshot; directory changes after this point do not affect the
    /// campaign.
    async fn resolve_scope(&self, scope: &CampaignScope) -> Result<Vec<Employee>, EngineError> {
        let mut recipients = match scope {
            CampaignScope::AllUsers => self.directory.all_active().await?,
            CampaignScope::Departments(roots) => {
                if roots.is_empty() {
                    return Err(EngineError::validation(
                        "departments scope requires at least one department",
                    ));
                }
                self.directory.active_in_departments(roots).await?
            }
            CampaignScope::Employees(ids) => {
                if ids.is_empty() {
                    return Err(EngineError::validation(
                        "employees scope requires at least one employee",
                    ));
                }
                let mut explicit = Vec::with_capacity(ids.len());
                for id in ids {
                    let employee = self
                        .directory
                        .get(id)
                        .await?
                        .ok_or_else(|| EngineError::not_found("employee", id))?;
                    explicit.push(employee);
                }
                explicit
            }
        };

        let mut seen = std::collections::HashSet::new();
        recipients.retain(|e| seen.insert(e.id.clone()));
        Ok(recipients)
    }

    /// Live snapshot of a campaign, rebuilding progress from the persisted
    /// row when the in-memory registry has no entry (e.g. after a restart).
    pub async fn batch_status(&self, id: CampaignId) -> Result<ProgressSnapshot, EngineError> {
        Ok(self.ensure_progress(id).await?.snapshot())
    }

    /// Re-delivers verification emails for failed recipients. Only legal
    /// once the original dispatch has reached a terminal status.
    pub async fn resend(
        &self,
        id: CampaignId,
        employees: Option<Vec<crate::model::EmployeeId>>,
    ) -> Result<ResendReport, EngineError> {
        let progress = self.ensure_progress(id).await?;
        if !progress.status().is_terminal() {
            return Err(EngineError::Conflict(
                "campaign dispatch is still in progress".to_string(),
            ));
        }
        self.dispatcher
            .resend(
                progress.as_ref(),
                self.store.as_ref(),
                self.directory.as_ref(),
                employees,
            )
            .await
    }

    async fn ensure_progress(
        &self,
        id: CampaignId,
    ) -> Result<Arc<CampaignProgress>, EngineError> {
        if let Some(existing) = self.progress.get(&id) {
            return Ok(Arc::clone(existing.value()));
        }
        let campaign = self.store.campaign(id).await?;
        let rebuilt = Arc::new(CampaignProgress::from_campaign(&campaign));
        Ok(self
            .progress
            .entry(id)
            .or_insert(rebuilt)
            .value()
            .clone())
    }
}

/// Expiry for tokens issued "now": the last second of the local calendar day
/// `duration_days` from today, stored in UTC.
fn token_expiry(now: DateTime<Local>, duration_days: u32) -> DateTime<Utc> {
    let date = now.date_naive() + Duration::days(i64::from(duration_days));
    let end_of_day = date
        .and_hms_opt(23, 59, 59)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
    match Local.from_local_datetime(&end_of_day) {
        LocalResult::Single(local) | LocalResult::Ambiguous(local, _) => local.with_timezone(&Utc),
        // A DST gap at end of day cannot occur in practice; fall back to
        // reading the naive time as UTC.
        LocalResult::None => Utc.from_utc_datetime(&end_of_day),
    }
}
