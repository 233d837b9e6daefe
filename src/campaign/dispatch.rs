//! Notification dispatch.
//!
//! Bounded-concurrency email fan-out over the issued tokens, plus the
//! admin-triggered resend pass. One worker failure never aborts the batch;
//! per-recipient outcomes land in the campaign's error summary.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::directory::EmployeeDirectory;
use crate::error::EngineError;
use crate::mail::MailTransport;
use crate::model::{Campaign, DispatchFailure, Employee, EmployeeId, VerificationToken};
use crate::observability::metrics;
use crate::store::Store;

use super::progress::CampaignProgress;

/// Static mail composition settings, from configuration.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub from: String,
    pub subject_prefix: String,
    /// Public base URL embedded in verification links.
    pub base_url: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            from: "lineaudit@example.co.jp".to_string(),
            subject_prefix: "[LineAudit]".to_string(),
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

/// One unit of fan-out work: a token and the employee it was issued to.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub token: VerificationToken,
    pub employee: Employee,
}

/// Outcome of an admin-triggered resend pass. Separate from the campaign's
/// dispatch counters, which keep describing the original fan-out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResendReport {
    pub total_attempted: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub success_emails: Vec<String>,
    pub failed_emails: Vec<String>,
}

/// Runs the email fan-out for a campaign with a fixed worker budget.
pub struct NotificationDispatcher {
    mailer: Arc<dyn MailTransport>,
    workers: usize,
    settings: MailSettings,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(mailer: Arc<dyn MailTransport>, workers: usize, settings: MailSettings) -> Self {
        Self {
            mailer,
            workers: workers.max(1),
            settings,
        }
    }

    fn compose(&self, token: &VerificationToken, employee: &Employee) -> (String, String) {
        let subject = format!(
            "{} Phone usage verification for {}",
            self.settings.subject_prefix, employee.full_name
        );
        let link = format!(
            "{}/verification/info?token={}",
            self.settings.base_url, token.token
        );
        let body = format!(
            "Hello {name},\n\n\
             Please verify the company phone numbers registered to you.\n\
             Open the link below and confirm or report each listed number:\n\n\
             {link}\n\n\
             The link expires on {expires} (UTC). No login is required.\n",
            name = employee.full_name,
            link = link,
            expires = token.expires_at.format("%Y-%m-%d %H:%M"),
        );
        (subject, body)
    }

    async fn send_one(
        &self,
        token: &VerificationToken,
        employee: &Employee,
    ) -> Result<(), DispatchFailure> {
        let (subject, body) = self.compose(token, employee);
        self.mailer
            .send(&self.settings.from, &employee.email, &subject, &body)
            .await
            .map_err(|err| DispatchFailure {
                employee_id: employee.id.clone(),
                employee_name: employee.full_name.clone(),
                email: employee.email.clone(),
                reason: err.0,
            })
    }

    /// Fans the jobs out over at most `workers` concurrent sends, then
    /// finalizes the campaign status and persists the row.
    pub async fn dispatch(
        self: &Arc<Self>,
        progress: Arc<CampaignProgress>,
        store: Arc<dyn Store>,
        jobs: Vec<DispatchJob>,
    ) {
        let campaign_id = progress.campaign_id();
        info!(%campaign_id, jobs = jobs.len(), workers = self.workers, "dispatch started");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for job in jobs {
            let dispatcher = Arc::clone(self);
            let progress = Arc::clone(&progress);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closing the semaphore is not part of this flow; acquire
                // only fails if it were.
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                progress.record_attempt();
                match dispatcher.send_one(&job.token, &job.employee).await {
                    Ok(()) => {
                        metrics::record_email_outcome(true);
                        progress.record_success();
                    }
                    Err(failure) => {
                        metrics::record_email_outcome(false);
                        warn!(
                            employee = %failure.employee_id,
                            reason = %failure.reason,
                            "verification email failed"
                        );
                        progress.record_failure(failure);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(%campaign_id, error = %err, "dispatch worker panicked");
                progress.record_fatal(format!("dispatch worker panicked: {err}"));
            }
        }

        let terminal = progress.finalize();
        metrics::record_campaign_terminal(terminal);
        info!(%campaign_id, status = %terminal, "dispatch finished");

        if let Err(err) = self.persist(&progress, store.as_ref()).await {
            // The campaign ran; the row just could not be written back.
            error!(%campaign_id, error = %err, "failed to persist campaign outcome");
            progress.record_fatal(format!("failed to persist campaign outcome: {err}"));
            progress.finalize();
        }
    }

    async fn persist(
        &self,
        progress: &CampaignProgress,
        store: &dyn Store,
    ) -> Result<(), EngineError> {
        let mut campaign: Campaign = store.campaign(progress.campaign_id()).await?;
        progress.sync_into(&mut campaign);
        store.update_campaign(campaign).await
    }

    /// Retries delivery for the employees in the error summary (or the
    /// given subset of them). Successful retries drain the summary; the
    /// original dispatch counters are left untouched.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] if any targeted token has expired. The
    /// pass then applies nothing; re-verification takes a new campaign.
    pub async fn resend(
        &self,
        progress: &CampaignProgress,
        store: &dyn Store,
        directory: &dyn EmployeeDirectory,
        employees: Option<Vec<EmployeeId>>,
    ) -> Result<ResendReport, EngineError> {
        let campaign_id = progress.campaign_id();
        let in_summary = progress.failure_ids();
        let targets: Vec<EmployeeId> = match employees {
            Some(requested) => requested
                .into_iter()
                .filter(|id| in_summary.contains(id))
                .collect(),
            None => in_summary,
        };
        debug!(%campaign_id, targets = targets.len(), "resend started");

        // Tokens are never reissued here. An expired one means the campaign
        // window is over, so the pass is refused before anything is sent.
        let now = chrono::Utc::now();
        for employee_id in &targets {
            if let Some(token) = store.token_for(campaign_id, employee_id).await? {
                if token.is_expired(now) {
                    return Err(EngineError::Validation(format!(
                        "token for employee '{}' expired on {}; start a new campaign to re-verify",
                        employee_id,
                        token.expires_at.format("%Y-%m-%d")
                    )));
                }
            }
        }

        let mut report = ResendReport::default();
        for employee_id in targets {
            report.total_attempted += 1;
            match self
                .resend_one(progress, store, directory, &employee_id)
                .await
            {
                Ok(email) => {
                    metrics::record_email_outcome(true);
                    progress.remove_failure(&employee_id);
                    report.success_count += 1;
                    report.success_emails.push(email);
                }
                Err(failure) => {
                    metrics::record_email_outcome(false);
                    report.failed_count += 1;
                    report.failed_emails.push(failure.email.clone());
                    progress.update_failure_reason(failure);
                }
            }
        }

        let status = progress.refresh_terminal_status();
        info!(
            %campaign_id,
            succeeded = report.success_count,
            failed = report.failed_count,
            status = %status,
            "resend finished"
        );
        self.persist(progress, store).await?;
        Ok(report)
    }

    async fn resend_one(
        &self,
        progress: &CampaignProgress,
        store: &dyn Store,
        directory: &dyn EmployeeDirectory,
        employee_id: &EmployeeId,
    ) -> Result<String, DispatchFailure> {
        let stub = |reason: String| DispatchFailure {
            employee_id: employee_id.clone(),
            employee_name: String::new(),
            email: String::new(),
            reason,
        };

        let employee = directory
            .get(employee_id)
            .await
            .map_err(|err| stub(err.to_string()))?
            .ok_or_else(|| stub("employee no longer in directory".to_string()))?;
        let token = store
            .token_for(progress.campaign_id(), employee_id)
            .await
            .map_err(|err| stub(err.to_string()))?
            .ok_or_else(|| stub("no token issued for employee".to_string()))?;

        self.send_one(&token, &employee)
            .await
            .map(|()| employee.email.clone())
    }
}
