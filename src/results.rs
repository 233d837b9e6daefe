//! Campaign results aggregation.
//!
//! Read-side rollup of what a campaign produced so far: confirmations,
//! reported issues, employees who have not responded, and the numbers they
//! self-reported. Every call reads live state; nothing is cached, so the
//! report is valid mid-campaign as well as after it closes.

use std::sync::Arc;

use serde::Serialize;

use crate::error::EngineError;
use crate::directory::EmployeeDirectory;
use crate::model::{
    Campaign, CampaignId, ConfirmationRecord, EmployeeId, IssueReport, PhoneNumber, PhoneOrigin,
    PhoneStatus,
};
use crate::store::Store;

/// Headline counts. Each count equals the length of the corresponding list
/// in [`CampaignResults`].
#[derive(Debug, Clone, Serialize)]
pub struct ResultsSummary {
    pub total_employees: u64,
    pub responded: u64,
    pub pending: u64,
    pub confirmed_count: u64,
    pub issue_count: u64,
    pub unlisted_count: u64,
}

/// An employee who has not yet submitted, with the phones they would be
/// asked about.
#[derive(Debug, Clone, Serialize)]
pub struct PendingUser {
    pub employee_id: EmployeeId,
    pub full_name: String,
    pub email: String,
    pub phones: Vec<PhoneNumber>,
}

/// Full results view for one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignResults {
    pub campaign: Campaign,
    pub summary: ResultsSummary,
    pub confirmed_phones: Vec<ConfirmationRecord>,
    pub reported_issues: Vec<IssueReport>,
    pub pending_users: Vec<PendingUser>,
    pub unlisted_numbers: Vec<PhoneNumber>,
}

/// Builds [`CampaignResults`] from live store and directory state.
pub struct ResultsAggregator {
    store: Arc<dyn Store>,
    directory: Arc<dyn EmployeeDirectory>,
}

impl ResultsAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, directory: Arc<dyn EmployeeDirectory>) -> Self {
        Self { store, directory }
    }

    /// Assembles the results view for a campaign.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an unknown campaign.
    pub async fn results(&self, id: CampaignId) -> Result<CampaignResults, EngineError> {
        let campaign = self.store.campaign(id).await?;
        let confirmed_phones = self.store.confirmations_for_campaign(id).await?;
        let reported_issues = self.store.issues_for_campaign(id).await?;

        let mut pending_users = Vec::new();
        let tokens = self.store.tokens_for_campaign(id).await?;
        let total = tokens.len() as u64;
        for token in tokens {
            if token.consumed {
                continue;
            }
            let Some(employee) = self.directory.get(&token.employee_id).await? else {
                // Directory lost the employee mid-campaign; the token still
                // counts as unanswered.
                pending_users.push(PendingUser {
                    employee_id: token.employee_id.clone(),
                    full_name: String::new(),
                    email: String::new(),
                    phones: Vec::new(),
                });
                continue;
            };
            let phones = self
                .store
                .phones_for_employee(&token.employee_id)
                .await?
                .into_iter()
                .filter(|p| p.status != PhoneStatus::Deactivated)
                .collect();
            pending_users.push(PendingUser {
                employee_id: employee.id,
                full_name: employee.full_name,
                email: employee.email,
                phones,
            });
        }

        let unlisted_numbers: Vec<PhoneNumber> = self
            .store
            .phones()
            .await?
            .into_iter()
            .filter(|p| p.origin == PhoneOrigin::SelfReported { campaign_id: id })
            .collect();

        let summary = ResultsSummary {
            total_employees: total,
            responded: total - pending_users.len() as u64,
            pending: pending_users.len() as u64,
            confirmed_count: confirmed_phones.len() as u64,
            issue_count: reported_issues.len() as u64,
            unlisted_count: unlisted_numbers.len() as u64,
        };
        Ok(CampaignResults {
            campaign,
            summary,
            confirmed_phones,
            reported_issues,
            pending_users,
            unlisted_numbers,
        })
    }
}
