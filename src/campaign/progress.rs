//! Live campaign counters.
//!
//! While dispatch is in flight the authoritative counters live here, in
//! atomics, so worker tasks never contend on a lock for the hot path. The
//! persisted [`Campaign`] row is a snapshot synced at terminal transitions
//! and after resends.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;

use crate::model::{Campaign, CampaignId, CampaignStatus, DispatchFailure, EmployeeId};

const STATUS_PENDING: u8 = 0;
const STATUS_IN_PROGRESS: u8 = 1;
const STATUS_COMPLETED: u8 = 2;
const STATUS_COMPLETED_WITH_ERRORS: u8 = 3;
const STATUS_FAILED: u8 = 4;

const fn status_to_u8(status: CampaignStatus) -> u8 {
    match status {
        CampaignStatus::Pending => STATUS_PENDING,
        CampaignStatus::InProgress => STATUS_IN_PROGRESS,
        CampaignStatus::Completed => STATUS_COMPLETED,
        CampaignStatus::CompletedWithErrors => STATUS_COMPLETED_WITH_ERRORS,
        CampaignStatus::Failed => STATUS_FAILED,
    }
}

const fn status_from_u8(raw: u8) -> CampaignStatus {
    match raw {
        STATUS_PENDING => CampaignStatus::Pending,
        STATUS_IN_PROGRESS => CampaignStatus::InProgress,
        STATUS_COMPLETED => CampaignStatus::Completed,
        STATUS_COMPLETED_WITH_ERRORS => CampaignStatus::CompletedWithErrors,
        _ => CampaignStatus::Failed,
    }
}

/// Shared, lock-light progress record for one campaign.
#[derive(Debug)]
pub struct CampaignProgress {
    campaign_id: CampaignId,
    total_employees: u64,
    tokens_generated: AtomicU64,
    emails_attempted: AtomicU64,
    emails_succeeded: AtomicU64,
    emails_failed: AtomicU64,
    status: AtomicU8,
    /// Keyed by employee so a resend success can remove exactly its entry.
    /// Insertion order is preserved for stable reporting.
    error_summary: Mutex<IndexMap<EmployeeId, DispatchFailure>>,
    fatal_error: Mutex<Option<String>>,
}

/// Point-in-time view of a campaign's counters, safe to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub total_employees: u64,
    pub tokens_generated: u64,
    pub emails_attempted: u64,
    pub emails_succeeded: u64,
    pub emails_failed: u64,
    pub error_summary: Vec<DispatchFailure>,
}

impl CampaignProgress {
    #[must_use]
    pub fn new(campaign_id: CampaignId, total_employees: u64) -> Self {
        Self {
            campaign_id,
            total_employees,
            tokens_generated: AtomicU64::new(0),
            emails_attempted: AtomicU64::new(0),
            emails_succeeded: AtomicU64::new(0),
            emails_failed: AtomicU64::new(0),
            status: AtomicU8::new(STATUS_PENDING),
            error_summary: Mutex::new(IndexMap::new()),
            fatal_error: Mutex::new(None),
        }
    }

    /// Rebuilds progress from a persisted campaign row, e.g. when serving
    /// status for a campaign dispatched before a restart.
    #[must_use]
    pub fn from_campaign(campaign: &Campaign) -> Self {
        let progress = Self::new(campaign.id, campaign.total_employees);
        progress
            .tokens_generated
            .store(campaign.tokens_generated, Ordering::SeqCst);
        progress
            .emails_attempted
            .store(campaign.emails_attempted, Ordering::SeqCst);
        progress
            .emails_succeeded
            .store(campaign.emails_succeeded, Ordering::SeqCst);
        progress
            .emails_failed
            .store(campaign.emails_failed, Ordering::SeqCst);
        progress
            .status
            .store(status_to_u8(campaign.status), Ordering::SeqCst);
        let mut summary = progress.error_summary.lock().expect("summary lock poisoned");
        for failure in &campaign.error_summary {
            summary.insert(failure.employee_id.clone(), failure.clone());
        }
        drop(summary);
        progress
    }

    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    #[must_use]
    pub fn status(&self) -> CampaignStatus {
        status_from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn set_tokens_generated(&self, count: u64) {
        self.tokens_generated.store(count, Ordering::SeqCst);
    }

    pub fn mark_in_progress(&self) {
        self.status.store(STATUS_IN_PROGRESS, Ordering::SeqCst);
    }

    pub fn record_attempt(&self) {
        self.emails_attempted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_success(&self) {
        self.emails_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self, failure: DispatchFailure) {
        self.emails_failed.fetch_add(1, Ordering::SeqCst);
        self.error_summary
            .lock()
            .expect("summary lock poisoned")
            .insert(failure.employee_id.clone(), failure);
    }

    /// Records a failure of the dispatch itself (storage outage, panicked
    /// worker). Forces the terminal status to `Failed`.
    pub fn record_fatal(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.error_summary
            .lock()
            .expect("summary lock poisoned")
            .insert(
                EmployeeId::new("system"),
                DispatchFailure::dispatch_fatal(reason.clone()),
            );
        *self.fatal_error.lock().expect("fatal lock poisoned") = Some(reason);
    }

    /// Clears one employee's entry after a successful resend. Does not touch
    /// the dispatch counters, which describe the original fan-out only.
    pub fn remove_failure(&self, employee: &EmployeeId) {
        self.error_summary
            .lock()
            .expect("summary lock poisoned")
            .shift_remove(employee);
    }

    /// Replaces the failure reason for an employee after a failed resend.
    pub fn update_failure_reason(&self, failure: DispatchFailure) {
        self.error_summary
            .lock()
            .expect("summary lock poisoned")
            .insert(failure.employee_id.clone(), failure);
    }

    /// Employees currently in the error summary, in insertion order.
    #[must_use]
    pub fn failure_ids(&self) -> Vec<EmployeeId> {
        self.error_summary
            .lock()
            .expect("summary lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Decides the terminal status once every worker has reported.
    pub fn finalize(&self) -> CampaignStatus {
        let fatal = self
            .fatal_error
            .lock()
            .expect("fatal lock poisoned")
            .is_some();
        let attempted = self.emails_attempted.load(Ordering::SeqCst);
        let failed = self.emails_failed.load(Ordering::SeqCst);

        let terminal = if fatal {
            CampaignStatus::Failed
        } else if failed == 0 {
            CampaignStatus::Completed
        } else if failed == attempted && attempted > 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::CompletedWithErrors
        };
        self.status.store(status_to_u8(terminal), Ordering::SeqCst);
        terminal
    }

    /// Re-derives the terminal status after a resend pass, under the same
    /// rules as [`finalize`](Self::finalize): a drained summary promotes to
    /// `Completed`, a summary still covering every attempted recipient stays
    /// `Failed`, anything in between is `CompletedWithErrors`.
    pub fn refresh_terminal_status(&self) -> CampaignStatus {
        let current = self.status();
        if !current.is_terminal() {
            return current;
        }
        let fatal = self
            .fatal_error
            .lock()
            .expect("fatal lock poisoned")
            .is_some();
        let remaining = self
            .error_summary
            .lock()
            .expect("summary lock poisoned")
            .len() as u64;
        let attempted = self.emails_attempted.load(Ordering::SeqCst);
        let next = if fatal {
            CampaignStatus::Failed
        } else if remaining == 0 {
            CampaignStatus::Completed
        } else if remaining == attempted && attempted > 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::CompletedWithErrors
        };
        self.status.store(status_to_u8(next), Ordering::SeqCst);
        next
    }

    /// Consistent-enough snapshot for status reads. Succeeded and failed are
    /// read before attempted so a concurrent reader never observes
    /// `succeeded + failed > attempted`.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let succeeded = self.emails_succeeded.load(Ordering::SeqCst);
        let failed = self.emails_failed.load(Ordering::SeqCst);
        let attempted = self.emails_attempted.load(Ordering::SeqCst);
        let error_summary = self
            .error_summary
            .lock()
            .expect("summary lock poisoned")
            .values()
            .cloned()
            .collect();
        ProgressSnapshot {
            campaign_id: self.campaign_id,
            status: self.status(),
            total_employees: self.total_employees,
            tokens_generated: self.tokens_generated.load(Ordering::SeqCst),
            emails_attempted: attempted,
            emails_succeeded: succeeded,
            emails_failed: failed,
            error_summary,
        }
    }

    /// Copies the live counters into the persisted campaign row.
    pub fn sync_into(&self, campaign: &mut Campaign) {
        let snapshot = self.snapshot();
        campaign.status = snapshot.status;
        campaign.tokens_generated = snapshot.tokens_generated;
        campaign.emails_attempted = snapshot.emails_attempted;
        campaign.emails_succeeded = snapshot.emails_succeeded;
        campaign.emails_failed = snapshot.emails_failed;
        campaign.error_summary = snapshot.error_summary;
        campaign.updated_at = Utc::now();
    }
}
