//! Campaign orchestration.
//!
//! [`CampaignOrchestrator`] drives the whole fan-out: scope resolution,
//! token issuance, and notification dispatch. [`CampaignProgress`] holds the
//! live counters while dispatch is in flight; [`NotificationDispatcher`]
//! runs the bounded-concurrency email fan-out and resends.

mod dispatch;
mod orchestrator;
mod progress;

pub use dispatch::{DispatchJob, MailSettings, NotificationDispatcher, ResendReport};
pub use orchestrator::{CampaignOrchestrator, CampaignRequest};
pub use progress::{CampaignProgress, ProgressSnapshot};
