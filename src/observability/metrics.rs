//! Metrics collection.
//!
//! Prometheus-compatible metrics with typed convenience functions for the
//! events the engine cares about: campaign fan-outs, email outcomes,
//! submissions, and risk cases.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::LineAuditError;
use crate::model::{CampaignStatus, RiskReason};

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `LineAuditError::Io` if the recorder or HTTP listener cannot
/// be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), LineAuditError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| LineAuditError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "lineaudit_campaigns_total",
        "Total number of verification campaigns initiated"
    );
    describe_histogram!(
        "lineaudit_campaign_recipients",
        "Recipients per initiated campaign"
    );
    describe_counter!(
        "lineaudit_campaigns_finished_total",
        "Campaigns reaching a terminal status, by status"
    );
    describe_counter!(
        "lineaudit_emails_total",
        "Verification emails attempted, by outcome"
    );
    describe_counter!(
        "lineaudit_submissions_total",
        "Accepted confirmation submissions"
    );
    describe_counter!(
        "lineaudit_verdicts_total",
        "Phone verdicts and unlisted reports applied, by kind"
    );
    describe_counter!(
        "lineaudit_risk_cases_total",
        "Risk cases opened, by reason"
    );
}

/// Records an initiated campaign and its fan-out size.
#[allow(clippy::cast_precision_loss)]
pub fn record_campaign_initiated(recipients: u64) {
    counter!("lineaudit_campaigns_total").increment(1);
    histogram!("lineaudit_campaign_recipients").record(recipients as f64);
}

/// Records a campaign reaching a terminal status.
pub fn record_campaign_terminal(status: CampaignStatus) {
    counter!("lineaudit_campaigns_finished_total", "status" => status.as_str()).increment(1);
}

/// Records one verification email attempt.
pub fn record_email_outcome(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("lineaudit_emails_total", "outcome" => outcome).increment(1);
}

/// Records an accepted submission and the verdicts it carried.
pub fn record_submission(confirmed: u64, issues: u64, unlisted: u64) {
    counter!("lineaudit_submissions_total").increment(1);
    counter!("lineaudit_verdicts_total", "kind" => "confirmed").increment(confirmed);
    counter!("lineaudit_verdicts_total", "kind" => "issue").increment(issues);
    counter!("lineaudit_verdicts_total", "kind" => "unlisted").increment(unlisted);
}

/// Records a newly opened risk case.
pub fn record_risk_case(reason: RiskReason) {
    let label = match reason {
        RiskReason::RegistrantDeparted => "registrant_departed",
        RiskReason::SelfReported => "self_reported",
    };
    counter!("lineaudit_risk_cases_total", "reason" => label).increment(1);
}
