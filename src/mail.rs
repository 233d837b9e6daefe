//! Outbound email transport.
//!
//! The real mail relay is an external collaborator; the engine only needs
//! `send(from, to, subject, body)`. The shipping implementation logs
//! deliveries through `tracing`, which keeps local runs and demos
//! self-contained. Tests substitute recording or failing transports.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Per-recipient delivery failure. Callers record it in the campaign's
/// error summary; it never aborts the surrounding dispatch.
#[derive(Debug, Clone, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outbound email transport consumed as a black box.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Attempts to deliver one message with the given sender header.
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str)
    -> Result<(), MailError>;
}

/// Transport that logs deliveries instead of relaying them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl MailTransport for LogMailer {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        info!(from, to, subject, body_bytes = body.len(), "email dispatched (log transport)");
        Ok(())
    }
}
