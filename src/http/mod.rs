//! HTTP surface.
//!
//! axum router exposing the admin API (phone lifecycle, departures,
//! campaign management) and the unauthenticated token-gated verification
//! endpoints. Engine errors map to JSON bodies with a machine-readable
//! `code` and an HTTP status per error class.

mod admin;
mod public;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::campaign::CampaignOrchestrator;
use crate::confirm::ConfirmationProcessor;
use crate::directory::EmployeeDirectory;
use crate::error::{EngineError, LineAuditError};
use crate::results::ResultsAggregator;
use crate::risk::RiskDetector;
use crate::store::Store;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub directory: Arc<dyn EmployeeDirectory>,
    pub orchestrator: Arc<CampaignOrchestrator>,
    pub processor: Arc<ConfirmationProcessor>,
    pub detector: Arc<RiskDetector>,
    pub aggregator: Arc<ResultsAggregator>,
}

/// [`EngineError`] carried to an HTTP response.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::TransitionRejected { .. }
            | EngineError::TokenAlreadyConsumed
            | EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::TokenExpired { .. } => StatusCode::GONE,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        });
        // Transition rejections carry both sides for precise client errors.
        if let EngineError::TransitionRejected { from, to } = &self.0 {
            body["from"] = json!(from);
            body["to"] = json!(to);
        }
        (status, axum::Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Builds the full application router.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/phones", post(admin::create_phone).get(admin::list_phones))
        .route(
            "/phones/{id}",
            get(admin::get_phone)
                .put(admin::update_phone)
                .delete(admin::delete_phone),
        )
        .route("/phones/{id}/assign", post(admin::assign_phone))
        .route("/phones/{id}/unassign", post(admin::unassign_phone))
        .route("/phones/{id}/handle-risk", post(admin::handle_risk))
        .route(
            "/admin/employees/{id}/departed",
            post(admin::employee_departed),
        )
        .route("/verification/admin/batch", post(admin::initiate_batch))
        .route(
            "/verification/batch/{id}/status",
            get(admin::batch_status),
        )
        .route(
            "/verification/batch/{id}/resend",
            post(admin::resend_batch),
        )
        .route(
            "/verification/admin/phone-status",
            get(admin::phone_status),
        )
        .route("/verification/info", get(public::verification_info))
        .route("/verification/submit", post(public::submit))
        .route("/healthz", get(public::healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Binds and serves the router until the cancellation token fires.
///
/// # Errors
///
/// [`LineAuditError::Io`] if the listener cannot bind or the server fails.
pub async fn serve(
    router: Router,
    bind: &str,
    cancel: CancellationToken,
) -> Result<(), LineAuditError> {
    let listener = TcpListener::bind(bind).await?;
    let bound = listener.local_addr()?;
    info!(%bound, "HTTP server started");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        cancel.cancelled().await;
        info!("HTTP server shutting down");
    })
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::campaign::{MailSettings, NotificationDispatcher};
    use crate::directory::{DepartmentTree, InMemoryDirectory};
    use crate::mail::MailTransport;
    use crate::store::MemoryStore;

    /// Router over fresh in-memory backends with a log mailer.
    pub(crate) fn test_app() -> (Router, Arc<MemoryStore>, Arc<InMemoryDirectory>) {
        test_app_with_tree(DepartmentTree::default())
    }

    pub(crate) fn test_app_with_tree(
        tree: DepartmentTree,
    ) -> (Router, Arc<MemoryStore>, Arc<InMemoryDirectory>) {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(InMemoryDirectory::new(tree));
        let dyn_store: Arc<dyn Store> = Arc::clone(&store) as Arc<dyn Store>;
        let dyn_directory: Arc<dyn EmployeeDirectory> =
            Arc::clone(&directory) as Arc<dyn EmployeeDirectory>;
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(crate::mail::LogMailer) as Arc<dyn MailTransport>,
            4,
            MailSettings::default(),
        ));
        let orchestrator = Arc::new(CampaignOrchestrator::new(
            Arc::clone(&dyn_store),
            Arc::clone(&dyn_directory),
            dispatcher,
            14,
            90,
        ));
        let state = AppState {
            store: Arc::clone(&dyn_store),
            directory: Arc::clone(&dyn_directory),
            orchestrator,
            processor: Arc::new(ConfirmationProcessor::new(
                Arc::clone(&dyn_store),
                Arc::clone(&dyn_directory),
            )),
            detector: Arc::new(RiskDetector::new(
                Arc::clone(&dyn_store),
                Arc::clone(&dyn_directory),
            )),
            aggregator: Arc::new(ResultsAggregator::new(dyn_store, dyn_directory)),
        };
        (router(state, 1024 * 1024), store, directory)
    }
}
