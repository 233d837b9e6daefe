//! The `serve` command: wire the engine together and run the HTTP server.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::campaign::{CampaignOrchestrator, MailSettings, NotificationDispatcher};
use crate::cli::args::ServeArgs;
use crate::config::{AppConfig, SeedData, SeedPhone, load_config, load_seed};
use crate::confirm::ConfirmationProcessor;
use crate::directory::{DepartmentTree, EmployeeDirectory, InMemoryDirectory};
use crate::error::LineAuditError;
use crate::http::{self, AppState};
use crate::mail::{LogMailer, MailTransport};
use crate::model::{PhoneId, PhoneNumber, PhoneOrigin, PhoneStatus, UsagePeriod};
use crate::observability::metrics::init_metrics;
use crate::results::ResultsAggregator;
use crate::risk::RiskDetector;
use crate::store::{MemoryStore, Store};

/// Runs the verification engine until interrupted.
///
/// # Errors
///
/// Configuration, seed, or bind failures; engine errors while seeding.
pub async fn run(args: &ServeArgs) -> Result<(), LineAuditError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(workers) = args.workers {
        config.dispatch.workers = workers;
    }

    init_metrics(args.metrics_port)?;

    let seed = match &args.seed {
        Some(path) => load_seed(path)?,
        None => {
            warn!("no seed file given; starting with an empty directory and store");
            SeedData::default()
        }
    };

    let tree = DepartmentTree::from_edges(
        seed.departments
            .iter()
            .map(|d| (d.id.clone(), d.parent.clone())),
    );
    let directory = Arc::new(InMemoryDirectory::new(tree));
    for employee in &seed.employees {
        directory.upsert(employee.clone());
    }
    let store = Arc::new(MemoryStore::new());
    for phone in &seed.phones {
        store.insert_phone(seeded_phone(phone)).await?;
    }
    info!(
        employees = directory.len(),
        phones = seed.phones.len(),
        "seed data loaded"
    );

    let dyn_store: Arc<dyn Store> = store;
    let dyn_directory: Arc<dyn EmployeeDirectory> = directory;
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(LogMailer) as Arc<dyn MailTransport>,
        config.dispatch.workers,
        MailSettings {
            from: config.mail.from.clone(),
            subject_prefix: config.mail.subject_prefix.clone(),
            base_url: config.mail.base_url.clone(),
        },
    ));
    let state = AppState {
        store: Arc::clone(&dyn_store),
        directory: Arc::clone(&dyn_directory),
        orchestrator: Arc::new(CampaignOrchestrator::new(
            Arc::clone(&dyn_store),
            Arc::clone(&dyn_directory),
            dispatcher,
            config.dispatch.default_duration_days,
            config.dispatch.max_duration_days,
        )),
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

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    let router = http::router(state, config.server.max_body_bytes);
    http::serve(router, &config.server.bind, cancel).await
}

fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        let sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
        match sigterm {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}

/// Materializes a seed entry as a phone row. An `in_use` entry with a
/// current user gets an open usage period starting at the application date.
fn seeded_phone(seed: &SeedPhone) -> PhoneNumber {
    let mut usage_history = Vec::new();
    if seed.status == PhoneStatus::InUse {
        if let Some(user) = &seed.current_user {
            usage_history.push(UsagePeriod {
                employee_id: user.clone(),
                start_date: seed.application_date,
                end_date: None,
            });
        }
    }
    PhoneNumber {
        id: PhoneId::new(),
        number: seed.number.clone(),
        status: seed.status,
        registrant_employee_id: seed.registrant.clone(),
        current_user_employee_id: seed.current_user.clone(),
        vendor: seed.vendor.clone(),
        purpose: seed.purpose.clone(),
        remarks: seed.remarks.clone(),
        application_date: seed.application_date,
        cancellation_date: seed.cancellation_date,
        department_id: seed.department.clone(),
        origin: PhoneOrigin::Registered,
        usage_history,
    }
}
