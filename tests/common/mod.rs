//! Shared harness for HTTP integration tests: in-memory backends, a
//! recording mail transport, and request helpers over `tower::oneshot`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::NaiveDate;
use serde_json::Value;
use tower::util::ServiceExt;

use lineaudit::campaign::{CampaignOrchestrator, MailSettings, NotificationDispatcher};
use lineaudit::confirm::ConfirmationProcessor;
use lineaudit::directory::{DepartmentTree, EmployeeDirectory, InMemoryDirectory};
use lineaudit::http::{AppState, router};
use lineaudit::mail::{MailError, MailTransport};
use lineaudit::model::{DepartmentId, Employee, EmployeeId, EmploymentStatus};
use lineaudit::results::ResultsAggregator;
use lineaudit::risk::RiskDetector;
use lineaudit::store::{MemoryStore, Store};

/// Mail transport that records recipients and rejects addresses in the
/// deny set.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
    deny: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn deny(&self, address: &str) {
        self.deny.lock().unwrap().insert(address.to_string());
    }

    pub fn allow_all(&self) {
        self.deny.lock().unwrap().clear();
    }

    /// Recipients of successfully delivered messages.
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }

    /// Bodies of successfully delivered messages.
    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, body)| body.clone()).collect()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(
        &self,
        _from: &str,
        to: &str,
        _subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        if self.deny.lock().unwrap().contains(to) {
            return Err(MailError("relay rejected recipient".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

/// Everything a test needs to drive the engine over HTTP.
pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn employee(id: &str, dept: &str) -> Employee {
    Employee {
        id: EmployeeId::new(id),
        full_name: format!("Employee {id}"),
        department_id: DepartmentId::new(dept),
        employment_status: EmploymentStatus::Active,
        email: format!("{id}@example.co.jp"),
        hire_date: NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
        termination_date: None,
    }
}

/// Builds the app over fresh in-memory backends.
///
/// The tree has one root `D1` with children `D10` and `D20`.
pub fn test_app() -> TestApp {
    let tree = DepartmentTree::from_edges([
        (DepartmentId::new("D1"), None),
        (DepartmentId::new("D10"), Some(DepartmentId::new("D1"))),
        (DepartmentId::new("D20"), Some(DepartmentId::new("D1"))),
    ]);
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(InMemoryDirectory::new(tree));
    let mailer = Arc::new(RecordingMailer::default());

    let dyn_store: Arc<dyn Store> = Arc::clone(&store) as Arc<dyn Store>;
    let dyn_directory: Arc<dyn EmployeeDirectory> =
        Arc::clone(&directory) as Arc<dyn EmployeeDirectory>;
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&mailer) as Arc<dyn MailTransport>,
        4,
        MailSettings::default(),
    ));
    let state = AppState {
        store: Arc::clone(&dyn_store),
        directory: Arc::clone(&dyn_directory),
        orchestrator: Arc::new(CampaignOrchestrator::new(
            Arc::clone(&dyn_store),
            Arc::clone(&dyn_directory),
            dispatcher,
            14,
            90,
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

    TestApp {
        app: router(state, 1024 * 1024),
        store,
        directory,
        mailer,
    }
}

impl TestApp {
    /// Sends a request and returns `(status, parsed JSON body)`. The body
    /// value is `Null` for empty responses.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    /// Registers a phone over the API and returns its id.
    pub async fn create_phone(&self, number: &str, registrant: &str, dept: &str) -> String {
        let (status, body) = self
            .post(
                "/phones",
                serde_json::json!({
                    "number": number,
                    "registrant_employee_id": registrant,
                    "vendor": "NTT",
                    "purpose": "field sales",
                    "application_date": "2023-04-01",
                    "department_id": dept,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Initiates an all-users campaign and waits for the background
    /// dispatch to reach a terminal status. Returns the batch id.
    pub async fn run_campaign(&self, request: Value) -> String {
        let (status, body) = self.post("/verification/admin/batch", request).await;
        assert_eq!(status, StatusCode::ACCEPTED, "initiate failed: {body}");
        let id = body["campaign_id"].as_str().unwrap().to_string();
        self.wait_terminal(&id).await;
        id
    }

    /// Polls batch status until terminal.
    pub async fn wait_terminal(&self, batch_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self
                .get(&format!("/verification/batch/{batch_id}/status"))
                .await;
            assert_eq!(status, StatusCode::OK);
            let state = body["status"].as_str().unwrap_or_default().to_string();
            if matches!(
                state.as_str(),
                "completed" | "completed_with_errors" | "failed"
            ) {
                return body;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("campaign {batch_id} never reached a terminal status");
    }

    /// The verification token issued to an employee in a campaign.
    pub async fn token_for(&self, batch_id: &str, employee: &str) -> String {
        use lineaudit::model::CampaignId;
        let id = CampaignId(batch_id.parse().unwrap());
        self.store
            .token_for(id, &EmployeeId::new(employee))
            .await
            .unwrap()
            .expect("no token issued")
            .token
            .to_string()
    }
}
