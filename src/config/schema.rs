//! Typed configuration schema.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{DepartmentId, Employee, EmployeeId, PhoneStatus};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:8080`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Request body cap in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Notification dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Concurrent email workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Token validity applied when a campaign request omits it.
    #[serde(default = "default_duration_days")]
    pub default_duration_days: u32,
    /// Upper bound on requested token validity.
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_duration_days: default_duration_days(),
            max_duration_days: default_max_duration_days(),
        }
    }
}

const fn default_workers() -> usize {
    8
}

const fn default_duration_days() -> u32 {
    14
}

const fn default_max_duration_days() -> u32 {
    90
}

/// Mail composition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Public base URL embedded in verification links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
            subject_prefix: default_subject_prefix(),
            base_url: default_base_url(),
        }
    }
}

fn default_mail_from() -> String {
    "lineaudit@example.co.jp".to_string()
}

fn default_subject_prefix() -> String {
    "[LineAudit]".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

// ============================================================================
// Seed data
// ============================================================================

/// Seed data for the in-memory directory and store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedData {
    #[serde(default)]
    pub departments: Vec<SeedDepartment>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub phones: Vec<SeedPhone>,
}

/// One org-chart edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDepartment {
    pub id: DepartmentId,
    #[serde(default)]
    pub parent: Option<DepartmentId>,
}

/// A phone row as written in seed YAML. Identifier and origin are assigned
/// at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedPhone {
    pub number: String,
    #[serde(default = "default_phone_status")]
    pub status: PhoneStatus,
    pub registrant: EmployeeId,
    #[serde(default)]
    pub current_user: Option<EmployeeId>,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub remarks: String,
    pub application_date: NaiveDate,
    #[serde(default)]
    pub cancellation_date: Option<NaiveDate>,
    pub department: DepartmentId,
}

const fn default_phone_status() -> PhoneStatus {
    PhoneStatus::Idle
}
