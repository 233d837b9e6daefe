//! Domain model for `LineAudit`.
//!
//! Typed records for phones, employees, campaigns, tokens, and the
//! verification artifacts produced while a campaign runs. Status fields are
//! closed enums so an unhandled state is a compile error rather than a
//! runtime surprise.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a phone-number asset.
    PhoneId
);
uuid_id!(
    /// Identifier of a verification campaign.
    CampaignId
);
uuid_id!(
    /// Identifier of a verification token. The UUID itself is the credential
    /// embedded in the verification email.
    TokenId
);

/// Employee identifier as issued by the HR directory (e.g. `"E1024"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub String);

impl EmployeeId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Department identifier from the org directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(pub String);

impl DepartmentId {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Phone
// ============================================================================

/// Lifecycle status of a phone-number asset.
///
/// The legal transitions between these states are defined by
/// [`crate::lifecycle::allowed_targets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneStatus {
    /// Registered but not handed to anyone.
    Idle,
    /// Assigned to an employee.
    InUse,
    /// User asked for the line to be cancelled.
    PendingDeactivationUser,
    /// Administration scheduled the line for cancellation.
    PendingDeactivationAdmin,
    /// The current user reported a problem during verification.
    UserReported,
    /// Registrant departed; awaiting administrative disposition.
    RiskPending,
    /// Contract cancelled.
    Deactivated,
    /// Temporarily suspended at the carrier.
    Suspended,
    /// SIM card replacement in progress.
    CardReplacing,
}

impl PhoneStatus {
    /// Stable snake_case name, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InUse => "in_use",
            Self::PendingDeactivationUser => "pending_deactivation_user",
            Self::PendingDeactivationAdmin => "pending_deactivation_admin",
            Self::UserReported => "user_reported",
            Self::RiskPending => "risk_pending",
            Self::Deactivated => "deactivated",
            Self::Suspended => "suspended",
            Self::CardReplacing => "card_replacing",
        }
    }

    /// All status values, for exhaustive table tests.
    pub const ALL: [Self; 9] = [
        Self::Idle,
        Self::InUse,
        Self::PendingDeactivationUser,
        Self::PendingDeactivationAdmin,
        Self::UserReported,
        Self::RiskPending,
        Self::Deactivated,
        Self::Suspended,
        Self::CardReplacing,
    ];
}

impl fmt::Display for PhoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phone row entered the system.
///
/// Self-reported rows come from the unlisted-numbers section of a
/// verification submission and stay unverified until an admin reconciles
/// them; they never widen the closed [`PhoneStatus`] enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhoneOrigin {
    /// Registered through the normal asset workflow.
    Registered,
    /// Reported by an employee during a verification campaign.
    SelfReported {
        /// Campaign in which the number was reported.
        campaign_id: CampaignId,
    },
}

/// One employee-to-phone assignment period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub employee_id: EmployeeId,
    pub start_date: NaiveDate,
    /// `None` while the assignment is still open.
    pub end_date: Option<NaiveDate>,
}

/// A phone-number asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: PhoneId,
    pub number: String,
    pub status: PhoneStatus,
    /// Employee who applied for the line.
    pub registrant_employee_id: EmployeeId,
    /// Employee currently holding the handset, if assigned.
    pub current_user_employee_id: Option<EmployeeId>,
    pub vendor: String,
    pub purpose: String,
    #[serde(default)]
    pub remarks: String,
    pub application_date: NaiveDate,
    pub cancellation_date: Option<NaiveDate>,
    pub department_id: DepartmentId,
    pub origin: PhoneOrigin,
    /// Ordered record of assignment periods; governs deletability.
    #[serde(default)]
    pub usage_history: Vec<UsagePeriod>,
}

impl PhoneNumber {
    /// A phone may be hard-deleted only while it has no usage history.
    #[must_use]
    pub fn deletable(&self) -> bool {
        self.usage_history.is_empty()
    }

    /// Index of the open (unended) usage period, if any.
    #[must_use]
    pub fn open_usage_index(&self) -> Option<usize> {
        self.usage_history.iter().rposition(|p| p.end_date.is_none())
    }
}

/// Syntactic phone-number check: optional `+`, digits with spaces or
/// hyphens as separators, 7 to 20 significant characters.
static PHONE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9 \-]{5,18}[0-9]$").expect("phone number regex is valid")
});

/// Returns whether `number` is a syntactically plausible phone number.
#[must_use]
pub fn is_valid_phone_number(number: &str) -> bool {
    PHONE_NUMBER_RE.is_match(number)
}

// ============================================================================
// Employee
// ============================================================================

/// Employment status as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentStatus {
    Active,
    Departed,
}

/// Directory record for an employee. Consumed read-mostly; the directory
/// itself is an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub full_name: String,
    pub department_id: DepartmentId,
    pub employment_status: EmploymentStatus,
    pub email: String,
    pub hire_date: NaiveDate,
    pub termination_date: Option<NaiveDate>,
}

impl Employee {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.employment_status, EmploymentStatus::Active)
    }
}

// ============================================================================
// Campaign
// ============================================================================

/// Rule used to resolve a campaign's target employee list at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "values", rename_all = "snake_case")]
pub enum CampaignScope {
    /// Every currently-Active employee.
    AllUsers,
    /// Active employees in the given departments, including subtrees.
    Departments(Vec<DepartmentId>),
    /// An explicit list of employees.
    Employees(Vec<EmployeeId>),
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl CampaignStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }

    /// Whether dispatch has finished (successfully or not).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithErrors | Self::Failed)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured per-recipient dispatch failure, kept in a campaign's error
/// summary until a resend succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub email: String,
    pub reason: String,
}

impl DispatchFailure {
    /// Entry describing a dispatch-level (not per-recipient) failure, e.g.
    /// a storage outage while persisting campaign state.
    #[must_use]
    pub fn dispatch_fatal(reason: impl Into<String>) -> Self {
        Self {
            employee_id: EmployeeId::new("system"),
            employee_name: "dispatch".to_string(),
            email: String::new(),
            reason: reason.into(),
        }
    }
}

/// One invocation of the verification workflow.
///
/// While dispatch is in flight the counters live in
/// [`crate::campaign::CampaignProgress`]; this record is the persisted
/// snapshot, synced at terminal transitions and resends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub scope: CampaignScope,
    pub duration_days: u32,
    pub status: CampaignStatus,
    pub total_employees: u64,
    pub tokens_generated: u64,
    pub emails_attempted: u64,
    pub emails_succeeded: u64,
    pub emails_failed: u64,
    #[serde(default)]
    pub error_summary: Vec<DispatchFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Tokens
// ============================================================================

/// A unique, time-limited credential issued to one employee for one
/// campaign, authorizing a confirmation submission without a login session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationToken {
    pub token: TokenId,
    pub campaign_id: CampaignId,
    pub employee_id: EmployeeId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl VerificationToken {
    /// Expiry is enforced lazily against the wall clock at read/submit time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

// ============================================================================
// Submissions
// ============================================================================

/// Employee's verdict on one listed phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VerdictAction {
    /// The employee still uses the phone for the stated purpose.
    ConfirmUsage { purpose: String },
    /// Something is wrong with the listing; queues an issue for an admin.
    ReportIssue {
        category: String,
        #[serde(default)]
        comment: String,
    },
}

/// Action for one phone referenced in a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneVerdict {
    pub phone_id: PhoneId,
    #[serde(flatten)]
    pub action: VerdictAction,
}

/// A phone the employee uses that was not in their listed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlistedEntry {
    pub number: String,
    pub purpose: String,
}

/// Full confirmation payload submitted against a token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmissionPayload {
    #[serde(default)]
    pub phones: Vec<PhoneVerdict>,
    #[serde(default)]
    pub unlisted: Vec<UnlistedEntry>,
}

/// Persisted record of a confirmed phone within a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub campaign_id: CampaignId,
    pub phone_id: PhoneId,
    /// Number at confirmation time, kept in case the phone row changes
    /// out-of-band later.
    pub number: String,
    pub employee_id: EmployeeId,
    pub purpose: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Admin handling state of a reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    Handled,
}

/// Issue reported against a phone during confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueReport {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub phone_id: PhoneId,
    pub number: String,
    pub reporter_employee_id: EmployeeId,
    pub category: String,
    pub comment: String,
    pub reported_at: DateTime<Utc>,
    pub admin_status: IssueStatus,
}

// ============================================================================
// Risk cases
// ============================================================================

/// Why a phone was flagged for administrative disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskReason {
    RegistrantDeparted,
    SelfReported,
}

/// Administrative disposition of a risk phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    ChangeApplicant,
    Reclaim,
    Deactivate,
}

/// Resolution applied to a risk case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResolution {
    pub action: RiskAction,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

/// A flagged phone awaiting (or past) administrative disposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCase {
    pub id: Uuid,
    pub phone_id: PhoneId,
    pub reason: RiskReason,
    /// Status before the flag; `change_applicant` restores it.
    pub prior_status: PhoneStatus,
    pub detected_at: DateTime<Utc>,
    pub resolution: Option<RiskResolution>,
}

impl RiskCase {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.resolution.is_none()
    }
}

// ============================================================================
// Tests
// ============================================================================
