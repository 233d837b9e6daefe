//! Persistence layer.
//!
//! The engine talks to storage through the [`Store`] trait so the campaign
//! workflow, confirmation processing, and aggregation stay independent of
//! the backing database. [`MemoryStore`] is the in-process implementation;
//! token issuance and consumption are the two operations with hard
//! atomicity requirements and are specified on the trait.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    Campaign, CampaignId, ConfirmationRecord, EmployeeId, IssueReport, PhoneId, PhoneNumber,
    RiskCase, TokenId, VerificationToken,
};

/// Transactional persistence for phones, campaigns, tokens, and the
/// artifacts produced during verification.
///
/// Storage failures surface as [`EngineError::Storage`]; uniqueness
/// violations as [`EngineError::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Phones
    // ------------------------------------------------------------------

    /// Inserts a new phone row. Fails with `Conflict` if the number is
    /// already registered.
    async fn insert_phone(&self, phone: PhoneNumber) -> Result<(), EngineError>;

    /// Loads one phone, `NotFound` if absent.
    async fn phone(&self, id: PhoneId) -> Result<PhoneNumber, EngineError>;

    /// Replaces a phone row, `NotFound` if absent.
    async fn update_phone(&self, phone: PhoneNumber) -> Result<(), EngineError>;

    /// Hard-deletes a phone row. The history-empty rule is enforced by the
    /// caller before this point.
    async fn delete_phone(&self, id: PhoneId) -> Result<(), EngineError>;

    /// All phone rows.
    async fn phones(&self) -> Result<Vec<PhoneNumber>, EngineError>;

    /// Phones registered to the given employee.
    async fn phones_by_registrant(&self, id: &EmployeeId) -> Result<Vec<PhoneNumber>, EngineError>;

    /// Phones the employee either registered or currently uses.
    async fn phones_for_employee(&self, id: &EmployeeId) -> Result<Vec<PhoneNumber>, EngineError>;

    /// Looks up a phone by its number string.
    async fn phone_by_number(&self, number: &str) -> Result<Option<PhoneNumber>, EngineError>;

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    async fn insert_campaign(&self, campaign: Campaign) -> Result<(), EngineError>;

    async fn campaign(&self, id: CampaignId) -> Result<Campaign, EngineError>;

    async fn update_campaign(&self, campaign: Campaign) -> Result<(), EngineError>;

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Inserts a token. Uniqueness per `(campaign_id, employee_id)` is
    /// enforced here; a duplicate fails with `Conflict`.
    async fn insert_token(&self, token: VerificationToken) -> Result<(), EngineError>;

    /// Loads a token by id, `NotFound` if absent.
    async fn token(&self, id: TokenId) -> Result<VerificationToken, EngineError>;

    /// The token issued to an employee within a campaign, if any.
    async fn token_for(
        &self,
        campaign: CampaignId,
        employee: &EmployeeId,
    ) -> Result<Option<VerificationToken>, EngineError>;

    /// All tokens issued for a campaign.
    async fn tokens_for_campaign(
        &self,
        campaign: CampaignId,
    ) -> Result<Vec<VerificationToken>, EngineError>;

    /// Atomically marks a token consumed (compare-and-set on the consumed
    /// flag). Exactly one of two concurrent calls succeeds; the loser gets
    /// [`EngineError::TokenAlreadyConsumed`].
    async fn consume_token(&self, id: TokenId) -> Result<VerificationToken, EngineError>;

    // ------------------------------------------------------------------
    // Confirmations and issues
    // ------------------------------------------------------------------

    async fn insert_confirmation(&self, record: ConfirmationRecord) -> Result<(), EngineError>;

    async fn confirmations_for_campaign(
        &self,
        campaign: CampaignId,
    ) -> Result<Vec<ConfirmationRecord>, EngineError>;

    async fn insert_issue(&self, issue: IssueReport) -> Result<(), EngineError>;

    async fn issues_for_campaign(
        &self,
        campaign: CampaignId,
    ) -> Result<Vec<IssueReport>, EngineError>;

    // ------------------------------------------------------------------
    // Risk cases
    // ------------------------------------------------------------------

    /// Inserts a risk case. At most one open case may exist per phone;
    /// a second open insert fails with `Conflict`, which is how concurrent
    /// risk detection stays idempotent.
    async fn insert_risk_case(&self, case: RiskCase) -> Result<(), EngineError>;

    /// The open (unresolved) case for a phone, if any.
    async fn open_risk_case(&self, phone: PhoneId) -> Result<Option<RiskCase>, EngineError>;

    /// Replaces a risk case, `NotFound` if absent.
    async fn update_risk_case(&self, case: RiskCase) -> Result<(), EngineError>;

    /// Loads one risk case by id.
    async fn risk_case(&self, id: Uuid) -> Result<RiskCase, EngineError>;
}
