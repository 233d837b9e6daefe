//! In-memory store backed by `DashMap`.
//!
//! Uniqueness and consume-once guarantees ride on `DashMap`'s per-entry
//! locking: `insert_token` goes through the entry API so two concurrent
//! issuances for the same `(campaign, employee)` cannot both win, and
//! `consume_token` flips the consumed flag under the entry guard.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    Campaign, CampaignId, ConfirmationRecord, EmployeeId, IssueReport, PhoneId, PhoneNumber,
    RiskCase, TokenId, VerificationToken,
};

use super::Store;

/// In-process implementation of [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    phones: DashMap<PhoneId, PhoneNumber>,
    phone_numbers: DashMap<String, PhoneId>,
    campaigns: DashMap<CampaignId, Campaign>,
    tokens: DashMap<TokenId, VerificationToken>,
    token_index: DashMap<(CampaignId, EmployeeId), TokenId>,
    confirmations: DashMap<CampaignId, Vec<ConfirmationRecord>>,
    issues: DashMap<CampaignId, Vec<IssueReport>>,
    risk_cases: DashMap<Uuid, RiskCase>,
    open_risk_index: DashMap<PhoneId, Uuid>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_phone(&self, phone: PhoneNumber) -> Result<(), EngineError> {
        match self.phone_numbers.entry(phone.number.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::Conflict(format!(
                    "phone number {} already registered",
                    phone.number
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(phone.id);
            }
        }
        self.phones.insert(phone.id, phone);
        Ok(())
    }

    async fn phone(&self, id: PhoneId) -> Result<PhoneNumber, EngineError> {
        self.phones
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or_else(|| EngineError::not_found("phone", id))
    }

    async fn update_phone(&self, phone: PhoneNumber) -> Result<(), EngineError> {
        match self.phones.entry(phone.id) {
            Entry::Occupied(mut slot) => {
                if slot.get().number != phone.number {
                    self.phone_numbers.remove(&slot.get().number);
                    self.phone_numbers.insert(phone.number.clone(), phone.id);
                }
                slot.insert(phone);
                Ok(())
            }
            Entry::Vacant(_) => Err(EngineError::not_found("phone", phone.id)),
        }
    }

    async fn delete_phone(&self, id: PhoneId) -> Result<(), EngineError> {
        let (_, phone) = self
            .phones
            .remove(&id)
            .ok_or_else(|| EngineError::not_found("phone", id))?;
        self.phone_numbers.remove(&phone.number);
        Ok(())
    }

    async fn phones(&self) -> Result<Vec<PhoneNumber>, EngineError> {
        let mut all: Vec<PhoneNumber> = self.phones.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(all)
    }

    async fn phones_by_registrant(&self, id: &EmployeeId) -> Result<Vec<PhoneNumber>, EngineError> {
        let mut hits: Vec<PhoneNumber> = self
            .phones
            .iter()
            .filter(|p| p.value().registrant_employee_id == *id)
            .map(|p| p.value().clone())
            .collect();
        hits.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(hits)
    }

    async fn phones_for_employee(&self, id: &EmployeeId) -> Result<Vec<PhoneNumber>, EngineError> {
        let mut hits: Vec<PhoneNumber> = self
            .phones
            .iter()
            .filter(|p| {
                p.value().registrant_employee_id == *id
                    || p.value().current_user_employee_id.as_ref() == Some(id)
            })
            .map(|p| p.value().clone())
            .collect();
        hits.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(hits)
    }

    async fn phone_by_number(&self, number: &str) -> Result<Option<PhoneNumber>, EngineError> {
        Ok(self
            .phone_numbers
            .get(number)
            .and_then(|id| self.phones.get(id.value()))
            .map(|p| p.value().clone()))
    }

    async fn insert_campaign(&self, campaign: Campaign) -> Result<(), EngineError> {
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn campaign(&self, id: CampaignId) -> Result<Campaign, EngineError> {
        self.campaigns
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| EngineError::not_found("campaign", id))
    }

    async fn update_campaign(&self, campaign: Campaign) -> Result<(), EngineError> {
        match self.campaigns.entry(campaign.id) {
            Entry::Occupied(mut slot) => {
                slot.insert(campaign);
                Ok(())
            }
            Entry::Vacant(_) => Err(EngineError::not_found("campaign", campaign.id)),
        }
    }

    async fn insert_token(&self, token: VerificationToken) -> Result<(), EngineError> {
        let key = (token.campaign_id, token.employee_id.clone());
        match self.token_index.entry(key) {
            Entry::Occupied(_) => {
                return Err(EngineError::Conflict(format!(
                    "token already issued to {} in campaign {}",
                    token.employee_id, token.campaign_id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(token.token);
            }
        }
        self.tokens.insert(token.token, token);
        Ok(())
    }

    async fn token(&self, id: TokenId) -> Result<VerificationToken, EngineError> {
        self.tokens
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or_else(|| EngineError::not_found("token", id))
    }

    async fn token_for(
        &self,
        campaign: CampaignId,
        employee: &EmployeeId,
    ) -> Result<Option<VerificationToken>, EngineError> {
        Ok(self
            .token_index
            .get(&(campaign, employee.clone()))
            .and_then(|id| self.tokens.get(id.value()))
            .map(|t| t.value().clone()))
    }

    async fn tokens_for_campaign(
        &self,
        campaign: CampaignId,
    ) -> Result<Vec<VerificationToken>, EngineError> {
        let mut hits: Vec<VerificationToken> = self
            .tokens
            .iter()
            .filter(|t| t.value().campaign_id == campaign)
            .map(|t| t.value().clone())
            .collect();
        hits.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
        Ok(hits)
    }

    async fn consume_token(&self, id: TokenId) -> Result<VerificationToken, EngineError> {
        match self.tokens.entry(id) {
            Entry::Occupied(mut slot) => {
                if slot.get().consumed {
                    return Err(EngineError::TokenAlreadyConsumed);
                }
                slot.get_mut().consumed = true;
                Ok(slot.get().clone())
            }
            Entry::Vacant(_) => Err(EngineError::not_found("token", id)),
        }
    }

    async fn insert_confirmation(&self, record: ConfirmationRecord) -> Result<(), EngineError> {
        self.confirmations
            .entry(record.campaign_id)
            .or_default()
            .push(record);
        Ok(())
    }

    async fn confirmations_for_campaign(
        &self,
        campaign: CampaignId,
    ) -> Result<Vec<ConfirmationRecord>, EngineError> {
        Ok(self
            .confirmations
            .get(&campaign)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }

    async fn insert_issue(&self, issue: IssueReport) -> Result<(), EngineError> {
        self.issues.entry(issue.campaign_id).or_default().push(issue);
        Ok(())
    }

    async fn issues_for_campaign(
        &self,
        campaign: CampaignId,
    ) -> Result<Vec<IssueReport>, EngineError> {
        Ok(self
            .issues
            .get(&campaign)
            .map(|i| i.value().clone())
            .unwrap_or_default())
    }

    async fn insert_risk_case(&self, case: RiskCase) -> Result<(), EngineError> {
        if case.is_open() {
            match self.open_risk_index.entry(case.phone_id) {
                Entry::Occupied(_) => {
                    return Err(EngineError::Conflict(format!(
                        "phone {} already has an open risk case",
                        case.phone_id
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(case.id);
                }
            }
        }
        self.risk_cases.insert(case.id, case);
        Ok(())
    }

    async fn open_risk_case(&self, phone: PhoneId) -> Result<Option<RiskCase>, EngineError> {
        Ok(self
            .open_risk_index
            .get(&phone)
            .and_then(|id| self.risk_cases.get(id.value()))
            .map(|c| c.value().clone()))
    }

    async fn update_risk_case(&self, case: RiskCase) -> Result<(), EngineError> {
        match self.risk_cases.entry(case.id) {
            Entry::Occupied(mut slot) => {
                if !case.is_open() {
                    self.open_risk_index.remove(&case.phone_id);
                }
                slot.insert(case);
                Ok(())
            }
            Entry::Vacant(_) => Err(EngineError::not_found("risk case", case.id)),
        }
    }

    async fn risk_case(&self, id: Uuid) -> Result<RiskCase, EngineError> {
        self.risk_cases
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or_else(|| EngineError::not_found("risk case", id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::test_phone;
    use crate::model::{PhoneStatus, RiskReason};
    use chrono::Utc;
    use std::sync::Arc;

    fn token(campaign: CampaignId, employee: &str) -> VerificationToken {
        VerificationToken {
            token: TokenId::new(),
            campaign_id: campaign,
            employee_id: EmployeeId::new(employee),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(7),
            consumed: false,
        }
    }

    fn open_case(phone: PhoneId) -> RiskCase {
        RiskCase {
            id: Uuid::new_v4(),
            phone_id: phone,
            reason: RiskReason::RegistrantDeparted,
            prior_status: PhoneStatus::InUse,
            detected_at: Utc::now(),
            resolution: None,
        }
    }

    #[tokio::test]
    async fn duplicate_phone_number_conflicts() {
        let store = MemoryStore::new();
        store.insert_phone(test_phone()).await.unwrap();
        let mut dup = test_phone();
        dup.id = PhoneId::new();
        let err = store.insert_phone(dup).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_phone_reindexes_number() {
        let store = MemoryStore::new();
        let mut phone = test_phone();
        store.insert_phone(phone.clone()).await.unwrap();

        phone.number = "090-9999-0000".to_string();
        store.update_phone(phone.clone()).await.unwrap();

        assert!(store.phone_by_number("080-1234-5678").await.unwrap().is_none());
        assert_eq!(
            store.phone_by_number("090-9999-0000").await.unwrap().unwrap().id,
            phone.id
        );
    }

    #[tokio::test]
    async fn token_unique_per_campaign_and_employee() {
        let store = MemoryStore::new();
        let campaign = CampaignId::new();
        store.insert_token(token(campaign, "E1")).await.unwrap();
        let err = store.insert_token(token(campaign, "E1")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        // Same employee in a different campaign is fine.
        store.insert_token(token(CampaignId::new(), "E1")).await.unwrap();
    }

    #[tokio::test]
    async fn consume_token_is_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let campaign = CampaignId::new();
        let tok = token(campaign, "E1");
        let id = tok.token;
        store.insert_token(tok).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.consume_token(id).await });
        }
        let mut successes = 0;
        let mut already = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(_) => successes += 1,
                Err(EngineError::TokenAlreadyConsumed) => already += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(already, 7);
    }

    #[tokio::test]
    async fn one_open_risk_case_per_phone() {
        let store = MemoryStore::new();
        let phone = PhoneId::new();
        store.insert_risk_case(open_case(phone)).await.unwrap();
        let err = store.insert_risk_case(open_case(phone)).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolving_a_case_frees_the_phone_for_new_cases() {
        let store = MemoryStore::new();
        let phone = PhoneId::new();
        let mut case = open_case(phone);
        store.insert_risk_case(case.clone()).await.unwrap();

        case.resolution = Some(crate::model::RiskResolution {
            action: crate::model::RiskAction::Reclaim,
            resolved_by: "admin".to_string(),
            resolved_at: Utc::now(),
        });
        store.update_risk_case(case).await.unwrap();

        assert!(store.open_risk_case(phone).await.unwrap().is_none());
        store.insert_risk_case(open_case(phone)).await.unwrap();
    }

    #[tokio::test]
    async fn phones_for_employee_covers_registrant_and_user() {
        let store = MemoryStore::new();
        let mut registered = test_phone();
        registered.registrant_employee_id = EmployeeId::new("E1");

        let mut used = test_phone();
        used.id = PhoneId::new();
        used.number = "090-1111-2222".to_string();
        used.registrant_employee_id = EmployeeId::new("E2");
        used.current_user_employee_id = Some(EmployeeId::new("E1"));

        store.insert_phone(registered).await.unwrap();
        store.insert_phone(used).await.unwrap();

        let mine = store.phones_for_employee(&EmployeeId::new("E1")).await.unwrap();
        assert_eq!(mine.len(), 2);
    }
}
