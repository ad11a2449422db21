use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{LedgerError, StoreError};
use crate::types::AffiliateIdentity;

/// Read access to affiliates, keyed by id and by referral code.
#[async_trait]
pub trait AffiliateDirectory: Send + Sync {
    async fn find_by_referral_code(&self, code: &str)
    -> Result<Option<AffiliateIdentity>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<AffiliateIdentity>, StoreError>;

    async fn list(&self) -> Result<Vec<AffiliateIdentity>, StoreError>;

    /// Creates or replaces an affiliate. Referral codes stay unique.
    async fn upsert(&self, affiliate: AffiliateIdentity) -> Result<(), StoreError>;
}

/// Resolves referral codes found in payment metadata to affiliates.
#[derive(Clone)]
pub struct ReferralResolver {
    directory: Arc<dyn AffiliateDirectory>,
}

impl ReferralResolver {
    pub fn new(directory: Arc<dyn AffiliateDirectory>) -> Self {
        Self { directory }
    }

    /// Looks up the active affiliate owning `code`.
    ///
    /// Surrounding whitespace is ignored; the code itself is matched exactly.
    /// Deactivated affiliates do not resolve.
    pub async fn resolve(&self, code: &str) -> Result<AffiliateIdentity, LedgerError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(LedgerError::ReferralNotFound(String::new()));
        }

        match self.directory.find_by_referral_code(code).await? {
            Some(affiliate) if affiliate.is_active => Ok(affiliate),
            Some(affiliate) => {
                tracing::debug!(affiliate_id = %affiliate.id, code, "referral code owner is inactive");
                Err(LedgerError::ReferralNotFound(code.to_string()))
            }
            None => Err(LedgerError::ReferralNotFound(code.to_string())),
        }
    }
}
