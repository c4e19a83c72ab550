//! Promo Codes
//!
//! Single-use codes that raise a tenant's tier for the rest of its current
//! subscription window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::entitlements::EntitlementConfig;
use crate::error::{AccessError, AccessResult};
use crate::model::{normalize_code, PromoCode, Redeemer, SubscriptionTier, TenantId};
use crate::store::TenantStore;

/// Result of a successful redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoRedemption {
    pub code: String,
    pub tier: SubscriptionTier,
    pub tenant_id: TenantId,
    pub valid_until: DateTime<Utc>,
}

/// Promo code manager
pub struct PromoService {
    store: Arc<dyn TenantStore>,
    grant_window: Duration,
}

impl PromoService {
    pub fn new(store: Arc<dyn TenantStore>, config: &EntitlementConfig) -> Self {
        Self {
            store,
            grant_window: config.promo_grant_window(),
        }
    }

    /// Create a new redeemable code
    pub async fn issue(&self, code: &str, tier: SubscriptionTier) -> AccessResult<PromoCode> {
        if normalize_code(code).is_empty() {
            return Err(AccessError::InvalidPromoCode);
        }
        let promo = self.store.insert_promo_code(PromoCode::new(code, tier)).await?;
        info!(code = %promo.code, tier = tier.as_str(), "promo code issued");
        Ok(promo)
    }

    /// Retire a code so it can no longer be redeemed
    pub async fn deactivate(&self, code: &str) -> AccessResult<PromoCode> {
        let promo = self.store.deactivate_promo_code(code).await?;
        info!(code = %promo.code, "promo code deactivated");
        Ok(promo)
    }

    pub async fn lookup(&self, code: &str) -> AccessResult<Option<PromoCode>> {
        Ok(self.store.find_promo_code(code).await?)
    }

    /// Redeem `code` for `redeemer`'s tenant.
    ///
    /// The grant lasts until the tenant's current subscription ends, or for
    /// the configured window when there is none. Exactly one concurrent
    /// caller wins; every other attempt gets [`AccessError::InvalidPromoCode`]
    /// and changes nothing.
    pub async fn redeem(&self, code: &str, redeemer: Redeemer) -> AccessResult<PromoRedemption> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(AccessError::InvalidPromoCode);
        }

        let now = Utc::now();
        let valid_until = self
            .store
            .active_subscription(redeemer.tenant_id)
            .await?
            .filter(|s| s.is_current(now))
            .map(|s| s.valid_until)
            .unwrap_or(now + self.grant_window);

        let Some(promo) = self
            .store
            .conditional_redeem(&code, redeemer, valid_until, now)
            .await?
        else {
            debug!(%code, tenant_id = %redeemer.tenant_id, "promo redemption rejected");
            return Err(AccessError::InvalidPromoCode);
        };

        info!(
            code = %promo.code,
            tier = promo.tier.as_str(),
            tenant_id = %redeemer.tenant_id,
            "promo code redeemed"
        );
        Ok(PromoRedemption {
            code: promo.code,
            tier: promo.tier,
            tenant_id: redeemer.tenant_id,
            valid_until,
        })
    }
}
