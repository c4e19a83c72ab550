//! Tenant Entitlements and Quota Gating
//!
//! Challenge creation and participant additions are gated by the tenant's
//! effective tier. The tier comes from the current subscription (Basic when
//! none is current), raised by any promo grant still inside its window.
//!
//! Challenge-slot consumption is a single conditional increment against the
//! tenant's counter row, so concurrent creators can never overshoot a cap.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AccessError, AccessResult};
use crate::model::{Subscription, SubscriptionTier, TenantId, TierGrant, UsageCounter, UsageCounters};
use crate::store::{CounterUpdate, TenantStore};

/// Entitlement settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EntitlementConfig {
    /// Active-challenge ceiling for the Starter tier
    pub starter_challenge_ceiling: u64,
    /// Length of a usage period before counters roll over
    pub usage_period_days: i64,
    /// Promo grant window when the tenant has no current subscription
    pub promo_grant_days: i64,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            starter_challenge_ceiling: 1000,
            usage_period_days: 30,
            promo_grant_days: 30,
        }
    }
}

impl EntitlementConfig {
    pub fn usage_period(&self) -> Duration {
        Duration::days(self.usage_period_days.max(1))
    }

    pub fn promo_grant_window(&self) -> Duration {
        Duration::days(self.promo_grant_days.max(1))
    }
}

/// Caps for one tier; `None` is unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_active_challenges: Option<u64>,
    pub max_participants_per_challenge: Option<u64>,
}

impl TierLimits {
    pub fn unlimited() -> Self {
        Self {
            max_active_challenges: None,
            max_participants_per_challenge: None,
        }
    }

    pub fn for_tier(tier: SubscriptionTier, config: &EntitlementConfig) -> Self {
        match tier {
            SubscriptionTier::Basic => Self {
                max_active_challenges: Some(1),
                max_participants_per_challenge: Some(25),
            },
            SubscriptionTier::Starter => Self {
                max_active_challenges: Some(config.starter_challenge_ceiling),
                max_participants_per_challenge: Some(250),
            },
            SubscriptionTier::Professional => Self::unlimited(),
        }
    }
}

/// Outcome of an entitlement check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl QuotaVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    /// Convert a denial into [`AccessError::QuotaExceeded`]
    pub fn into_result(self) -> AccessResult<()> {
        match self.reason {
            Some(reason) if !self.allowed => Err(AccessError::quota(reason)),
            _ => Ok(()),
        }
    }
}

/// Usage snapshot for the admin surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub tenant_id: TenantId,
    pub tier: SubscriptionTier,
    pub limits: TierLimits,
    pub usage: UsageCounters,
    pub subscription: Option<Subscription>,
    pub promo_grant: Option<TierGrant>,
}

fn challenge_cap_reason(tier: SubscriptionTier, cap: u64) -> String {
    format!(
        "The {} plan allows {} active challenge{}. Upgrade your plan to create more.",
        tier.as_str(),
        cap,
        if cap == 1 { "" } else { "s" }
    )
}

/// Entitlement service
pub struct EntitlementService {
    store: Arc<dyn TenantStore>,
    config: EntitlementConfig,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn TenantStore>, config: EntitlementConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EntitlementConfig {
        &self.config
    }

    /// Current subscription tier (Basic if none), raised by a live promo grant
    pub async fn effective_tier(&self, tenant_id: TenantId) -> AccessResult<SubscriptionTier> {
        let now = Utc::now();
        let tenant = self.store.get_tenant(tenant_id).await?;
        let subscribed = self
            .store
            .active_subscription(tenant_id)
            .await?
            .filter(|s| s.is_current(now))
            .map(|s| s.tier)
            .unwrap_or(SubscriptionTier::Basic);

        Ok(match tenant.granted_tier(now) {
            Some(granted) => subscribed.max(granted),
            None => subscribed,
        })
    }

    async fn roll_period(&self, tenant_id: TenantId, now: DateTime<Utc>) -> AccessResult<()> {
        if self
            .store
            .reset_usage_if_stale(tenant_id, now, self.config.usage_period())
            .await?
        {
            info!(%tenant_id, "usage period rolled over");
        }
        Ok(())
    }

    /// Whether the tenant may start another challenge
    pub async fn check_can_create_challenge(&self, tenant_id: TenantId) -> AccessResult<QuotaVerdict> {
        self.roll_period(tenant_id, Utc::now()).await?;
        let tier = self.effective_tier(tenant_id).await?;
        let limits = TierLimits::for_tier(tier, &self.config);
        let active = self.store.get_tenant(tenant_id).await?.usage.active_challenges;

        Ok(match limits.max_active_challenges {
            Some(cap) if active >= cap => QuotaVerdict::deny(challenge_cap_reason(tier, cap)),
            _ => QuotaVerdict::allow(),
        })
    }

    /// Consume one challenge slot. The cap is re-checked inside the
    /// increment; returns the new active count.
    pub async fn increment_challenge_usage(&self, tenant_id: TenantId) -> AccessResult<u64> {
        self.roll_period(tenant_id, Utc::now()).await?;
        let tier = self.effective_tier(tenant_id).await?;
        let cap = TierLimits::for_tier(tier, &self.config).max_active_challenges;

        match self
            .store
            .conditional_increment(tenant_id, UsageCounter::ActiveChallenges, cap)
            .await?
        {
            CounterUpdate::Incremented(active) => {
                debug!(%tenant_id, active, "challenge slot consumed");
                Ok(active)
            }
            CounterUpdate::CapReached(active) => {
                debug!(%tenant_id, active, "challenge cap reached");
                Err(AccessError::quota(challenge_cap_reason(
                    tier,
                    cap.unwrap_or(active),
                )))
            }
        }
    }

    /// Return a slot when a challenge ends or is deleted
    pub async fn release_challenge_usage(&self, tenant_id: TenantId) -> AccessResult<u64> {
        Ok(self
            .store
            .decrement(tenant_id, UsageCounter::ActiveChallenges)
            .await?)
    }

    /// Whether a challenge may hold `participant_count` participants
    pub async fn check_can_add_participants(
        &self,
        tenant_id: TenantId,
        participant_count: i64,
    ) -> AccessResult<QuotaVerdict> {
        let Ok(count) = u64::try_from(participant_count) else {
            return Ok(QuotaVerdict::deny("Participant count must be a non-negative integer."));
        };

        let tier = self.effective_tier(tenant_id).await?;
        Ok(
            match TierLimits::for_tier(tier, &self.config).max_participants_per_challenge {
                Some(cap) if count > cap => QuotaVerdict::deny(format!(
                    "The {} plan allows up to {} participants per challenge.",
                    tier.as_str(),
                    cap
                )),
                _ => QuotaVerdict::allow(),
            },
        )
    }

    /// Add to the tenant's participant counter for the current period
    pub async fn record_participants(&self, tenant_id: TenantId, count: u64) -> AccessResult<u64> {
        self.roll_period(tenant_id, Utc::now()).await?;
        Ok(self
            .store
            .add_usage(tenant_id, UsageCounter::Participants, count)
            .await?)
    }

    pub async fn usage_report(&self, tenant_id: TenantId) -> AccessResult<UsageReport> {
        let now = Utc::now();
        self.roll_period(tenant_id, now).await?;
        let tier = self.effective_tier(tenant_id).await?;
        let tenant = self.store.get_tenant(tenant_id).await?;
        let subscription = self
            .store
            .active_subscription(tenant_id)
            .await?
            .filter(|s| s.is_current(now));

        Ok(UsageReport {
            tenant_id,
            tier,
            limits: TierLimits::for_tier(tier, &self.config),
            usage: tenant.usage,
            subscription,
            promo_grant: tenant.promo_grant.filter(|g| g.is_current(now)),
        })
    }
}
