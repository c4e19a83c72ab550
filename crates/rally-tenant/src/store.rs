//! Storage port for users, tenants, subscriptions and promo codes
//!
//! Every method is one atomic storage operation. Conditional updates
//! (`conditional_increment`, `conditional_redeem`, the upserts) check and
//! write inside the same transaction, so callers never rely on an earlier
//! read to stay true.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::{
    normalize_code, NewTenant, NewUser, PromoCode, Redeemer, Subscription, SubscriptionStatus,
    Tenant, TenantId, TierGrant, UsageCounter, User, UserId,
};
use crate::roles::AppRole;

/// Repository result type
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Outcome of a conditional counter increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    /// Counter was below the cap and now holds this value
    Incremented(u64),
    /// Counter was already at or above the cap; nothing written
    CapReached(u64),
}

/// Persistence operations the engine depends on
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Look up a user by host platform ID
    async fn find_user(&self, external_user_id: &str) -> RepoResult<Option<User>>;

    /// Insert the user unless one with the same external ID exists.
    /// Returns the stored row either way.
    async fn upsert_user(&self, user: NewUser) -> RepoResult<User>;

    /// Overwrite a user's stored role
    async fn update_user_role(&self, user_id: UserId, role: AppRole) -> RepoResult<User>;

    /// Look up a tenant by host platform company; `None` is the open-access tenant
    async fn find_tenant(&self, external_company_id: Option<&str>) -> RepoResult<Option<Tenant>>;

    async fn get_tenant(&self, tenant_id: TenantId) -> RepoResult<Tenant>;

    async fn list_tenants(&self) -> RepoResult<Vec<Tenant>>;

    /// Insert the tenant unless one for the same company exists
    async fn upsert_tenant(&self, tenant: NewTenant) -> RepoResult<Tenant>;

    /// Delete a tenant; refused while users reference it
    async fn delete_tenant(&self, tenant_id: TenantId) -> RepoResult<()>;

    /// Increment `counter` only if its current value is below `cap`.
    /// `None` means no cap.
    async fn conditional_increment(
        &self,
        tenant_id: TenantId,
        counter: UsageCounter,
        cap: Option<u64>,
    ) -> RepoResult<CounterUpdate>;

    /// Saturating decrement; returns the new value
    async fn decrement(&self, tenant_id: TenantId, counter: UsageCounter) -> RepoResult<u64>;

    /// Unconditional add; returns the new value
    async fn add_usage(&self, tenant_id: TenantId, counter: UsageCounter, amount: u64) -> RepoResult<u64>;

    /// Start a new usage period if the current one began at least `period`
    /// ago. Only the per-period participant total resets; active challenges
    /// are live state and carry over. Returns whether a rollover happened.
    async fn reset_usage_if_stale(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
        period: Duration,
    ) -> RepoResult<bool>;

    async fn active_subscription(&self, tenant_id: TenantId) -> RepoResult<Option<Subscription>>;

    /// Store `subscription` as the tenant's active one, canceling any
    /// previously active subscription
    async fn activate_subscription(&self, subscription: Subscription) -> RepoResult<Subscription>;

    /// Cancel the active subscription, if any
    async fn cancel_subscription(&self, tenant_id: TenantId) -> RepoResult<Option<Subscription>>;

    /// Mark every active subscription past its window as expired
    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> RepoResult<usize>;

    async fn insert_promo_code(&self, promo: PromoCode) -> RepoResult<PromoCode>;

    async fn find_promo_code(&self, code: &str) -> RepoResult<Option<PromoCode>>;

    async fn deactivate_promo_code(&self, code: &str) -> RepoResult<PromoCode>;

    /// Compare-and-swap `(is_active, used_by = None) -> used_by = redeemer`
    /// and write the matching tier grant to the redeemer's tenant.
    /// `None` when the code is unknown, inactive or already used.
    async fn conditional_redeem(
        &self,
        code: &str,
        redeemer: Redeemer,
        grant_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<PromoCode>>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    tenants: HashMap<TenantId, Tenant>,
    tenants_by_company: HashMap<Option<String>, TenantId>,
    subscriptions: HashMap<Uuid, Subscription>,
    promo_codes: HashMap<String, PromoCode>,
}

impl Tables {
    fn tenant_mut(&mut self, tenant_id: TenantId) -> RepoResult<&mut Tenant> {
        self.tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("tenant {tenant_id}")))
    }
}

/// In-memory store. One lock guards all tables so every operation is a
/// single transaction.
#[derive(Default)]
pub struct InMemoryTenantStore {
    tables: RwLock<Tables>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
    /// Move the tenant's usage period start into the past
    #[cfg(test)]
    pub(crate) fn backdate_period(&self, tenant_id: TenantId, by: Duration) {
        if let Ok(tenant) = self.tables.write().tenant_mut(tenant_id) {
            tenant.usage.period_start = tenant.usage.period_start - by;
        }
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_user(&self, external_user_id: &str) -> RepoResult<Option<User>> {
        Ok(self.tables.read().users.get(external_user_id).cloned())
    }

    async fn upsert_user(&self, user: NewUser) -> RepoResult<User> {
        let mut tables = self.tables.write();
        if !tables.tenants.contains_key(&user.tenant_id) {
            return Err(RepositoryError::NotFound(format!("tenant {}", user.tenant_id)));
        }
        let stored = tables
            .users
            .entry(user.external_user_id.clone())
            .or_insert_with(|| User::new(user));
        Ok(stored.clone())
    }

    async fn update_user_role(&self, user_id: UserId, role: AppRole) -> RepoResult<User> {
        let mut tables = self.tables.write();
        let user = tables
            .users
            .values_mut()
            .find(|u| u.user_id == user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {user_id}")))?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn find_tenant(&self, external_company_id: Option<&str>) -> RepoResult<Option<Tenant>> {
        let tables = self.tables.read();
        let key = external_company_id.map(str::to_owned);
        Ok(tables
            .tenants_by_company
            .get(&key)
            .and_then(|id| tables.tenants.get(id))
            .cloned())
    }

    async fn get_tenant(&self, tenant_id: TenantId) -> RepoResult<Tenant> {
        self.tables
            .read()
            .tenants
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("tenant {tenant_id}")))
    }

    async fn list_tenants(&self) -> RepoResult<Vec<Tenant>> {
        Ok(self.tables.read().tenants.values().cloned().collect())
    }

    async fn upsert_tenant(&self, tenant: NewTenant) -> RepoResult<Tenant> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .tenants_by_company
            .get(&tenant.external_company_id)
            .and_then(|id| tables.tenants.get(id))
        {
            return Ok(existing.clone());
        }

        let tenant = Tenant::new(tenant);
        tables
            .tenants_by_company
            .insert(tenant.external_company_id.clone(), tenant.tenant_id);
        tables.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(tenant)
    }

    async fn delete_tenant(&self, tenant_id: TenantId) -> RepoResult<()> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|u| u.tenant_id == tenant_id) {
            return Err(RepositoryError::Conflict(format!(
                "tenant {tenant_id} still has users"
            )));
        }
        let tenant = tables
            .tenants
            .remove(&tenant_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("tenant {tenant_id}")))?;
        tables.tenants_by_company.remove(&tenant.external_company_id);
        tables.subscriptions.retain(|_, s| s.tenant_id != tenant_id);
        Ok(())
    }

    async fn conditional_increment(
        &self,
        tenant_id: TenantId,
        counter: UsageCounter,
        cap: Option<u64>,
    ) -> RepoResult<CounterUpdate> {
        let mut tables = self.tables.write();
        let value = tables.tenant_mut(tenant_id)?.usage.get_mut(counter);
        if cap.is_some_and(|cap| *value >= cap) {
            return Ok(CounterUpdate::CapReached(*value));
        }
        *value += 1;
        Ok(CounterUpdate::Incremented(*value))
    }

    async fn decrement(&self, tenant_id: TenantId, counter: UsageCounter) -> RepoResult<u64> {
        let mut tables = self.tables.write();
        let value = tables.tenant_mut(tenant_id)?.usage.get_mut(counter);
        *value = value.saturating_sub(1);
        Ok(*value)
    }

    async fn add_usage(&self, tenant_id: TenantId, counter: UsageCounter, amount: u64) -> RepoResult<u64> {
        let mut tables = self.tables.write();
        let value = tables.tenant_mut(tenant_id)?.usage.get_mut(counter);
        *value = value.saturating_add(amount);
        Ok(*value)
    }

    async fn reset_usage_if_stale(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
        period: Duration,
    ) -> RepoResult<bool> {
        let mut tables = self.tables.write();
        let tenant = tables.tenant_mut(tenant_id)?;
        if now - tenant.usage.period_start < period {
            return Ok(false);
        }
        tenant.usage.participants = 0;
        tenant.usage.period_start = now;
        Ok(true)
    }

    async fn active_subscription(&self, tenant_id: TenantId) -> RepoResult<Option<Subscription>> {
        Ok(self
            .tables
            .read()
            .subscriptions
            .values()
            .find(|s| s.tenant_id == tenant_id && s.status == SubscriptionStatus::Active)
            .cloned())
    }

    async fn activate_subscription(&self, mut subscription: Subscription) -> RepoResult<Subscription> {
        let mut tables = self.tables.write();
        if !tables.tenants.contains_key(&subscription.tenant_id) {
            return Err(RepositoryError::NotFound(format!(
                "tenant {}",
                subscription.tenant_id
            )));
        }
        for existing in tables.subscriptions.values_mut() {
            if existing.tenant_id == subscription.tenant_id
                && existing.status == SubscriptionStatus::Active
            {
                existing.status = SubscriptionStatus::Canceled;
            }
        }
        subscription.status = SubscriptionStatus::Active;
        tables
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn cancel_subscription(&self, tenant_id: TenantId) -> RepoResult<Option<Subscription>> {
        let mut tables = self.tables.write();
        Ok(tables
            .subscriptions
            .values_mut()
            .find(|s| s.tenant_id == tenant_id && s.status == SubscriptionStatus::Active)
            .map(|s| {
                s.status = SubscriptionStatus::Canceled;
                s.clone()
            }))
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> RepoResult<usize> {
        let mut tables = self.tables.write();
        let mut expired = 0;
        for sub in tables.subscriptions.values_mut() {
            if sub.status == SubscriptionStatus::Active && sub.valid_until <= now {
                sub.status = SubscriptionStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn insert_promo_code(&self, promo: PromoCode) -> RepoResult<PromoCode> {
        let mut tables = self.tables.write();
        if tables.promo_codes.contains_key(&promo.code) {
            return Err(RepositoryError::Conflict(format!(
                "promo code {} already exists",
                promo.code
            )));
        }
        tables.promo_codes.insert(promo.code.clone(), promo.clone());
        Ok(promo)
    }

    async fn find_promo_code(&self, code: &str) -> RepoResult<Option<PromoCode>> {
        Ok(self.tables.read().promo_codes.get(&normalize_code(code)).cloned())
    }

    async fn deactivate_promo_code(&self, code: &str) -> RepoResult<PromoCode> {
        let mut tables = self.tables.write();
        let code = normalize_code(code);
        let promo = tables
            .promo_codes
            .get_mut(&code)
            .ok_or_else(|| RepositoryError::NotFound(format!("promo code {code}")))?;
        promo.is_active = false;
        Ok(promo.clone())
    }

    async fn conditional_redeem(
        &self,
        code: &str,
        redeemer: Redeemer,
        grant_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<PromoCode>> {
        let mut tables = self.tables.write();
        let code = normalize_code(code);

        let tier = match tables.promo_codes.get(&code) {
            Some(promo) if promo.is_redeemable() => promo.tier,
            _ => return Ok(None),
        };

        let grant = TierGrant {
            tier,
            code: code.clone(),
            valid_until: grant_until,
        };
        let tenant = tables.tenant_mut(redeemer.tenant_id)?;
        if grant.supersedes(tenant.promo_grant.as_ref(), now) {
            tenant.promo_grant = Some(grant);
        }

        let Some(promo) = tables.promo_codes.get_mut(&code) else {
            return Ok(None);
        };
        promo.used_by = Some(redeemer);
        promo.redeemed_at = Some(now);
        Ok(Some(promo.clone()))
    }
}
