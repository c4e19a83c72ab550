//! Tenant Lifecycle Management

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::AccessError;
use crate::model::{NewTenant, Subscription, SubscriptionTier, Tenant, TenantId, User};
use crate::roles::AppRole;
use crate::store::{RepositoryError, TenantStore};

/// Tenant directory
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// Create the tenant for `company`, or return the existing one
    pub async fn provision(&self, company: Option<&str>) -> Result<Tenant, LifecycleError> {
        let tenant = self.store.upsert_tenant(NewTenant::for_company(company)).await?;
        info!(tenant_id = %tenant.tenant_id, company = ?company, "tenant provisioned");
        Ok(tenant)
    }

    pub async fn get(&self, tenant_id: TenantId) -> Result<Tenant, LifecycleError> {
        Ok(self.store.get_tenant(tenant_id).await?)
    }

    pub async fn find(&self, company: Option<&str>) -> Result<Option<Tenant>, LifecycleError> {
        Ok(self.store.find_tenant(company).await?)
    }

    pub async fn list(&self) -> Result<Vec<Tenant>, LifecycleError> {
        Ok(self.store.list_tenants().await?)
    }

    /// Delete a tenant with no remaining users
    pub async fn delete(&self, tenant_id: TenantId) -> Result<(), LifecycleError> {
        self.store.delete_tenant(tenant_id).await?;
        info!(%tenant_id, "tenant deleted");
        Ok(())
    }

    /// Explicit role change for a persisted user. Resolution never writes
    /// the role; this is the only path that does.
    pub async fn set_user_role(&self, external_user_id: &str, role: AppRole) -> Result<User, LifecycleError> {
        let user = self
            .store
            .find_user(external_user_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("user {external_user_id}")))?;
        let user = self.store.update_user_role(user.user_id, role).await?;
        info!(user_id = %user.user_id, role = role.as_str(), "user role changed");
        Ok(user)
    }

    /// Start a subscription, replacing the tenant's current one
    pub async fn subscribe(
        &self,
        tenant_id: TenantId,
        tier: SubscriptionTier,
        valid_until: DateTime<Utc>,
    ) -> Result<Subscription, LifecycleError> {
        if valid_until <= Utc::now() {
            return Err(LifecycleError::InvalidWindow(valid_until));
        }
        let subscription = self
            .store
            .activate_subscription(Subscription::new(tenant_id, tier, valid_until))
            .await?;
        info!(%tenant_id, tier = tier.as_str(), %valid_until, "subscription activated");
        Ok(subscription)
    }

    pub async fn cancel_subscription(&self, tenant_id: TenantId) -> Result<Option<Subscription>, LifecycleError> {
        let canceled = self.store.cancel_subscription(tenant_id).await?;
        if canceled.is_some() {
            info!(%tenant_id, "subscription canceled");
        }
        Ok(canceled)
    }

    /// Mark lapsed subscriptions expired; returns how many changed
    pub async fn expire_subscriptions(&self) -> Result<usize, LifecycleError> {
        let expired = self.store.expire_subscriptions(Utc::now()).await?;
        if expired > 0 {
            info!(expired, "subscriptions expired");
        }
        Ok(expired)
    }

    /// Run [`expire_subscriptions`](Self::expire_subscriptions) every `period`
    pub fn spawn_expiry_sweep(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_subscriptions().await {
                    warn!(error = %e, "subscription expiry sweep failed");
                }
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tenant in use: {0}")]
    InUse(String),
    #[error("subscription window already ended at {0}")]
    InvalidWindow(DateTime<Utc>),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => Self::NotFound(what),
            RepositoryError::Conflict(what) => Self::InUse(what),
            RepositoryError::StorageError(msg) => Self::Storage(msg),
        }
    }
}

impl From<LifecycleError> for AccessError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Storage(msg) => AccessError::StorageUnavailable(msg),
            other => AccessError::denied(other.to_string()),
        }
    }
}
