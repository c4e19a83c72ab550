//! Identity Resolution
//!
//! Binds a [`CallerContext`] to a persisted user and tenant. The user's
//! tenant and internal ID are sticky to first contact; the role is always
//! re-derived from the live context and never written back on resolution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::CallerContext;
use crate::error::{AccessError, AccessResult};
use crate::model::{Identity, NewTenant, NewUser, User};
use crate::roles::{self, AppRole};
use crate::store::{RepoResult, TenantStore};

/// Verdict handed to route handlers and the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlResult {
    pub user_type: AppRole,
    pub can_create_challenges: bool,
    pub can_view_admin: bool,
    pub can_view_my_feed: bool,
    pub can_view_discover: bool,
    /// Host platform user ID
    pub user_id: Option<String>,
    /// Host platform company ID
    pub company_id: Option<String>,
}

impl AccessControlResult {
    pub fn from_identity(identity: &Identity) -> Self {
        let caps = identity.capabilities();
        Self {
            user_type: identity.role(),
            can_create_challenges: caps.can_create_challenges,
            can_view_admin: caps.can_view_admin,
            can_view_my_feed: caps.can_view_my_feed,
            can_view_discover: caps.can_view_discover,
            user_id: identity.external_user_id().map(str::to_owned),
            company_id: identity.external_company_id().map(str::to_owned),
        }
    }
}

/// Identity resolver
pub struct IdentityResolver {
    store: Arc<dyn TenantStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// Resolve a caller. Never fails: anonymous callers and storage faults
    /// both yield a guest identity.
    pub async fn resolve(&self, ctx: &CallerContext) -> Identity {
        if ctx.is_anonymous() {
            return Identity::guest();
        }

        match self.try_resolve(ctx).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    error = %e,
                    source = ?ctx.source,
                    "identity resolution failed, treating caller as guest"
                );
                Identity::guest()
            }
        }
    }

    /// Resolve and project to the caller-facing shape
    pub async fn resolve_access(&self, ctx: &CallerContext) -> AccessControlResult {
        AccessControlResult::from_identity(&self.resolve(ctx).await)
    }

    async fn try_resolve(&self, ctx: &CallerContext) -> AccessResult<Identity> {
        let external_user_id = ctx
            .external_user_id
            .as_deref()
            .ok_or(AccessError::Unauthenticated)?;
        let company = ctx.external_company_id.as_deref().filter(|c| !c.is_empty());

        let mut role = roles::derive_role(ctx.access_level, company);
        if role == AppRole::Admin && company.is_none() {
            warn!(
                user = external_user_id,
                "admin access without a company id, downgrading to member"
            );
            role = AppRole::Member;
        }

        // Host denied access: never provisioned, never bound to a tenant
        if role == AppRole::Guest {
            debug!(user = external_user_id, "host platform denied access");
            return Ok(Identity::guest());
        }

        let user = match self.store.find_user(external_user_id).await? {
            Some(user) => user,
            None => self.provision(external_user_id, company, role).await?,
        };

        Ok(Identity::new(&user, company.map(str::to_owned), role)?)
    }

    /// First contact: find or create the company's tenant, then the user.
    /// Both steps are upserts, so concurrent first requests converge on the
    /// same rows.
    async fn provision(
        &self,
        external_user_id: &str,
        company: Option<&str>,
        role: AppRole,
    ) -> RepoResult<User> {
        let tenant = match self.store.find_tenant(company).await? {
            Some(tenant) => tenant,
            None => {
                let tenant = self.store.upsert_tenant(NewTenant::for_company(company)).await?;
                info!(tenant_id = %tenant.tenant_id, company = ?company, "tenant provisioned");
                tenant
            }
        };

        let user = self
            .store
            .upsert_user(NewUser {
                external_user_id: external_user_id.to_owned(),
                tenant_id: tenant.tenant_id,
                role,
            })
            .await?;
        info!(user_id = %user.user_id, tenant_id = %user.tenant_id, "user provisioned");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSourceKind;
    use crate::roles::HostAccessLevel;
    use crate::store::testing::UnavailableStore;
    use crate::store::InMemoryTenantStore;

    fn ctx(user: &str, company: Option<&str>, level: Option<HostAccessLevel>) -> CallerContext {
        CallerContext {
            external_user_id: Some(user.into()),
            external_company_id: company.map(Into::into),
            access_level: level,
            source: ContextSourceKind::Platform,
        }
    }

    fn resolver() -> (IdentityResolver, Arc<InMemoryTenantStore>) {
        let store = Arc::new(InMemoryTenantStore::new());
        (IdentityResolver::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_anonymous_is_guest() {
        let (resolver, store) = resolver();
        let identity = resolver.resolve(&CallerContext::anonymous()).await;

        assert_eq!(identity, Identity::guest());
        assert!(store.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let (resolver, store) = resolver();
        let caller = ctx("user_1", Some("biz_1"), Some(HostAccessLevel::Admin));

        let first = resolver.resolve(&caller).await;
        let second = resolver.resolve(&caller).await;

        assert_eq!(first.internal_user_id(), second.internal_user_id());
        assert_eq!(first.tenant_id(), second.tenant_id());
        assert_eq!(first.role(), AppRole::Admin);
        assert_eq!(store.list_tenants().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_contact() {
        let (resolver, store) = resolver();
        let resolver = Arc::new(resolver);
        let caller = ctx("user_new", Some("biz_new"), Some(HostAccessLevel::Customer));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let resolver = resolver.clone();
                let caller = caller.clone();
                tokio::spawn(async move { resolver.resolve(&caller).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().internal_user_id());
        }
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(store.list_tenants().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tenant_sticky_role_live() {
        let (resolver, store) = resolver();
        let first = resolver
            .resolve(&ctx("user_1", Some("biz_1"), Some(HostAccessLevel::Admin)))
            .await;

        // Same user shows up from another company as a customer
        let second = resolver
            .resolve(&ctx("user_1", Some("biz_2"), Some(HostAccessLevel::Customer)))
            .await;

        assert_eq!(second.tenant_id(), first.tenant_id());
        assert_eq!(second.role(), AppRole::Member);
        assert!(store.find_tenant(Some("biz_2")).await.unwrap().is_none());

        // Resolution is read-only once the user exists
        let stored = store.find_user("user_1").await.unwrap().unwrap();
        assert_eq!(stored.role, AppRole::Admin);
    }

    #[tokio::test]
    async fn test_no_access_is_never_provisioned() {
        let (resolver, store) = resolver();
        let identity = resolver
            .resolve(&ctx("outsider", Some("biz_1"), Some(HostAccessLevel::NoAccess)))
            .await;

        assert_eq!(identity, Identity::guest());
        assert!(identity.tenant_id().is_none());
        assert!(store.find_user("outsider").await.unwrap().is_none());
        assert!(store.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_user_resolves_as_guest() {
        let (resolver, store) = resolver();
        resolver
            .resolve(&ctx("user_1", Some("biz_1"), Some(HostAccessLevel::Customer)))
            .await;

        let revoked = resolver
            .resolve(&ctx("user_1", Some("biz_1"), Some(HostAccessLevel::NoAccess)))
            .await;
        assert_eq!(revoked, Identity::guest());
        assert!(store.find_user("user_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_admin_without_company_downgraded() {
        let (resolver, _) = resolver();
        let identity = resolver
            .resolve(&ctx("user_1", None, Some(HostAccessLevel::Admin)))
            .await;

        assert_eq!(identity.role(), AppRole::Member);
        assert!(identity.tenant_id().is_some());
    }

    #[tokio::test]
    async fn test_no_company_uses_open_tenant() {
        let (resolver, _) = resolver();
        let a = resolver.resolve(&ctx("user_a", None, None)).await;
        let b = resolver.resolve(&ctx("user_b", None, None)).await;

        assert_eq!(a.role(), AppRole::Member);
        assert_eq!(a.tenant_id(), b.tenant_id());
        assert_ne!(a.internal_user_id(), b.internal_user_id());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let resolver = IdentityResolver::new(Arc::new(UnavailableStore));
        let access = resolver
            .resolve_access(&ctx("user_1", Some("biz_1"), Some(HostAccessLevel::Admin)))
            .await;

        assert_eq!(access.user_type, AppRole::Guest);
        assert!(!access.can_create_challenges);
        assert!(!access.can_view_admin);
        assert!(access.can_view_discover);
        assert_eq!(access.user_id, None);
    }

    #[tokio::test]
    async fn test_access_result_shape() {
        let (resolver, _) = resolver();
        let access = resolver
            .resolve_access(&ctx("user_1", Some("biz_1"), Some(HostAccessLevel::Admin)))
            .await;

        let json = serde_json::to_value(&access).unwrap();
        assert_eq!(json["userType"], "admin");
        assert_eq!(json["canCreateChallenges"], true);
        assert_eq!(json["userId"], "user_1");
        assert_eq!(json["companyId"], "biz_1");
    }
}
