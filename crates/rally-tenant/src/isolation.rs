//! Tenant Isolation Guard
//!
//! Every tenant-scoped read or write runs under exactly the caller's
//! resolved tenant. Entity kinds must be registered before any repository
//! for them can be wrapped; unregistered kinds are always denied.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AccessError, AccessResult};
use crate::model::{Identity, TenantId};
use crate::records::{EntityKind, ScopedRepository, TenantScope, TenantScoped};

/// Kind of data operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Per-kind access policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Unresolved callers may read (e.g. the discover feed)
    pub public_read: bool,
}

impl AccessPolicy {
    pub const PRIVATE: AccessPolicy = AccessPolicy { public_read: false };
    pub const PUBLIC_READ: AccessPolicy = AccessPolicy { public_read: true };
}

/// Isolation guard - enforces tenant separation
#[derive(Debug, Default)]
pub struct IsolationGuard {
    policies: HashMap<EntityKind, AccessPolicy>,
}

impl IsolationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity kind
    pub fn register(mut self, kind: EntityKind, policy: AccessPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    pub fn is_registered(&self, kind: EntityKind) -> bool {
        self.policies.contains_key(&kind)
    }

    fn policy(&self, kind: EntityKind) -> AccessResult<AccessPolicy> {
        self.policies.get(&kind).copied().ok_or_else(|| {
            warn!(%kind, "operation on unregistered entity kind");
            AccessError::denied(format!("{kind} is not a registered tenant-scoped entity"))
        })
    }

    /// Authorize one operation on a record owned by `record_tenant`
    pub fn authorize(
        &self,
        identity: &Identity,
        kind: EntityKind,
        op: Operation,
        record_tenant: TenantId,
    ) -> AccessResult<()> {
        let policy = self.policy(kind)?;

        match identity.tenant_id() {
            None if op == Operation::Read && policy.public_read => Ok(()),
            None => Err(guest_denied(kind, op)),
            Some(tenant) if tenant == record_tenant => Ok(()),
            Some(tenant) => {
                warn!(
                    %kind,
                    caller_tenant = %tenant,
                    record_tenant = %record_tenant,
                    ?op,
                    "cross-tenant access rejected"
                );
                Err(AccessError::denied(format!("{kind} belongs to another tenant")))
            }
        }
    }

    /// Tenant filter to inject into a list query
    pub fn scope(&self, identity: &Identity, kind: EntityKind, op: Operation) -> AccessResult<TenantScope> {
        let policy = self.policy(kind)?;

        match identity.tenant_id() {
            Some(tenant) => Ok(TenantScope::Tenant(tenant)),
            None if op == Operation::Read && policy.public_read => Ok(TenantScope::Public),
            None => Err(guest_denied(kind, op)),
        }
    }

    /// Drop every record the caller may not read
    pub fn filter<T: TenantScoped>(&self, identity: &Identity, records: Vec<T>) -> Vec<T> {
        records
            .into_iter()
            .filter(|r| self.authorize(identity, T::KIND, Operation::Read, r.tenant_id()).is_ok())
            .collect()
    }
}

fn guest_denied(kind: EntityKind, op: Operation) -> AccessError {
    debug!(%kind, ?op, "guest operation rejected");
    AccessError::denied(format!("{op:?} on {kind} requires a tenant"))
}

/// Repository wrapper that routes every call through the guard
pub struct GuardedRepository<T, R> {
    inner: R,
    guard: Arc<IsolationGuard>,
    _record: PhantomData<fn() -> T>,
}

impl<T, R> GuardedRepository<T, R>
where
    T: TenantScoped,
    R: ScopedRepository<T>,
{
    /// Wrap `inner`. Fails if `T`'s kind was never registered.
    pub fn new(inner: R, guard: Arc<IsolationGuard>) -> AccessResult<Self> {
        if !guard.is_registered(T::KIND) {
            return Err(AccessError::denied(format!(
                "{} must be registered with the isolation guard",
                T::KIND
            )));
        }
        Ok(Self {
            inner,
            guard,
            _record: PhantomData,
        })
    }

    /// `None` if absent; `AccessDenied` if owned by another tenant
    pub async fn get(&self, identity: &Identity, id: Uuid) -> AccessResult<Option<T>> {
        let Some(record) = self.inner.get(id).await? else {
            return Ok(None);
        };
        self.guard
            .authorize(identity, T::KIND, Operation::Read, record.tenant_id())?;
        Ok(Some(record))
    }

    pub async fn list(&self, identity: &Identity) -> AccessResult<Vec<T>> {
        let scope = self.guard.scope(identity, T::KIND, Operation::Read)?;
        let records = self.inner.list(scope).await?;
        Ok(self.guard.filter(identity, records))
    }

    pub async fn insert(&self, identity: &Identity, record: T) -> AccessResult<T> {
        self.guard
            .authorize(identity, T::KIND, Operation::Write, record.tenant_id())?;
        Ok(self.inner.insert(record).await?)
    }

    /// The stored record and the replacement must both belong to the caller
    pub async fn update(&self, identity: &Identity, record: T) -> AccessResult<T> {
        self.guard
            .authorize(identity, T::KIND, Operation::Write, record.tenant_id())?;
        if let Some(stored) = self.inner.get(record.record_id()).await? {
            self.guard
                .authorize(identity, T::KIND, Operation::Write, stored.tenant_id())?;
        }
        Ok(self.inner.update(record).await?)
    }

    pub async fn delete(&self, identity: &Identity, id: Uuid) -> AccessResult<T> {
        let record = self
            .inner
            .get(id)
            .await?
            .ok_or_else(|| AccessError::denied(format!("{} {id} not found", T::KIND)))?;
        self.guard
            .authorize(identity, T::KIND, Operation::Write, record.tenant_id())?;
        self.inner.delete(id).await?;
        Ok(record)
    }
}
