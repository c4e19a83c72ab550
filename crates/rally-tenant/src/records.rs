//! Tenant-scoped records
//!
//! Every record carries its owning tenant explicitly. Repositories for these
//! records are only reachable through
//! [`GuardedRepository`](crate::isolation::GuardedRepository).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::{TenantId, UserId};
use crate::store::{RepoResult, RepositoryError};

/// Name of a tenant-scoped entity type, used as the guard registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKind(&'static str);

impl EntityKind {
    pub const CHALLENGE: EntityKind = EntityKind("challenge");
    pub const PARTICIPANT: EntityKind = EntityKind("participant");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A record owned by exactly one tenant
pub trait TenantScoped: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn record_id(&self) -> Uuid;

    fn tenant_id(&self) -> TenantId;
}

/// Tenant filter injected into list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    /// Records owned by this tenant only
    Tenant(TenantId),
    /// Public-read listing across tenants
    Public,
}

impl TenantScope {
    pub fn admits(&self, tenant_id: TenantId) -> bool {
        match self {
            Self::Tenant(id) => *id == tenant_id,
            Self::Public => true,
        }
    }
}

/// Challenge owned by a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: Uuid,
    pub tenant_id: TenantId,
    pub title: String,
    /// Participant cap chosen by the creator
    pub max_participants: u64,
    pub participant_count: u64,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(tenant_id: TenantId, title: &str, max_participants: u64, created_by: Option<UserId>) -> Self {
        Self {
            challenge_id: Uuid::new_v4(),
            tenant_id,
            title: title.to_string(),
            max_participants,
            participant_count: 0,
            created_by,
            created_at: Utc::now(),
        }
    }
}

impl TenantScoped for Challenge {
    const KIND: EntityKind = EntityKind::CHALLENGE;

    fn record_id(&self) -> Uuid {
        self.challenge_id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// A user's membership in a challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: Uuid,
    pub tenant_id: TenantId,
    pub challenge_id: Uuid,
    pub external_user_id: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(challenge: &Challenge, external_user_id: &str) -> Self {
        Self {
            participant_id: Uuid::new_v4(),
            tenant_id: challenge.tenant_id,
            challenge_id: challenge.challenge_id,
            external_user_id: external_user_id.to_string(),
            joined_at: Utc::now(),
        }
    }
}

impl TenantScoped for Participant {
    const KIND: EntityKind = EntityKind::PARTICIPANT;

    fn record_id(&self) -> Uuid {
        self.participant_id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Storage for one tenant-scoped record type
#[async_trait]
pub trait ScopedRepository<T: TenantScoped>: Send + Sync {
    async fn get(&self, id: Uuid) -> RepoResult<Option<T>>;

    async fn list(&self, scope: TenantScope) -> RepoResult<Vec<T>>;

    async fn insert(&self, record: T) -> RepoResult<T>;

    /// Replace an existing record
    async fn update(&self, record: T) -> RepoResult<T>;

    async fn delete(&self, id: Uuid) -> RepoResult<()>;
}

/// In-memory record storage
pub struct InMemoryScopedRepository<T> {
    records: DashMap<Uuid, T>,
}

impl<T> InMemoryScopedRepository<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<T> Default for InMemoryScopedRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: TenantScoped> ScopedRepository<T> for InMemoryScopedRepository<T> {
    async fn get(&self, id: Uuid) -> RepoResult<Option<T>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn list(&self, scope: TenantScope) -> RepoResult<Vec<T>> {
        Ok(self
            .records
            .iter()
            .filter(|r| scope.admits(r.value().tenant_id()))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn insert(&self, record: T) -> RepoResult<T> {
        match self.records.entry(record.record_id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "{} {} already exists",
                T::KIND,
                record.record_id()
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(&self, record: T) -> RepoResult<T> {
        let mut existing = self
            .records
            .get_mut(&record.record_id())
            .ok_or_else(|| RepositoryError::NotFound(format!("{} {}", T::KIND, record.record_id())))?;
        *existing = record.clone();
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("{} {id}", T::KIND)))
    }
}
