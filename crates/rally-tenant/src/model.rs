//! Tenant Data Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::{AppRole, CapabilitySet};

/// Tenant ID
pub type TenantId = Uuid;

/// Internal user ID
pub type UserId = Uuid;

/// Subscription tier, ordered from lowest to highest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Basic,
    Starter,
    Professional,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Starter => "Starter",
            Self::Professional => "Professional",
        }
    }
}

/// Tenant definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant ID
    pub tenant_id: TenantId,
    /// Host platform company; `None` is the open-access tenant
    pub external_company_id: Option<String>,
    /// Display name
    pub name: String,
    /// Usage counters for the current period
    pub usage: UsageCounters,
    /// Tier granted by a redeemed promo code
    pub promo_grant: Option<TierGrant>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Create new tenant
    pub fn new(input: NewTenant) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: Uuid::new_v4(),
            external_company_id: input.external_company_id,
            name: input.name,
            usage: UsageCounters::starting_at(now),
            promo_grant: None,
            created_at: now,
        }
    }

    /// Promo tier still inside its window
    pub fn granted_tier(&self, now: DateTime<Utc>) -> Option<SubscriptionTier> {
        self.promo_grant
            .as_ref()
            .filter(|g| g.is_current(now))
            .map(|g| g.tier)
    }
}

/// Input for tenant creation
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub external_company_id: Option<String>,
    pub name: String,
}

impl NewTenant {
    /// Tenant for a host platform company, or the open-access tenant
    pub fn for_company(external_company_id: Option<&str>) -> Self {
        Self {
            external_company_id: external_company_id.map(str::to_owned),
            name: external_company_id.unwrap_or("open-access").to_owned(),
        }
    }
}

/// Per-tenant usage counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageCounters {
    pub active_challenges: u64,
    pub participants: u64,
    pub period_start: DateTime<Utc>,
}

impl UsageCounters {
    pub fn starting_at(period_start: DateTime<Utc>) -> Self {
        Self {
            active_challenges: 0,
            participants: 0,
            period_start,
        }
    }

    pub fn get(&self, counter: UsageCounter) -> u64 {
        match counter {
            UsageCounter::ActiveChallenges => self.active_challenges,
            UsageCounter::Participants => self.participants,
        }
    }

    pub fn get_mut(&mut self, counter: UsageCounter) -> &mut u64 {
        match counter {
            UsageCounter::ActiveChallenges => &mut self.active_challenges,
            UsageCounter::Participants => &mut self.participants,
        }
    }
}

/// Counter names on the tenant usage row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCounter {
    ActiveChallenges,
    Participants,
}

/// Tier upgrade granted by a promo code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierGrant {
    pub tier: SubscriptionTier,
    pub code: String,
    pub valid_until: DateTime<Utc>,
}

impl TierGrant {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }

    /// Whether this grant should replace `existing`. A live grant is never
    /// replaced by a lower tier.
    pub fn supersedes(&self, existing: Option<&TierGrant>, now: DateTime<Utc>) -> bool {
        match existing {
            Some(current) if current.is_current(now) => self.tier >= current.tier,
            _ => true,
        }
    }
}

/// Persisted user record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    /// Host platform user ID, the upsert key
    pub external_user_id: String,
    /// First-seen tenant; never reassigned
    pub tenant_id: TenantId,
    /// Last role observed from the live context
    pub role: AppRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(input: NewUser) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            external_user_id: input.external_user_id,
            tenant_id: input.tenant_id,
            role: input.role,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for user upsert
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_user_id: String,
    pub tenant_id: TenantId,
    pub role: AppRole,
}

/// Subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub tenant_id: TenantId,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub valid_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(tenant_id: TenantId, tier: SubscriptionTier, valid_until: DateTime<Utc>) -> Self {
        Self {
            subscription_id: Uuid::new_v4(),
            tenant_id,
            tier,
            status: SubscriptionStatus::Active,
            valid_until,
            created_at: Utc::now(),
        }
    }

    /// Active and not past its window
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.valid_until > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Canceled,
}

/// Who redeemed a promo code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redeemer {
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
}

/// One-time tier override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    /// Upper-cased, unique
    pub code: String,
    pub tier: SubscriptionTier,
    pub is_active: bool,
    pub used_by: Option<Redeemer>,
    pub created_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl PromoCode {
    pub fn new(code: &str, tier: SubscriptionTier) -> Self {
        Self {
            code: normalize_code(code),
            tier,
            is_active: true,
            used_by: None,
            created_at: Utc::now(),
            redeemed_at: None,
        }
    }

    pub fn is_redeemable(&self) -> bool {
        self.is_active && self.used_by.is_none()
    }
}

/// Canonical promo code form
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Identity construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("admin identity requires an external company id")]
    AdminWithoutCompany,
}

/// The authenticated caller for one request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    internal_user_id: Option<UserId>,
    external_user_id: Option<String>,
    tenant_id: Option<TenantId>,
    external_company_id: Option<String>,
    role: AppRole,
}

impl Identity {
    /// Unresolved caller: no user, no tenant
    pub fn guest() -> Self {
        Self {
            internal_user_id: None,
            external_user_id: None,
            tenant_id: None,
            external_company_id: None,
            role: AppRole::Guest,
        }
    }

    /// Bind a persisted user to the role derived from the live context
    pub fn new(
        user: &User,
        external_company_id: Option<String>,
        role: AppRole,
    ) -> Result<Self, IdentityError> {
        let external_company_id = external_company_id.filter(|c| !c.is_empty());
        if role == AppRole::Admin && external_company_id.is_none() {
            return Err(IdentityError::AdminWithoutCompany);
        }
        Ok(Self {
            internal_user_id: Some(user.user_id),
            external_user_id: Some(user.external_user_id.clone()),
            tenant_id: Some(user.tenant_id),
            external_company_id,
            role,
        })
    }

    pub fn internal_user_id(&self) -> Option<UserId> {
        self.internal_user_id
    }

    pub fn external_user_id(&self) -> Option<&str> {
        self.external_user_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn external_company_id(&self) -> Option<&str> {
        self.external_company_id.as_deref()
    }

    pub fn role(&self) -> AppRole {
        self.role
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.role.capabilities()
    }

    /// No tenant bound
    pub fn is_unresolved(&self) -> bool {
        self.tenant_id.is_none()
    }
}
