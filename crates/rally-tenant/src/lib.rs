//! Rally Tenant Engine
//!
//! Identity resolution, tenant isolation and subscription entitlements for
//! an app embedded in a host platform.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RALLY TENANT ENGINE                              │
//! │                                                                         │
//! │   request signals (headers, cookies, query)                             │
//! │          │                                                              │
//! │  ┌───────▼──────────────────────────────────────────────────────────┐  │
//! │  │  CONTEXT EXTRACTOR   platform token │ dev override │ anonymous    │  │
//! │  └───────┬──────────────────────────────────────────────────────────┘  │
//! │          │ CallerContext                                                │
//! │  ┌───────▼──────────────────────────────────────────────────────────┐  │
//! │  │  IDENTITY RESOLVER   upsert tenant + user │ live role → caps      │  │
//! │  └───────┬──────────────────────────────────────────────────────────┘  │
//! │          │ Identity                                                     │
//! │  ┌───────▼─────────────────┐      ┌───────────────────────────────┐    │
//! │  │  ISOLATION GUARD        │      │  ENTITLEMENTS + PROMO CODES   │    │
//! │  │  tenant filter / deny   │      │  tier caps │ atomic counters  │    │
//! │  └───────┬─────────────────┘      └──────────────┬────────────────┘    │
//! │          │                                       │                      │
//! │  ┌───────▼───────────────────────────────────────▼──────────────────┐  │
//! │  │  STORAGE PORT   users │ tenants │ subscriptions │ promo codes     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod entitlements;
pub mod error;
pub mod identity;
pub mod isolation;
pub mod lifecycle;
pub mod model;
pub mod promo;
pub mod records;
pub mod roles;
pub mod store;

pub use context::{CallerContext, ContextExtractor, ExtractorConfig, RequestSignals};
pub use entitlements::{EntitlementConfig, EntitlementService, QuotaVerdict, TierLimits};
pub use error::{AccessError, AccessResult};
pub use identity::{AccessControlResult, IdentityResolver};
pub use isolation::{AccessPolicy, GuardedRepository, IsolationGuard};
pub use lifecycle::TenantDirectory;
pub use model::{Identity, SubscriptionTier, TenantId, UserId};
pub use promo::PromoService;
pub use roles::{AppRole, CapabilitySet, HostAccessLevel};
pub use store::{InMemoryTenantStore, TenantStore};
