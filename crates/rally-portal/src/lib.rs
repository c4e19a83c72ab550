//! Rally Portal API
//!
//! Axum front end for the embedded app. Every route resolves the caller
//! through the tenant engine before touching data.

use axum::routing::{delete, get, post};
use axum::Router;
use rally_tenant::records::{Challenge, EntityKind, InMemoryScopedRepository, Participant};
use rally_tenant::{
    AccessPolicy, AccessResult, ContextExtractor, EntitlementService, GuardedRepository,
    IdentityResolver, IsolationGuard, PromoService, TenantDirectory, TenantStore,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;

use config::PortalConfig;

pub type ChallengeRepository = GuardedRepository<Challenge, InMemoryScopedRepository<Challenge>>;
pub type ParticipantRepository = GuardedRepository<Participant, InMemoryScopedRepository<Participant>>;

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<ContextExtractor>,
    pub resolver: Arc<IdentityResolver>,
    pub entitlements: Arc<EntitlementService>,
    pub promo: Arc<PromoService>,
    pub directory: Arc<TenantDirectory>,
    pub challenges: Arc<ChallengeRepository>,
    pub participants: Arc<ParticipantRepository>,
    /// Serializes participant additions so per-challenge counts stay exact
    pub roster_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: Arc<dyn TenantStore>, config: &PortalConfig) -> AccessResult<Self> {
        let guard = Arc::new(
            IsolationGuard::new()
                .register(EntityKind::CHALLENGE, AccessPolicy::PUBLIC_READ)
                .register(EntityKind::PARTICIPANT, AccessPolicy::PRIVATE),
        );

        Ok(Self {
            extractor: Arc::new(ContextExtractor::from_config(&config.identity)),
            resolver: Arc::new(IdentityResolver::new(store.clone())),
            entitlements: Arc::new(EntitlementService::new(
                store.clone(),
                config.entitlements.clone(),
            )),
            promo: Arc::new(PromoService::new(store.clone(), &config.entitlements)),
            directory: Arc::new(TenantDirectory::new(store)),
            challenges: Arc::new(GuardedRepository::new(
                InMemoryScopedRepository::new(),
                guard.clone(),
            )?),
            participants: Arc::new(GuardedRepository::new(
                InMemoryScopedRepository::new(),
                guard,
            )?),
            roster_lock: Arc::new(Mutex::new(())),
        })
    }
}

pub fn router(state: AppState) -> Router {
    use handlers::*;

    Router::new()
        // Health check
        .route("/health", get(health))

        // Identity
        .route("/api/access", get(get_access))

        // Challenges
        .route("/api/challenges", get(list_challenges).post(create_challenge))
        .route("/api/challenges/:id", delete(delete_challenge))
        .route("/api/challenges/:id/participants", post(add_participants))

        // Entitlements
        .route("/api/promo/redeem", post(redeem_promo))
        .route("/api/admin/usage", get(admin_usage))

        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
