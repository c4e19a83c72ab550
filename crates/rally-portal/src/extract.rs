//! Per-request caller resolution

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use rally_tenant::{CallerContext, Identity, RequestSignals, TenantId};
use std::collections::HashMap;
use std::convert::Infallible;

use crate::error::ApiError;
use crate::AppState;

/// Resolved identity of the caller. Extraction never rejects; unresolvable
/// callers become guests.
pub struct Caller {
    pub context: CallerContext,
    pub identity: Identity,
}

impl Caller {
    /// The caller's tenant, or `Unauthenticated` for guests
    pub fn tenant_id(&self) -> Result<TenantId, ApiError> {
        self.identity
            .tenant_id()
            .ok_or(ApiError::Access(rally_tenant::AccessError::Unauthenticated))
    }
}

fn signals_from_parts(parts: &Parts) -> RequestSignals {
    let mut signals = RequestSignals::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            signals = signals.with_header(name.as_str(), value);
        }
    }
    if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
        for (name, value) in &params {
            signals = signals.with_query(name, value);
        }
    }
    signals
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let context = state.extractor.extract(&signals_from_parts(parts));
        let identity = state.resolver.resolve(&context).await;
        Ok(Self { context, identity })
    }
}
