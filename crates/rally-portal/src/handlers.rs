//! API Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rally_tenant::entitlements::UsageReport;
use rally_tenant::model::Redeemer;
use rally_tenant::promo::PromoRedemption;
use rally_tenant::records::{Challenge, Participant};
use rally_tenant::{roles, AccessControlResult, AccessError};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::Caller;
use crate::models::*;
use crate::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

/// Guests get `Unauthenticated`; resolved callers without the role get `AccessDenied`
fn require(caller: &Caller, allowed: bool, action: &str) -> Result<(), ApiError> {
    if allowed {
        Ok(())
    } else if caller.identity.is_unresolved() {
        Err(AccessError::Unauthenticated.into())
    } else {
        Err(AccessError::denied(format!("{} cannot {action}", caller.identity.role())).into())
    }
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_access(caller: Caller) -> Json<ApiResponse<AccessControlResult>> {
    Json(ApiResponse::success(AccessControlResult::from_identity(&caller.identity)))
}

// Challenges
pub async fn list_challenges(State(state): State<AppState>, caller: Caller) -> ApiResult<Vec<Challenge>> {
    let mut challenges = state.challenges.list(&caller.identity).await?;
    challenges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ok(challenges)
}

pub async fn create_challenge(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<CreateChallenge>,
) -> Result<(StatusCode, Json<ApiResponse<Challenge>>), ApiError> {
    require(&caller, caller.identity.capabilities().can_create_challenges, "create challenges")?;
    let tenant_id = caller.tenant_id()?;

    let title = input.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }

    state
        .entitlements
        .check_can_add_participants(tenant_id, input.max_participants)
        .await?
        .into_result()?;
    let max_participants = u64::try_from(input.max_participants)
        .map_err(|_| ApiError::BadRequest("max_participants must be non-negative".into()))?;

    state
        .entitlements
        .check_can_create_challenge(tenant_id)
        .await?
        .into_result()?;
    state.entitlements.increment_challenge_usage(tenant_id).await?;

    let challenge = Challenge::new(tenant_id, title, max_participants, caller.identity.internal_user_id());
    let challenge = match state.challenges.insert(&caller.identity, challenge).await {
        Ok(challenge) => challenge,
        Err(e) => {
            state.entitlements.release_challenge_usage(tenant_id).await?;
            return Err(e.into());
        }
    };

    info!(challenge_id = %challenge.challenge_id, %tenant_id, "challenge created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(challenge))))
}

pub async fn delete_challenge(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
) -> ApiResult<Challenge> {
    require(&caller, roles::is_admin_role(caller.identity.role()), "delete challenges")?;
    let tenant_id = caller.tenant_id()?;

    if state.challenges.get(&caller.identity, id).await?.is_none() {
        return Err(ApiError::NotFound(format!("challenge {id}")));
    }
    let challenge = state.challenges.delete(&caller.identity, id).await?;
    state.entitlements.release_challenge_usage(tenant_id).await?;

    info!(challenge_id = %id, %tenant_id, "challenge deleted");
    ok(challenge)
}

pub async fn add_participants(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<AddParticipants>,
) -> ApiResult<Challenge> {
    require(&caller, roles::is_member_role(caller.identity.role()), "join challenges")?;
    let tenant_id = caller.tenant_id()?;

    let mut users: Vec<&str> = input
        .external_user_ids
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect();
    users.sort_unstable();
    users.dedup();
    if users.is_empty() {
        return Err(ApiError::BadRequest("external_user_ids must not be empty".into()));
    }

    let _roster = state.roster_lock.lock().await;

    let mut challenge = state
        .challenges
        .get(&caller.identity, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("challenge {id}")))?;

    // Users already on the roster are not added or counted again
    let joined: HashSet<String> = state
        .participants
        .list(&caller.identity)
        .await?
        .into_iter()
        .filter(|p| p.challenge_id == challenge.challenge_id)
        .map(|p| p.external_user_id)
        .collect();
    users.retain(|u| !joined.contains(*u));
    if users.is_empty() {
        return ok(challenge);
    }

    let added = users.len() as u64;
    let total = challenge.participant_count + added;
    if total > challenge.max_participants {
        return Err(AccessError::quota(format!(
            "This challenge is limited to {} participants.",
            challenge.max_participants
        ))
        .into());
    }
    state
        .entitlements
        .check_can_add_participants(tenant_id, i64::try_from(total).unwrap_or(i64::MAX))
        .await?
        .into_result()?;

    for user in users {
        state
            .participants
            .insert(&caller.identity, Participant::new(&challenge, user))
            .await?;
    }
    challenge.participant_count = total;
    let challenge = state.challenges.update(&caller.identity, challenge).await?;
    state.entitlements.record_participants(tenant_id, added).await?;

    ok(challenge)
}

// Entitlements
pub async fn redeem_promo(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<RedeemPromo>,
) -> ApiResult<PromoRedemption> {
    let tenant_id = caller.tenant_id()?;
    let redeemer = Redeemer {
        tenant_id,
        user_id: caller.identity.internal_user_id(),
    };
    ok(state.promo.redeem(&input.code, redeemer).await?)
}

pub async fn admin_usage(State(state): State<AppState>, caller: Caller) -> ApiResult<UsageReport> {
    require(&caller, caller.identity.capabilities().can_view_admin, "view usage")?;
    let tenant_id = caller.tenant_id()?;
    ok(state.entitlements.usage_report(tenant_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalConfig;
    use crate::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use rally_tenant::context::{encode_platform_token, PlatformClaims};
    use rally_tenant::{InMemoryTenantStore, SubscriptionTier};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn app() -> (Router, AppState) {
        let mut config = PortalConfig::default();
        config.identity.token_secret = SECRET.into();
        let state = AppState::new(Arc::new(InMemoryTenantStore::new()), &config).unwrap();
        (router(state.clone()), state)
    }

    fn token(user: &str, company: Option<&str>, level: &str) -> String {
        let claims = PlatformClaims {
            sub: user.into(),
            company_id: company.map(Into::into),
            access_level: Some(level.into()),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode_platform_token(&claims, SECRET).unwrap()
    }

    fn admin(company: &str) -> String {
        token(&format!("owner_{company}"), Some(company), "admin")
    }

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("x-platform-user-token", token);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_access_verdicts() {
        let (app, _) = app();

        let (status, body) = send(&app, "GET", "/api/access", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["userType"], "guest");
        assert_eq!(body["data"]["canViewDiscover"], true);

        let (_, body) = send(&app, "GET", "/api/access", Some(&admin("biz_1")), None).await;
        assert_eq!(body["data"]["userType"], "admin");
        assert_eq!(body["data"]["canCreateChallenges"], true);
        assert_eq!(body["data"]["companyId"], "biz_1");

        let forged = encode_platform_token(
            &PlatformClaims {
                sub: "mallory".into(),
                company_id: Some("biz_1".into()),
                access_level: Some("admin".into()),
                exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            },
            "wrong-secret",
        )
        .unwrap();
        let (_, body) = send(&app, "GET", "/api/access", Some(&forged), None).await;
        assert_eq!(body["data"]["userType"], "guest");
    }

    #[tokio::test]
    async fn test_token_in_query_param() {
        let (app, _) = app();
        let uri = format!("/api/access?platform_token={}", admin("biz_q"));
        let (_, body) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(body["data"]["userType"], "admin");
    }

    #[tokio::test]
    async fn test_basic_tier_challenge_quota() {
        let (app, _) = app();
        let owner = admin("biz_1");

        let (status, _) = send(&app, "POST", "/api/challenges", Some(&owner), Some(json!({"title": "Steps"}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, "POST", "/api/challenges", Some(&owner), Some(json!({"title": "Again"}))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
    }

    #[tokio::test]
    async fn test_create_requires_creator() {
        let (app, _) = app();
        let member = token("member_1", Some("biz_1"), "customer");

        let (status, _) = send(&app, "POST", "/api/challenges", Some(&member), Some(json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, "POST", "/api/challenges", None, Some(json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_challenges_isolated_by_tenant() {
        let (app, _) = app();
        send(&app, "POST", "/api/challenges", Some(&admin("biz_1")), Some(json!({"title": "one"}))).await;
        send(&app, "POST", "/api/challenges", Some(&admin("biz_2")), Some(json!({"title": "two"}))).await;

        let (_, body) = send(&app, "GET", "/api/challenges", Some(&admin("biz_2")), None).await;
        let listed = body["data"].as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["title"], "two");

        // Discover feed for guests spans tenants
        let (_, body) = send(&app, "GET", "/api/challenges", None, None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_releases_slot() {
        let (app, _) = app();
        let owner = admin("biz_1");

        let (_, body) = send(&app, "POST", "/api/challenges", Some(&owner), Some(json!({"title": "first"}))).await;
        let id = body["data"]["challenge_id"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "DELETE", &format!("/api/challenges/{id}"), Some(&admin("biz_2")), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, "DELETE", &format!("/api/challenges/{id}"), Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "POST", "/api/challenges", Some(&owner), Some(json!({"title": "second"}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_participant_caps() {
        let (app, _) = app();
        let owner = admin("biz_1");

        let (status, _) = send(
            &app,
            "POST",
            "/api/challenges",
            Some(&owner),
            Some(json!({"title": "too big", "max_participants": 26})),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let (_, body) = send(
            &app,
            "POST",
            "/api/challenges",
            Some(&owner),
            Some(json!({"title": "walk", "max_participants": 2})),
        )
        .await;
        let id = body["data"]["challenge_id"].as_str().unwrap().to_string();
        let uri = format!("/api/challenges/{id}/participants");

        let (status, body) = send(&app, "POST", &uri, Some(&owner), Some(json!({"external_user_ids": ["a", "b"]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["participant_count"], 2);

        let (status, _) = send(&app, "POST", &uri, Some(&owner), Some(json!({"external_user_ids": ["c"]}))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_participant_added_once() {
        let (app, _) = app();
        let owner = admin("biz_1");
        let (_, body) = send(
            &app,
            "POST",
            "/api/challenges",
            Some(&owner),
            Some(json!({"title": "walk", "max_participants": 2})),
        )
        .await;
        let id = body["data"]["challenge_id"].as_str().unwrap().to_string();
        let uri = format!("/api/challenges/{id}/participants");

        let (_, body) = send(&app, "POST", &uri, Some(&owner), Some(json!({"external_user_ids": ["a"]}))).await;
        assert_eq!(body["data"]["participant_count"], 1);

        let (status, body) = send(&app, "POST", &uri, Some(&owner), Some(json!({"external_user_ids": ["a"]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["participant_count"], 1);

        // A repeat does not use up the remaining seat
        let (status, body) = send(&app, "POST", &uri, Some(&owner), Some(json!({"external_user_ids": ["a", "b"]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["participant_count"], 2);

        let (_, body) = send(&app, "GET", "/api/admin/usage", Some(&owner), None).await;
        assert_eq!(body["data"]["usage"]["participants"], 2);
    }

    #[tokio::test]
    async fn test_no_access_caller_cannot_redeem() {
        let (app, state) = app();
        state.promo.issue("WELCOME", SubscriptionTier::Professional).await.unwrap();

        let outsider = token("outsider", Some("biz_1"), "no_access");
        let (status, _) = send(&app, "POST", "/api/promo/redeem", Some(&outsider), Some(json!({"code": "WELCOME"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.directory.find(Some("biz_1")).await.unwrap().is_none());

        let (status, _) = send(&app, "POST", "/api/promo/redeem", Some(&admin("biz_1")), Some(json!({"code": "WELCOME"}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_promo_redemption() {
        let (app, state) = app();
        state.promo.issue("WELCOME", SubscriptionTier::Professional).await.unwrap();
        let owner = admin("biz_1");

        let (status, body) = send(&app, "POST", "/api/promo/redeem", Some(&owner), Some(json!({"code": "welcome"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tier"], "professional");

        let (status, body) = send(&app, "POST", "/api/promo/redeem", Some(&owner), Some(json!({"code": "WELCOME"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_PROMO_CODE");

        // Professional lifts the Basic challenge cap
        for title in ["a", "b"] {
            let (status, _) = send(&app, "POST", "/api/challenges", Some(&owner), Some(json!({"title": title}))).await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    #[tokio::test]
    async fn test_admin_usage_requires_admin() {
        let (app, _) = app();
        let member = token("member_1", Some("biz_1"), "customer");

        let (status, _) = send(&app, "GET", "/api/admin/usage", Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, "GET", "/api/admin/usage", Some(&admin("biz_1")), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tier"], "basic");
        assert_eq!(body["data"]["usage"]["active_challenges"], 0);
    }
}
