//! Identity Context Extraction
//!
//! Turns ambient request signals into a [`CallerContext`] without touching
//! storage. Sources are tried in order and the first match wins:
//!
//! 1. host platform signed token (HS256 JWT)
//! 2. development override cookie, only when enabled at startup
//! 3. anonymous

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::roles::HostAccessLevel;

/// Where a caller context came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextSourceKind {
    Platform,
    DevOverride,
    Anonymous,
}

/// Raw caller context, before any storage lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub external_user_id: Option<String>,
    pub external_company_id: Option<String>,
    pub access_level: Option<HostAccessLevel>,
    pub source: ContextSourceKind,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self {
            external_user_id: None,
            external_company_id: None,
            access_level: None,
            source: ContextSourceKind::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.source == ContextSourceKind::Anonymous
            || self.external_user_id.as_deref().map_or(true, str::is_empty)
    }
}

/// Cookies, headers and query parameters of one request
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl RequestSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Names are case-insensitive; a `cookie` header is also
    /// split into individual cookies.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name == "cookie" {
            self = self.with_cookie_header(value);
        }
        self.headers.insert(name, value.to_string());
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    /// Parse a raw `Cookie` header (`a=1; b=2`)
    pub fn with_cookie_header(mut self, raw: &str) -> Self {
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    self.cookies.insert(name.to_string(), value.trim().to_string());
                }
            }
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Extraction settings, fixed at process start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Header carrying the platform token
    pub token_header: String,
    /// Query parameter fallback for the platform token
    pub token_query_param: String,
    /// HS256 secret shared with the host platform
    pub token_secret: String,
    /// Clock skew tolerance for `exp`
    pub token_leeway_secs: u64,
    /// Accept the development override cookie
    pub dev_override_enabled: bool,
    pub dev_override_cookie: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            token_header: "x-platform-user-token".into(),
            token_query_param: "platform_token".into(),
            token_secret: String::new(),
            token_leeway_secs: 60,
            dev_override_enabled: false,
            dev_override_cookie: "dev_identity".into(),
        }
    }
}

/// Claims carried by the host platform token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformClaims {
    /// Host platform user ID
    pub sub: String,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub access_level: Option<String>,
    pub exp: usize,
}

/// Sign platform claims. Used by tooling and tests that stand in for the
/// host platform.
pub fn encode_platform_token(
    claims: &PlatformClaims,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// A single identity source
pub trait ContextSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this source has nothing usable for the request
    fn extract(&self, signals: &RequestSignals) -> Option<CallerContext>;
}

/// Verified host platform token
pub struct PlatformTokenSource {
    header: String,
    query_param: String,
    key: DecodingKey,
    validation: Validation,
}

impl PlatformTokenSource {
    pub fn new(config: &ExtractorConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.token_leeway_secs;
        Self {
            header: config.token_header.clone(),
            query_param: config.token_query_param.clone(),
            key: DecodingKey::from_secret(config.token_secret.as_bytes()),
            validation,
        }
    }

    fn verify(&self, token: &str) -> Option<PlatformClaims> {
        match decode::<PlatformClaims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "platform token rejected");
                None
            }
        }
    }
}

impl ContextSource for PlatformTokenSource {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn extract(&self, signals: &RequestSignals) -> Option<CallerContext> {
        let token = signals
            .header(&self.header)
            .or_else(|| signals.query_param(&self.query_param))
            .map(str::trim)
            .filter(|t| !t.is_empty())?;
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let claims = self.verify(token)?;
        if claims.sub.trim().is_empty() {
            debug!("platform token has empty subject");
            return None;
        }

        Some(CallerContext {
            external_user_id: Some(claims.sub),
            external_company_id: claims.company_id.filter(|c| !c.is_empty()),
            access_level: claims.access_level.as_deref().map(HostAccessLevel::parse),
            source: ContextSourceKind::Platform,
        })
    }
}

/// Development override cookie: `user_id[:company_id[:access_level]]`
pub struct DevOverrideSource {
    cookie: String,
}

impl DevOverrideSource {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self { cookie: cookie.into() }
    }
}

impl ContextSource for DevOverrideSource {
    fn name(&self) -> &'static str {
        "dev-override"
    }

    fn extract(&self, signals: &RequestSignals) -> Option<CallerContext> {
        let raw = signals.cookie(&self.cookie)?;
        let mut parts = raw.splitn(3, ':').map(str::trim);

        let user = parts.next().filter(|u| !u.is_empty())?;
        let company = parts.next().filter(|c| !c.is_empty());
        let access_level = parts.next().filter(|l| !l.is_empty()).map(HostAccessLevel::parse);

        Some(CallerContext {
            external_user_id: Some(user.to_string()),
            external_company_id: company.map(str::to_string),
            access_level,
            source: ContextSourceKind::DevOverride,
        })
    }
}

/// Ordered chain of identity sources
pub struct ContextExtractor {
    sources: Vec<Box<dyn ContextSource>>,
}

impl ContextExtractor {
    pub fn new(sources: Vec<Box<dyn ContextSource>>) -> Self {
        Self { sources }
    }

    /// Build the chain for this process. The dev override source is only
    /// part of the chain when enabled.
    /// Platform tokens are only verified against a non-empty secret
    pub fn from_config(config: &ExtractorConfig) -> Self {
        let mut sources: Vec<Box<dyn ContextSource>> = Vec::new();
        if !config.token_secret.is_empty() {
            sources.push(Box::new(PlatformTokenSource::new(config)));
        }
        if config.dev_override_enabled {
            sources.push(Box::new(DevOverrideSource::new(config.dev_override_cookie.clone())));
        }
        Self::new(sources)
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn extract(&self, signals: &RequestSignals) -> CallerContext {
        self.sources
            .iter()
            .find_map(|source| source.extract(signals))
            .unwrap_or_else(CallerContext::anonymous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn config(dev: bool) -> ExtractorConfig {
        ExtractorConfig {
            token_secret: SECRET.into(),
            dev_override_enabled: dev,
            ..Default::default()
        }
    }

    fn token(sub: &str, company: Option<&str>, level: Option<&str>, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as usize;
        encode_platform_token(
            &PlatformClaims {
                sub: sub.into(),
                company_id: company.map(Into::into),
                access_level: level.map(Into::into),
                exp,
            },
            SECRET,
        )
        .unwrap()
    }

    #[test]
    fn test_platform_token_wins() {
        let extractor = ContextExtractor::from_config(&config(true));
        let signals = RequestSignals::new()
            .with_header("X-Platform-User-Token", &token("user_1", Some("biz_1"), Some("admin"), 3600))
            .with_cookie("dev_identity", "user_dev:biz_dev:admin");

        let ctx = extractor.extract(&signals);
        assert_eq!(ctx.source, ContextSourceKind::Platform);
        assert_eq!(ctx.external_user_id.as_deref(), Some("user_1"));
        assert_eq!(ctx.external_company_id.as_deref(), Some("biz_1"));
        assert_eq!(ctx.access_level, Some(HostAccessLevel::Admin));
    }

    #[test]
    fn test_query_param_fallback() {
        let extractor = ContextExtractor::from_config(&config(false));
        let signals = RequestSignals::new()
            .with_query("platform_token", &token("user_2", None, Some("customer"), 3600));

        let ctx = extractor.extract(&signals);
        assert_eq!(ctx.source, ContextSourceKind::Platform);
        assert_eq!(ctx.access_level, Some(HostAccessLevel::Customer));
    }

    #[test]
    fn test_expired_token_is_anonymous() {
        let extractor = ContextExtractor::from_config(&config(false));
        let signals = RequestSignals::new()
            .with_header("x-platform-user-token", &token("user_1", Some("biz_1"), None, -3600));

        assert!(extractor.extract(&signals).is_anonymous());
    }

    #[test]
    fn test_malformed_token_falls_through_to_dev_override() {
        let extractor = ContextExtractor::from_config(&config(true));
        let signals = RequestSignals::new()
            .with_header("x-platform-user-token", "not-a-jwt")
            .with_header("cookie", "theme=dark; dev_identity=user_dev:biz_dev:customer");

        let ctx = extractor.extract(&signals);
        assert_eq!(ctx.source, ContextSourceKind::DevOverride);
        assert_eq!(ctx.external_user_id.as_deref(), Some("user_dev"));
        assert_eq!(ctx.external_company_id.as_deref(), Some("biz_dev"));
        assert_eq!(ctx.access_level, Some(HostAccessLevel::Customer));
    }

    #[test]
    fn test_dev_override_ignored_when_disabled() {
        let extractor = ContextExtractor::from_config(&config(false));
        assert_eq!(extractor.source_names(), vec!["platform"]);

        let signals = RequestSignals::new().with_cookie("dev_identity", "user_dev:biz_dev:admin");
        assert_eq!(extractor.extract(&signals), CallerContext::anonymous());
    }

    #[test]
    fn test_empty_secret_disables_platform_tokens() {
        let extractor = ContextExtractor::from_config(&ExtractorConfig {
            dev_override_enabled: true,
            ..Default::default()
        });
        assert_eq!(extractor.source_names(), vec!["dev-override"]);

        let forged = encode_platform_token(
            &PlatformClaims {
                sub: "user_1".into(),
                company_id: Some("biz_1".into()),
                access_level: Some("admin".into()),
                exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            },
            "",
        )
        .unwrap();
        let signals = RequestSignals::new().with_header("x-platform-user-token", &forged);
        assert_eq!(extractor.extract(&signals), CallerContext::anonymous());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let extractor = ContextExtractor::from_config(&ExtractorConfig {
            token_secret: "other".into(),
            ..Default::default()
        });
        let signals = RequestSignals::new()
            .with_header("x-platform-user-token", &token("user_1", None, None, 3600));

        assert!(extractor.extract(&signals).is_anonymous());
    }

    #[test]
    fn test_dev_cookie_user_only() {
        let source = DevOverrideSource::new("dev_identity");
        let ctx = source
            .extract(&RequestSignals::new().with_cookie("dev_identity", "user_dev"))
            .unwrap();
        assert_eq!(ctx.external_company_id, None);
        assert_eq!(ctx.access_level, None);

        assert!(source
            .extract(&RequestSignals::new().with_cookie("dev_identity", ":biz_1"))
            .is_none());
    }
}
