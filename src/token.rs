//! Token Issuer: JWT minting and verification for every scope the Step-Up
//! Orchestrator can hand out (spec §3, §6).
//!
//! All tokens are HS256 JWTs sharing one claim shape. The `scope` claim is
//! what separates an `access` token from a `refresh` or `onboarding` one —
//! there is deliberately no per-scope struct, mirroring the reference
//! implementation's single `create_magic_link_token` primitive that every
//! other minting function wraps.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{RiskError, RiskResult};
use crate::profile::{Role, UserId};

/// Token scope. Determines which endpoints will accept the bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Access,
    Refresh,
    Onboarding,
    Magic,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Access => "access",
            Scope::Refresh => "refresh",
            Scope::Onboarding => "onboarding",
            Scope::Magic => "magic",
        }
    }
}

/// JWT claim set shared by every token scope this crate issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub role: Role,
    pub scope: String,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_signature: Option<String>,
}

fn mint(config: &Config, claims: &Claims) -> RiskResult<String> {
    encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(config.jwt_secret.as_bytes()))
        .map_err(|e| RiskError::Config(format!("failed to encode token: {e}")))
}

fn base_claims(user_id: &UserId, email: &str, role: Role, scope: Scope, ttl_seconds: i64, behavior_signature: Option<String>) -> Claims {
    Claims {
        sub: user_id.clone(),
        email: email.to_string(),
        role,
        scope: scope.as_str().to_string(),
        exp: (Utc::now() + Duration::seconds(ttl_seconds)).timestamp(),
        behavior_signature,
    }
}

/// Mint a short-lived access token (15 min default), optionally binding a
/// behaviour signature so the Session Guardian can detect a client swap.
pub fn mint_access_token(
    config: &Config,
    user_id: &UserId,
    email: &str,
    role: Role,
    behavior_signature: Option<String>,
) -> RiskResult<String> {
    let claims = base_claims(user_id, email, role, Scope::Access, config.access_token_ttl_seconds, behavior_signature);
    mint(config, &claims)
}

/// Mint a refresh token (7 days default).
pub fn mint_refresh_token(config: &Config, user_id: &UserId, email: &str, role: Role) -> RiskResult<String> {
    let claims = base_claims(user_id, email, role, Scope::Refresh, config.refresh_token_ttl_seconds, None);
    mint(config, &claims)
}

/// Mint an onboarding token (<=15 min), used to gate the post-registration
/// behavioural-profile bootstrap flow.
pub fn mint_onboarding_token(config: &Config, user_id: &UserId, email: &str, role: Role) -> RiskResult<String> {
    let claims = base_claims(user_id, email, role, Scope::Onboarding, config.onboarding_token_ttl_seconds, None);
    mint(config, &claims)
}

/// Mint a one-shot magic-link token with a caller-chosen TTL.
pub fn mint_magic_token(config: &Config, user_id: &UserId, email: &str, role: Role, ttl_seconds: i64) -> RiskResult<String> {
    let claims = base_claims(user_id, email, role, Scope::Magic, ttl_seconds, None);
    mint(config, &claims)
}

/// Decode and validate a token's signature and expiry, without checking scope.
pub fn verify_token(config: &Config, token: &str) -> RiskResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(config.jwt_secret.as_bytes()), &validation).map_err(|e| {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => RiskError::TokenExpired,
            _ => RiskError::TokenInvalid(e.to_string()),
        }
    })?;
    Ok(data.claims)
}

/// Decode a token and assert it carries the expected scope.
pub fn verify_scoped(config: &Config, token: &str, expected: Scope) -> RiskResult<Claims> {
    let claims = verify_token(config, token)?;
    if claims.scope != expected.as_str() {
        return Err(RiskError::TokenScopeMismatch {
            expected: expected.as_str().to_string(),
            found: claims.scope,
        });
    }
    Ok(claims)
}

/// Mint a fresh access token from a verified refresh token, carrying the
/// subject's identity forward but dropping the refresh scope and expiry.
pub fn refresh_access_token(config: &Config, refresh_token: &str) -> RiskResult<String> {
    let claims = verify_scoped(config, refresh_token, Scope::Refresh)?;
    mint_access_token(config, &claims.sub, &claims.email, claims.role, None)
}
