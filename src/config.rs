//! Policy Store (C8): environment-driven tunables, per spec §6.

use std::collections::HashSet;
use std::env;

use ipnetwork::IpNetwork;

/// Resolved, typed configuration. Missing environment variables fall back to
/// documented, secure-by-default values rather than failing startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub high_threshold: i64,
    pub medium_threshold: i64,
    pub denylist_prefixes: Vec<IpNetwork>,
    pub allowlist_prefixes: Vec<IpNetwork>,
    pub carrier_asns: HashSet<String>,
    pub known_network_promotion_threshold: u32,
    pub known_network_decay_days: i64,
    pub jwt_secret: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub onboarding_token_ttl_seconds: i64,
    pub environment: Environment,
}

/// Deployment environment, used to pick cookie policy (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Cookie `SameSite`/`Secure` policy for the access-token cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub same_site_none: bool,
    pub secure: bool,
}

impl Config {
    /// Load configuration from the process environment, logging a warning for
    /// anything that falls back to a default rather than failing.
    pub fn from_env() -> Self {
        let high_threshold = parse_env_i64("HIGH_THRESHOLD", 60);
        let medium_threshold = parse_env_i64("MEDIUM_THRESHOLD", 40);

        let denylist_prefixes = parse_prefix_list("DENYLIST_IP_PREFIXES");
        let allowlist_prefixes = parse_prefix_list("ALLOWLIST_IP_PREFIXES");

        let carrier_asns = env::var("CARRIER_ASN_LIST")
            .unwrap_or_else(|_| "AS55836,AS45609,AS55410,AS55824".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let known_network_promotion_threshold = parse_env_u32("KNOWN_NETWORK_PROMOTION_THRESHOLD", 3);
        let known_network_decay_days = parse_env_i64("KNOWN_NETWORK_DECAY_DAYS", 90);

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET not set; using development fallback secret");
            "fallback-secret-key-for-development-only".to_string()
        });
        if jwt_secret.len() < 32 {
            tracing::warn!("JWT_SECRET should be at least 32 characters long");
        }

        let access_token_ttl_seconds = parse_env_i64("ACCESS_TOKEN_TTL_SECONDS", 900);
        let refresh_token_ttl_seconds = parse_env_i64("REFRESH_TOKEN_TTL_SECONDS", 604_800);
        let onboarding_token_ttl_seconds = parse_env_i64("ONBOARDING_TOKEN_TTL_SECONDS", 900);

        let environment = match env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            Ok("staging") => Environment::Staging,
            _ => Environment::Development,
        };

        Self {
            high_threshold,
            medium_threshold,
            denylist_prefixes,
            allowlist_prefixes,
            carrier_asns,
            known_network_promotion_threshold,
            known_network_decay_days,
            jwt_secret,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            onboarding_token_ttl_seconds,
            environment,
        }
    }

    /// Whether `asn` (e.g. `"AS55836"` or a bare `"55836"`) is on the configured carrier list.
    pub fn is_carrier_asn(&self, asn: &str) -> bool {
        let normalized = normalize_asn(asn);
        self.carrier_asns.contains(&normalized)
    }

    pub fn cookie_policy(&self) -> CookiePolicy {
        match self.environment {
            Environment::Production => CookiePolicy { same_site_none: true, secure: true },
            _ => CookiePolicy { same_site_none: false, secure: false },
        }
    }
}

impl Default for Config {
    /// A config with documented defaults and no environment dependency, for tests.
    fn default() -> Self {
        Self {
            high_threshold: 60,
            medium_threshold: 40,
            denylist_prefixes: Vec::new(),
            allowlist_prefixes: Vec::new(),
            carrier_asns: ["AS55836", "AS45609", "AS55410", "AS55824"]
                .into_iter()
                .map(String::from)
                .collect(),
            known_network_promotion_threshold: 3,
            known_network_decay_days: 90,
            jwt_secret: "fallback-secret-key-for-development-only".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 604_800,
            onboarding_token_ttl_seconds: 900,
            environment: Environment::Development,
        }
    }
}

/// Normalise an ASN to the canonical `"AS<number>"` upper-case form (§4.1).
pub fn normalize_asn(asn: &str) -> String {
    let s = asn.trim().to_uppercase();
    if s.starts_with("AS") {
        s
    } else {
        format!("AS{s}")
    }
}

fn parse_env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_prefix_list(key: &str) -> Vec<IpNetwork> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<IpNetwork>().ok())
        .collect()
}
