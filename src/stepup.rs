//! Step-Up Orchestrator (C5): the state machine linking login, challenge,
//! and learning (spec §4.5). Every risk-based outcome is a `Decision` value,
//! never an exception — HTTP status mapping belongs to the edge, not here.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::audit::{StepUpLog, StepUpMethod, StepUpOutcome};
use crate::baseline::{learn_from_login, ChallengeSample};
use crate::config::Config;
use crate::error::{RiskError, RiskResult};
use crate::network::{record_and_promote, CounterStore};
use crate::profile::{DeviceFingerprint, Geo, IpGeo, Profile, Role, UserId};
use crate::risk::{score_login, Challenge, LoginMetrics, RiskLevel};
use crate::signature::compute_signature;
use crate::store::{AlertEvent, AlertSink, ProfileStore};
use crate::token::{mint_access_token, mint_magic_token, mint_onboarding_token, mint_refresh_token};

const CHALLENGE_TTL_MINUTES: i64 = 5;
const MAX_CHALLENGE_ATTEMPTS: u32 = 3;
/// Learning gate for behavioural step-up: only a residual score at or below
/// this threshold is trusted enough to feed the baseline learner (§4.2).
const BEHAVIORAL_LEARNING_GATE: i64 = 10;

/// The decision contract every transition in the state machine produces.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow { access_token: String, refresh_token: Option<String> },
    Challenge { methods: Vec<StepUpMethod>, reasons: Vec<String> },
    Block { reasons: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Failed,
    Expired,
}

/// A pending step-up challenge, issued on a `medium`-risk login (§4.5).
#[derive(Debug, Clone)]
pub struct StepUpChallenge {
    pub id: String,
    pub user_id: UserId,
    pub method: StepUpMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: ChallengeStatus,
}

/// Methods offered to a `medium`-risk login. Magic-link is deliberately
/// absent here: it is only ever user-initiated from the login form itself,
/// not offered as one of several equally-weighted step-up options.
const MEDIUM_RISK_METHODS: [StepUpMethod; 4] =
    [StepUpMethod::Behavioral, StepUpMethod::TrustedDevice, StepUpMethod::Webauthn, StepUpMethod::Context];

/// Holds in-flight step-up challenges. Analogous to a production Redis-backed
/// challenge table, but in-memory here since challenges are short-lived and
/// this crate ships no network-facing store.
#[derive(Debug, Default)]
pub struct StepUpOrchestrator {
    challenges: DashMap<String, StepUpChallenge>,
}

impl StepUpOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new pending challenge for a `medium`-risk login.
    pub fn create_challenge(&self, user_id: &UserId, method: StepUpMethod) -> StepUpChallenge {
        let now = Utc::now();
        let challenge = StepUpChallenge {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            method,
            created_at: now,
            expires_at: now + Duration::minutes(CHALLENGE_TTL_MINUTES),
            attempts: 0,
            status: ChallengeStatus::Pending,
        };
        self.challenges.insert(challenge.id.clone(), challenge.clone());
        challenge
    }

    fn take_pending(&self, challenge_id: &str) -> RiskResult<StepUpChallenge> {
        let mut entry = self
            .challenges
            .get_mut(challenge_id)
            .ok_or_else(|| RiskError::ChallengeNotFound(challenge_id.to_string()))?;

        if Utc::now() > entry.expires_at {
            entry.status = ChallengeStatus::Expired;
            return Err(RiskError::ChallengeExpired(challenge_id.to_string()));
        }
        if entry.status != ChallengeStatus::Pending {
            return Err(RiskError::ChallengeAlreadyUsed(challenge_id.to_string()));
        }
        entry.attempts += 1;
        if entry.attempts > MAX_CHALLENGE_ATTEMPTS {
            entry.status = ChallengeStatus::Failed;
            return Err(RiskError::ChallengeAlreadyUsed(challenge_id.to_string()));
        }
        Ok(entry.clone())
    }
}

/// Mint the token pair for an `Allow` decision and bind a fresh behaviour
/// signature to the access token.
fn mint_allow(
    config: &Config,
    user_id: &UserId,
    email: &str,
    role: Role,
    device: Option<&DeviceFingerprint>,
    ip: Option<IpAddr>,
    issue_refresh: bool,
) -> RiskResult<Decision> {
    let signature = device.map(|d| compute_signature(d, ip));
    let access_token = mint_access_token(config, user_id, email, role, signature)?;
    let refresh_token = if issue_refresh { Some(mint_refresh_token(config, user_id, email, role)?) } else { None };
    Ok(Decision::Allow { access_token, refresh_token })
}

/// Perform the post-login side effects of a `low`-risk outcome: baseline
/// learning, known-network promotion, and the `successful_login` alert.
async fn apply_low_risk_side_effects<P: ProfileStore, A: AlertSink>(
    profiles: &P,
    counters: &CounterStore,
    alerts: &A,
    config: &Config,
    mut profile: Profile,
    challenge_sample: Option<&ChallengeSample>,
    device: Option<&DeviceFingerprint>,
    geo: Option<&Geo>,
    ip: Option<IpAddr>,
    ip_geo: Option<&IpGeo>,
) {
    learn_from_login(&mut profile, challenge_sample, device, geo, ip, ip_geo);
    if let Some(ip) = ip {
        record_and_promote(&mut profile, counters, config, ip, Utc::now());
    }
    if let Err(e) = profiles.upsert(profile.clone()).await {
        tracing::warn!(user_id = %profile.user_id, error = %e, "failed to persist baseline update");
    }
    alerts.emit(AlertEvent::SuccessfulLogin, &profile.user_id, "login accepted at low risk".to_string()).await;
}

fn challenge_sample_from(challenge: Option<&Challenge>) -> Option<ChallengeSample> {
    challenge.map(|c| match c {
        Challenge::Typing { wpm, error_rate, keystroke_timings } => {
            ChallengeSample::Typing { wpm: *wpm, error_rate: *error_rate, keystroke_timings: keystroke_timings.clone() }
        }
        Challenge::Pointer { path, clicks } => ChallengeSample::Pointer { path_len: path.len(), clicks: *clicks },
    })
}

/// Score and act on a login attempt (`Login(low|medium|high)` transitions, §4.5).
///
/// On `low`, mints an access token (with embedded behaviour signature) and a
/// refresh token, and runs the learner and known-network promotion. On
/// `medium`, returns the acceptable step-up methods without minting anything.
/// On `high`, emits a `high_risk_login` alert and blocks.
pub async fn login<P: ProfileStore, A: AlertSink>(
    profiles: &P,
    counters: &CounterStore,
    alerts: &A,
    config: &Config,
    user_id: &UserId,
    email: &str,
    role: Role,
    challenge: Option<&Challenge>,
    metrics: Option<&LoginMetrics>,
) -> RiskResult<Decision> {
    let profile = profiles.get(user_id).await?;
    let result = score_login(challenge, metrics, profile.as_ref(), config);

    let device = metrics.and_then(|m| m.device.as_ref());
    let geo = metrics.and_then(|m| m.geo.as_ref());
    let ip = metrics.and_then(|m| m.ip);
    let ip_geo = metrics.map(|m| IpGeo {
        city: m.ip_city.clone(),
        region: m.ip_region.clone(),
        country: m.ip_country.clone(),
    });

    match result.level {
        RiskLevel::Low => {
            let current_profile = profile.unwrap_or_else(|| Profile::new(user_id.clone()));
            let decision = mint_allow(config, user_id, email, role, device, ip, true)?;
            let sample = challenge_sample_from(challenge);
            apply_low_risk_side_effects(profiles, counters, alerts, config, current_profile, sample.as_ref(), device, geo, ip, ip_geo.as_ref())
                .await;
            Ok(decision)
        }
        RiskLevel::Medium => {
            alerts.emit(AlertEvent::MediumRiskLogin, user_id, result.reasons.join("; ")).await;
            Ok(Decision::Challenge { methods: MEDIUM_RISK_METHODS.to_vec(), reasons: result.reasons })
        }
        RiskLevel::High => {
            alerts.emit(AlertEvent::HighRiskLogin, user_id, result.reasons.join("; ")).await;
            Ok(Decision::Block { reasons: result.reasons })
        }
    }
}

/// Verify a pending step-up challenge (`Step-Up(...)` transitions, §4.5).
///
/// `verified` is the caller's outcome from actually checking the method
/// (behavioural re-score, WebAuthn assertion, trusted-device cookie, etc.) —
/// this orchestrator owns challenge bookkeeping and the resulting `Decision`,
/// not the method-specific verification logic itself.
#[allow(clippy::too_many_arguments)]
pub async fn verify_step_up<P: ProfileStore, A: AlertSink>(
    orchestrator: &StepUpOrchestrator,
    log: &StepUpLog,
    profiles: &P,
    counters: &CounterStore,
    alerts: &A,
    config: &Config,
    challenge_id: &str,
    verified: bool,
    residual_score: Option<i64>,
    email: &str,
    role: Role,
    challenge_sample: Option<&ChallengeSample>,
    device: Option<&DeviceFingerprint>,
    geo: Option<&Geo>,
    ip: Option<IpAddr>,
    ip_geo: Option<&IpGeo>,
) -> RiskResult<Decision> {
    let record = orchestrator.take_pending(challenge_id)?;

    if !verified {
        log.record(&record.user_id, record.method, StepUpOutcome::Failure, vec![], Default::default());
        alerts.emit(AlertEvent::FailedAdditionalVerification, &record.user_id, format!("{:?} step-up failed", record.method)).await;
        // The challenge slot stays pending (minus this attempt) so the client
        // can retry; only exhausting max_attempts converts it into a hard error.
        return Ok(Decision::Challenge {
            methods: vec![record.method],
            reasons: vec!["step-up verification failed".to_string()],
        });
    }

    orchestrator.challenges.remove(challenge_id);
    log.record(&record.user_id, record.method, StepUpOutcome::Success, vec![], Default::default());

    let should_learn = match record.method {
        StepUpMethod::Behavioral => residual_score.map(|s| s <= BEHAVIORAL_LEARNING_GATE).unwrap_or(false),
        StepUpMethod::Context | StepUpMethod::Ambient => true,
        StepUpMethod::TrustedDevice | StepUpMethod::MagicLink | StepUpMethod::Webauthn => false,
    };

    if should_learn {
        let profile = profiles.get(&record.user_id).await?.unwrap_or_else(|| Profile::new(record.user_id.clone()));
        apply_low_risk_side_effects(profiles, counters, alerts, config, profile, challenge_sample, device, geo, ip, ip_geo).await;
    }

    mint_allow(config, &record.user_id, email, role, device, ip, true)
}

/// `Register`: mint a one-shot magic-link token for a newly created principal
/// (`Unauthenticated -> Registered`, §4.5). Duplicate-identifier idempotency —
/// returning a `conflict` with the existing user's verification/onboarding
/// flags instead of an error — is the caller's identity store's job: it has
/// already resolved the email/phone lookup before `register` is ever called,
/// so by the time this runs `user_id` is known to be new.
pub fn register(config: &Config, user_id: &UserId, email: &str, role: Role) -> RiskResult<String> {
    mint_magic_token(config, user_id, email, role, config.onboarding_token_ttl_seconds)
}

/// `Verify`: mint a scoped onboarding token, the only credential accepted by
/// baseline upsert endpoints until onboarding completes (§4.5).
pub fn verify_email(config: &Config, user_id: &UserId, email: &str, role: Role) -> RiskResult<String> {
    mint_onboarding_token(config, user_id, email, role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryAlertSink, InMemoryProfileStore};

    fn config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn low_risk_login_allows_and_mints_tokens() {
        let profiles = InMemoryProfileStore::new();
        let counters = CounterStore::new();
        let alerts = InMemoryAlertSink::new();
        let config = config();

        let mut profile = Profile::new("alice".to_string());
        profile.device_fingerprint = Some(DeviceFingerprint {
            browser: Some("Chrome 119".into()),
            os: Some("windows".into()),
            screen: Some("1920x1080".into()),
            timezone: Some("America/New_York".into()),
        });
        profile.geo = Some(Geo { latitude: Some(40.7128), longitude: Some(-74.006), accuracy: Some(20.0), fallback: false });
        profile.known_networks.insert("203.0.113.0/24".to_string());
        profile.baselines.typing.wpm.mean = Some(60.0);
        profile.baselines.typing.wpm.std = Some(5.0);
        profiles.upsert(profile.clone()).await.unwrap();

        let challenge = Challenge::Typing { wpm: 61.0, error_rate: 0.02, keystroke_timings: vec![] };
        let metrics = LoginMetrics {
            device: profile.device_fingerprint.clone(),
            geo: profile.geo.clone(),
            ip: Some("203.0.113.10".parse().unwrap()),
            ..Default::default()
        };

        let decision = login(&profiles, &counters, &alerts, &config, &"alice".to_string(), "alice@example.com", Role::User, Some(&challenge), Some(&metrics))
            .await
            .unwrap();

        match decision {
            Decision::Allow { refresh_token, .. } => assert!(refresh_token.is_some()),
            other => panic!("expected Allow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn high_risk_login_blocks_and_alerts() {
        let profiles = InMemoryProfileStore::new();
        let counters = CounterStore::new();
        let alerts = InMemoryAlertSink::new();
        let config = config();

        let decision = login(&profiles, &counters, &alerts, &config, &"mallory".to_string(), "mallory@example.com", Role::User, None, None)
            .await
            .unwrap();

        assert!(matches!(decision, Decision::Block { .. }));
        assert_eq!(alerts.drain().len(), 1);
    }

    #[tokio::test]
    async fn step_up_failure_does_not_consume_the_challenge_slot() {
        let profiles = InMemoryProfileStore::new();
        let counters = CounterStore::new();
        let alerts = InMemoryAlertSink::new();
        let log = StepUpLog::new();
        let config = config();
        let orchestrator = StepUpOrchestrator::new();

        let challenge = orchestrator.create_challenge(&"alice".to_string(), StepUpMethod::Behavioral);
        let decision = verify_step_up(
            &orchestrator, &log, &profiles, &counters, &alerts, &config,
            &challenge.id, false, None, "alice@example.com", Role::User, None, None, None, None, None,
        )
        .await
        .unwrap();
        assert!(matches!(decision, Decision::Challenge { .. }));
        assert_eq!(alerts.drain().len(), 1);
    }

    #[tokio::test]
    async fn step_up_success_mints_access_token() {
        let profiles = InMemoryProfileStore::new();
        let counters = CounterStore::new();
        let alerts = InMemoryAlertSink::new();
        let log = StepUpLog::new();
        let config = config();
        let orchestrator = StepUpOrchestrator::new();

        let challenge = orchestrator.create_challenge(&"alice".to_string(), StepUpMethod::Context);
        let decision = verify_step_up(
            &orchestrator, &log, &profiles, &counters, &alerts, &config,
            &challenge.id, true, None, "alice@example.com", Role::User, None, None, None, None, None,
        )
        .await
        .unwrap();
        assert!(matches!(decision, Decision::Allow { .. }));
    }

    #[test]
    fn register_mints_a_verifiable_magic_token() {
        let config = config();
        let token = register(&config, &"alice".to_string(), "alice@example.com", Role::User).unwrap();
        let claims = crate::token::verify_scoped(&config, &token, crate::token::Scope::Magic).unwrap();
        assert_eq!(claims.sub, "alice");
    }
}
