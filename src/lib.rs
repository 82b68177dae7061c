//! RiskGuard: adaptive authentication and continuous risk-scoring for a
//! consumer financial app.
//!
//! Fuses device, geolocation, and behavioural-biometric signals into a
//! bounded risk score at login and throughout a session, learns each user's
//! baseline behaviour over time, and drives a step-up authentication state
//! machine from the resulting risk level.
//!
//! # Architecture
//! ```text
//! Login ──► Risk Engine ──► low/medium/high
//!              │                 │
//!              ▼                 ▼
//!      Baseline Learner   Step-Up Orchestrator
//!      Known-Network         │        │
//!      Lifecycle          Allow    Challenge/Block
//!                            │
//!                            ▼
//!                    Session Guardian (continuous re-scoring)
//! ```

pub mod audit;
pub mod baseline;
pub mod config;
pub mod error;
pub mod network;
pub mod profile;
pub mod risk;
pub mod session;
pub mod signal;
pub mod signature;
pub mod stepup;
pub mod store;
pub mod token;

pub use audit::{StepUpLog, StepUpMethod, StepUpOutcome};
pub use config::Config;
pub use error::{RiskError, RiskResult};
pub use profile::{Profile, Role, UserId};
pub use risk::{Challenge, LoginMetrics, RiskLevel, ScoreResult, SessionTelemetry};
pub use session::{IngestResult, SessionGate};
pub use stepup::{Decision, StepUpOrchestrator};
pub use store::{AlertEvent, InMemoryAlertSink, InMemoryGeoStore, InMemoryProfileStore, InMemorySessionStore};

use std::net::IpAddr;

use crate::baseline::ChallengeSample;
use crate::network::CounterStore;
use crate::profile::{DeviceFingerprint, Geo, IpGeo};
use crate::store::ProfileStore;

/// Facade that wires C1-C8 together over the crate's in-memory reference
/// stores. Production deployments substitute their own `ProfileStore`,
/// `SessionStore`, `GeoStore`, and `AlertSink` by calling the free functions
/// in [`stepup`] and [`session`] directly instead of going through this type.
pub struct RiskGuard {
    config: Config,
    profiles: InMemoryProfileStore,
    sessions: InMemorySessionStore,
    counters: CounterStore,
    geo: InMemoryGeoStore,
    alerts: InMemoryAlertSink,
    log: StepUpLog,
    orchestrator: StepUpOrchestrator,
}

impl RiskGuard {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            profiles: InMemoryProfileStore::new(),
            sessions: InMemorySessionStore::new(),
            counters: CounterStore::new(),
            geo: InMemoryGeoStore::new(),
            alerts: InMemoryAlertSink::new(),
            log: StepUpLog::new(),
            orchestrator: StepUpOrchestrator::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn alerts(&self) -> &InMemoryAlertSink {
        &self.alerts
    }

    pub fn step_up_log(&self) -> &StepUpLog {
        &self.log
    }

    pub fn geo_store(&self) -> &InMemoryGeoStore {
        &self.geo
    }

    /// `Login(low|medium|high)` (§4.5).
    #[tracing::instrument(skip(self, challenge, metrics))]
    pub async fn login(
        &self,
        user_id: &UserId,
        email: &str,
        role: Role,
        challenge: Option<&Challenge>,
        metrics: Option<&LoginMetrics>,
    ) -> RiskResult<Decision> {
        stepup::login(&self.profiles, &self.counters, &self.alerts, &self.config, user_id, email, role, challenge, metrics).await
    }

    /// Issue a pending step-up challenge for a `Challenge` decision.
    pub fn create_challenge(&self, user_id: &UserId, method: StepUpMethod) -> stepup::StepUpChallenge {
        self.orchestrator.create_challenge(user_id, method)
    }

    /// `Step-Up(...)` (§4.5).
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, challenge_sample, device, geo, ip_geo))]
    pub async fn verify_step_up(
        &self,
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
        stepup::verify_step_up(
            &self.orchestrator,
            &self.log,
            &self.profiles,
            &self.counters,
            &self.alerts,
            &self.config,
            challenge_id,
            verified,
            residual_score,
            email,
            role,
            challenge_sample,
            device,
            geo,
            ip,
            ip_geo,
        )
        .await
    }

    /// `Register`: mint a one-shot magic-link token for a newly created principal (§4.5).
    pub fn register(&self, user_id: &UserId, email: &str, role: Role) -> RiskResult<String> {
        stepup::register(&self.config, user_id, email, role)
    }

    /// `Verify`: mint a scoped onboarding token (§4.5).
    pub fn verify_email(&self, user_id: &UserId, email: &str, role: Role) -> RiskResult<String> {
        stepup::verify_email(&self.config, user_id, email, role)
    }

    /// `Onboarding`: store the initial profile document, idempotently.
    pub async fn complete_onboarding(&self, user_id: &UserId, device: Option<DeviceFingerprint>, geo: Option<Geo>) -> RiskResult<()> {
        let mut profile = self.profiles.get(user_id).await?.unwrap_or_else(|| Profile::new(user_id.clone()));
        if let Some(device) = device {
            profile.device_fingerprint = Some(device);
        }
        if let Some(geo) = geo.filter(|g| !g.fallback) {
            profile.geo = Some(geo);
        }
        self.profiles.upsert(profile).await
    }

    /// C6 ingress point: low-cadence session telemetry re-scoring (§4.3).
    #[tracing::instrument(skip(self, telemetry))]
    pub async fn ingest_telemetry(
        &self,
        session_id: &str,
        user_id: &UserId,
        telemetry: &SessionTelemetry,
        token_behavior_signature: Option<&str>,
    ) -> RiskResult<IngestResult> {
        session::ingest_telemetry(&self.profiles, &self.sessions, session_id, user_id, telemetry, token_behavior_signature).await
    }

    /// C6 ingress point: read current session state (§4.3).
    pub async fn session_status(&self, session_id: &str) -> RiskResult<Option<store::SessionState>> {
        session::session_status(&self.sessions, session_id).await
    }

    /// Middleware-facing gate for a protected route, given the client-supplied session id.
    pub async fn session_gate(&self, session_id: &str) -> RiskResult<SessionGate> {
        let state = self.session_status(session_id).await?;
        Ok(session::gate_for_state(state.as_ref()))
    }

    /// Periodic housekeeping: sweep expired session rows and demote stale
    /// known networks. Exposed for a caller's own `tokio::spawn` loop; this
    /// crate does not start a scheduler itself (§5).
    pub async fn run_housekeeping(&self, user_id: &UserId) -> RiskResult<()> {
        self.sessions.sweep_expired(chrono::Utc::now());
        if let Some(mut profile) = self.profiles.get(user_id).await? {
            network::demote_stale(&mut profile, &self.counters, &self.config, chrono::Utc::now());
            self.profiles.upsert(profile).await?;
        }
        Ok(())
    }
}
