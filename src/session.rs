//! Session Guardian (C6): low-cadence in-session re-scoring that mutates
//! shared session state and gates subsequent requests (spec §4.3).

use chrono::{DateTime, Utc};

use crate::error::RiskResult;
use crate::profile::{Profile, UserId};
use crate::risk::{score_session, RiskLevel, SessionTelemetry};
use crate::signal::resolve_client_ip;
use crate::signature::validate_signature;
use crate::store::{ProfileStore, SessionState, SessionStore};

const SESSION_TTL_SECONDS: i64 = 3600;
const SIGNATURE_MISMATCH_SCORE: i64 = 50;

/// What a protected route's middleware should do once it reads session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionGate {
    Allow,
    StepUp,
    Block,
}

/// Outcome of one telemetry ingest.
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub level: RiskLevel,
    pub risk_score: i64,
}

/// Derive the middleware-facing gate from a session state row. Absent state
/// is treated as `low` (§4.3): a session that has expired or was never
/// observed at elevated risk does not block the request.
pub fn gate_for_state(state: Option<&SessionState>) -> SessionGate {
    match state.map(|s| s.risk_level) {
        Some(RiskLevel::High) => SessionGate::Block,
        Some(RiskLevel::Medium) => SessionGate::StepUp,
        _ => SessionGate::Allow,
    }
}

/// Process one telemetry sample for `session_id`/`user_id` and persist the
/// resulting session state with a refreshed TTL.
///
/// If `token_behavior_signature` is present, it is compared against the
/// signature derived from the telemetry's device/IP; a mismatch short-circuits
/// scoring and forces the session to `{medium, 50}` for the remainder of the TTL.
pub async fn ingest_telemetry<P: ProfileStore, S: SessionStore>(
    profiles: &P,
    sessions: &S,
    session_id: &str,
    user_id: &UserId,
    telemetry: &SessionTelemetry,
    token_behavior_signature: Option<&str>,
) -> RiskResult<IngestResult> {
    let profile = profiles.get(user_id).await?;

    if let Some(expected) = token_behavior_signature {
        let device = telemetry.device.clone().unwrap_or_default();
        if !validate_signature(Some(expected), &device, telemetry.ip) {
            let state = SessionState {
                user_id: user_id.clone(),
                risk_level: RiskLevel::Medium,
                risk_score: SIGNATURE_MISMATCH_SCORE,
                updated_at: Utc::now(),
                reason: Some("behavior_signature_mismatch".to_string()),
            };
            sessions.hset(session_id, state, SESSION_TTL_SECONDS).await?;
            return Ok(IngestResult { level: RiskLevel::Medium, risk_score: SIGNATURE_MISMATCH_SCORE });
        }
    }

    let result = score_session(telemetry, profile.as_ref(), &crate::config::Config::default());

    let state = SessionState {
        user_id: user_id.clone(),
        risk_level: result.level,
        risk_score: result.risk_score,
        updated_at: Utc::now(),
        reason: result.reasons.first().cloned(),
    };
    sessions.hset(session_id, state, SESSION_TTL_SECONDS).await?;

    Ok(IngestResult { level: result.level, risk_score: result.risk_score })
}

/// Read current session state without mutating it.
pub async fn session_status<S: SessionStore>(sessions: &S, session_id: &str) -> RiskResult<Option<SessionState>> {
    sessions.hgetall(session_id).await
}

/// Resolve the client IP a caller should attribute to a telemetry ingest,
/// per the precedence order in §6.
pub fn resolve_ingest_ip(
    metrics_ip: Option<&str>,
    cf_connecting_ip: Option<&str>,
    x_forwarded_for: Option<&str>,
    x_real_ip: Option<&str>,
    peer: Option<std::net::IpAddr>,
) -> Option<std::net::IpAddr> {
    resolve_client_ip(metrics_ip, cf_connecting_ip, x_forwarded_for, x_real_ip, peer)
}

/// A thin, append-only window of recent session-telemetry results the drift
/// scanner inspects. The real collaborator is whatever store records
/// `ingest_telemetry`'s audit trail (§4.3 step 5); this crate only needs the
/// per-session score history to decide drift.
pub trait RecentScoreHistory {
    fn recent_scores(&self, session_id: &str, limit: usize) -> Vec<i64>;
}

/// Inspect the most recent scores for `session_id`; if the last three are
/// non-decreasing, flag `profile.drift_flagged = true` (§4.3).
///
/// Returns whether the flag was newly set this call.
pub fn scan_for_drift<H: RecentScoreHistory>(history: &H, session_id: &str, profile: &mut Profile) -> bool {
    let scores = history.recent_scores(session_id, 3);
    if scores.len() < 3 {
        return false;
    }
    let non_decreasing = scores.windows(2).all(|w| w[1] >= w[0]);
    if non_decreasing && !profile.drift_flagged {
        profile.drift_flagged = true;
        return true;
    }
    false
}
