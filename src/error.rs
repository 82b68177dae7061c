//! Error taxonomy for the risk and step-up pipeline.

use thiserror::Error;

/// Errors surfaced by stores and the step-up orchestrator.
///
/// The scoring functions in [`crate::risk`] are deliberately infallible and do not
/// produce this type — see the module docs there.
#[derive(Error, Debug)]
pub enum RiskError {
    /// No behaviour profile exists for this user.
    #[error("profile not found for user {0}")]
    ProfileNotFound(String),

    /// No session state exists for this session id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Token failed signature verification or was malformed.
    #[error("invalid token: {0}")]
    TokenInvalid(String),

    /// Token `exp` claim is in the past.
    #[error("token expired")]
    TokenExpired,

    /// Token scope does not match what the caller required.
    #[error("token scope {found} does not satisfy required scope {expected}")]
    TokenScopeMismatch { expected: String, found: String },

    /// Step-up challenge id unknown or already resolved.
    #[error("challenge not found: {0}")]
    ChallengeNotFound(String),

    /// Step-up challenge has passed its expiry window.
    #[error("challenge expired: {0}")]
    ChallengeExpired(String),

    /// Step-up challenge already consumed.
    #[error("challenge already used: {0}")]
    ChallengeAlreadyUsed(String),

    /// Magic-link token already consumed.
    #[error("magic link already used")]
    MagicLinkAlreadyUsed,

    /// A downstream store call did not complete within its deadline.
    #[error("store operation timed out: {0}")]
    StoreTimeout(String),

    /// Bad or missing configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Result alias used throughout the crate outside of the risk scorer.
pub type RiskResult<T> = Result<T, RiskError>;
