//! Data model: user principal and behaviour profile (spec §3).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque user identifier. Callers key by whatever their identity store issues.
pub type UserId = String;

/// Role granted to a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The fields of the user principal the risk/step-up pipeline actually inspects.
/// The identity store owns the full record; this is a read-through projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
    pub verified: bool,
    pub onboarding_complete: bool,
}

/// Canonicalised device fingerprint, per §4.1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub screen: Option<String>,
    pub timezone: Option<String>,
}

impl DeviceFingerprint {
    pub fn is_empty(&self) -> bool {
        self.browser.is_none() && self.os.is_none() && self.screen.is_none() && self.timezone.is_none()
    }
}

/// Precise, client-reported geolocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub fallback: bool,
}

/// Coarse IP-derived geolocation, retained from the last low-risk observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpGeo {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

/// EWMA state for a single behavioural dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ewma {
    pub mean: Option<f64>,
    pub var: Option<f64>,
    pub std: Option<f64>,
}

impl Ewma {
    const ALPHA: f64 = 0.3;

    /// Apply one EWMA update step (spec §4.2).
    pub fn update(&mut self, x: f64) {
        match self.mean {
            None => {
                self.mean = Some(x);
                self.var = Some(1.0);
                self.std = Some(1.0);
            }
            Some(old_mean) => {
                let old_var = self.var.unwrap_or(1.0);
                let new_mean = Self::ALPHA * x + (1.0 - Self::ALPHA) * old_mean;
                let new_var = Self::ALPHA * (x - new_mean).powi(2) + (1.0 - Self::ALPHA) * old_var;
                self.mean = Some(new_mean);
                self.var = Some(new_var);
                self.std = Some(new_var.sqrt());
            }
        }
    }

    /// A z-score is only meaningful once both mean and a non-trivial std exist.
    pub fn zscore(&self, x: f64) -> Option<f64> {
        match (self.mean, self.std) {
            (Some(mean), Some(std)) if std > 1e-6 => Some(((x - mean) / std).abs()),
            _ => None,
        }
    }
}

/// Typing-dimension baselines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypingBaseline {
    pub wpm: Ewma,
    pub err: Ewma,
    pub timing: Ewma,
}

/// Pointer-dimension baselines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointerBaseline {
    pub path_len: Ewma,
    pub clicks: Ewma,
}

/// Nested baseline state, per §3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Baselines {
    pub typing: TypingBaseline,
    pub pointer: PointerBaseline,
}

/// Raw last-accepted typing challenge payload, kept for the absolute-difference
/// fallback ladder used while a dimension has no usable variance yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypingPattern {
    pub wpm: f64,
    pub error_rate: f64,
    pub keystroke_timings: Vec<f64>,
}

/// Raw last-accepted pointer challenge payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MouseDynamics {
    pub path_len: usize,
    pub clicks: u32,
}

/// One snapshot retained in `baseline_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub baselines: Baselines,
}

/// Per-user behaviour profile (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub device_fingerprint: Option<DeviceFingerprint>,
    pub geo: Option<Geo>,
    pub ip_geo: Option<IpGeo>,
    pub known_networks: HashSet<String>,
    pub baselines: Baselines,
    pub typing_pattern: Option<TypingPattern>,
    pub mouse_dynamics: Option<MouseDynamics>,
    pub baseline_version: u64,
    pub baseline_stable: bool,
    pub low_risk_streak: u32,
    pub baseline_history: Vec<BaselineSnapshot>,
    pub behavior_signature: Option<String>,
    pub drift_flagged: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            device_fingerprint: None,
            geo: None,
            ip_geo: None,
            known_networks: HashSet::new(),
            baselines: Baselines::default(),
            typing_pattern: None,
            mouse_dynamics: None,
            baseline_version: 0,
            baseline_stable: false,
            low_risk_streak: 0,
            baseline_history: Vec::new(),
            behavior_signature: None,
            drift_flagged: false,
            last_seen: None,
        }
    }

    /// Push a snapshot into the bounded history, keeping only the last 3 (§3 invariant).
    pub fn push_history(&mut self) {
        self.baseline_history.push(BaselineSnapshot {
            version: self.baseline_version,
            timestamp: Utc::now(),
            baselines: self.baselines.clone(),
        });
        while self.baseline_history.len() > 3 {
            self.baseline_history.remove(0);
        }
    }
}
