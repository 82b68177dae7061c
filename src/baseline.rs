//! Baseline Learner (C3): EWMA behavioural baselines with warm-up and versioning (§4.2).

use std::net::IpAddr;

use chrono::Utc;
use tracing::warn;

use crate::profile::{DeviceFingerprint, Geo, IpGeo, MouseDynamics, Profile, TypingPattern};
use crate::signal::ip_prefix;
use crate::signature::compute_signature;

/// The behavioural challenge payload the learner updates baselines from.
#[derive(Debug, Clone)]
pub enum ChallengeSample {
    Typing { wpm: f64, error_rate: f64, keystroke_timings: Vec<f64> },
    Pointer { path_len: usize, clicks: u32 },
}

const STABLE_STREAK: u32 = 5;

/// Update baselines after a `low` decision. Best-effort: a persistence failure
/// from the caller's store must not fail the surrounding auth response, so
/// this function itself never returns `Err` — it only mutates in memory and
/// logs a warning if a caller-supplied persist step (not modelled here) fails.
pub fn learn_from_login(
    profile: &mut Profile,
    challenge: Option<&ChallengeSample>,
    device: Option<&DeviceFingerprint>,
    geo: Option<&Geo>,
    ip: Option<IpAddr>,
    ip_geo: Option<&IpGeo>,
) {
    if let Some(sample) = challenge {
        apply_sample(profile, sample);
    }

    if let Some(device) = device {
        profile.device_fingerprint = Some(device.clone());
    }

    if let Some(geo) = geo {
        if !geo.fallback && geo.latitude.is_some() && geo.longitude.is_some() {
            profile.geo = Some(geo.clone());
        }
    }

    // Coarse IP-derived geo, kept for city-level fallback comparisons once
    // precise geolocation is unavailable or imprecise.
    if let Some(ip_geo) = ip_geo {
        profile.ip_geo = Some(ip_geo.clone());
    }

    let signature_device = profile.device_fingerprint.clone().unwrap_or_default();
    profile.behavior_signature = Some(compute_signature(&signature_device, ip));

    profile.low_risk_streak += 1;
    if profile.low_risk_streak >= STABLE_STREAK {
        profile.baseline_stable = true;
    }

    profile.baseline_version += 1;
    profile.push_history();
    profile.last_seen = Some(Utc::now());

    if let Some(ip) = ip {
        if ip_prefix(ip).is_none() {
            warn!(user_id = %profile.user_id, "could not derive IP prefix during learning");
        }
    }
}

fn apply_sample(profile: &mut Profile, sample: &ChallengeSample) {
    match sample {
        ChallengeSample::Typing { wpm, error_rate, keystroke_timings } => {
            profile.baselines.typing.wpm.update(*wpm);
            profile.baselines.typing.err.update(*error_rate);
            if !keystroke_timings.is_empty() {
                let mean = keystroke_timings.iter().sum::<f64>() / keystroke_timings.len() as f64;
                profile.baselines.typing.timing.update(mean);
            }
            profile.typing_pattern = Some(TypingPattern {
                wpm: *wpm,
                error_rate: *error_rate,
                keystroke_timings: keystroke_timings.clone(),
            });
        }
        ChallengeSample::Pointer { path_len, clicks } => {
            profile.baselines.pointer.path_len.update(*path_len as f64);
            profile.baselines.pointer.clicks.update(*clicks as f64);
            profile.mouse_dynamics = Some(MouseDynamics { path_len: *path_len, clicks: *clicks });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_mean_and_unit_variance_on_first_sample() {
        let mut profile = Profile::new("alice".into());
        apply_sample(&mut profile, &ChallengeSample::Typing { wpm: 60.0, error_rate: 0.02, keystroke_timings: vec![] });
        assert_eq!(profile.baselines.typing.wpm.mean, Some(60.0));
        assert_eq!(profile.baselines.typing.wpm.var, Some(1.0));
    }

    #[test]
    fn streak_becomes_stable_and_stays_stable() {
        let mut profile = Profile::new("alice".into());
        for _ in 0..5 {
            learn_from_login(&mut profile, None, None, None, None, None);
        }
        assert!(profile.baseline_stable);
        assert_eq!(profile.low_risk_streak, 5);
    }

    #[test]
    fn history_is_capped_at_three() {
        let mut profile = Profile::new("alice".into());
        for _ in 0..5 {
            learn_from_login(&mut profile, None, None, None, None, None);
        }
        assert_eq!(profile.baseline_history.len(), 3);
    }

    #[test]
    fn version_is_monotonic() {
        let mut profile = Profile::new("alice".into());
        let mut last = 0;
        for _ in 0..4 {
            learn_from_login(&mut profile, None, None, None, None, None);
            assert!(profile.baseline_version > last);
            last = profile.baseline_version;
        }
    }

    #[test]
    fn fallback_geo_is_not_adopted() {
        let mut profile = Profile::new("alice".into());
        let fallback_geo = Geo { latitude: Some(1.0), longitude: Some(2.0), accuracy: Some(900.0), fallback: true };
        learn_from_login(&mut profile, None, None, Some(&fallback_geo), None, None);
        assert!(profile.geo.is_none());
    }

    #[test]
    fn ip_geo_is_adopted_as_city_fallback_baseline() {
        let mut profile = Profile::new("alice".into());
        let ip_geo = IpGeo { city: Some("Austin".into()), region: Some("TX".into()), country: Some("US".into()) };
        learn_from_login(&mut profile, None, None, None, None, Some(&ip_geo));
        assert_eq!(profile.ip_geo, Some(ip_geo));
    }
}
