//! Risk Engine (C2): fuse behavioural, device, geo, and network signals into a
//! bounded risk score (spec §4.1).
//!
//! Every function in this module is infallible by design: malformed or absent
//! signals are treated as missing and penalised, never rejected. The engine
//! holds no mutable state of its own — `score_login`/`score_session` are pure
//! functions of their arguments, which is what makes `score(x) == score(x)`
//! an invariant worth testing rather than an accident.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::config::{normalize_asn, Config};
use crate::profile::{DeviceFingerprint, Geo, IpGeo, MouseDynamics, Profile, TypingPattern};
use crate::signal::{canonical_os, haversine_km, parse_browser, parse_screen, screen_class, screen_within_tolerance};

/// Categorical risk level derived from the numeric score and C8's thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Result of a scoring call.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub risk_score: i64,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
    pub missing_signals: u32,
}

/// A behavioural challenge submitted alongside a login or step-up attempt.
#[derive(Debug, Clone)]
pub enum Challenge {
    Typing { wpm: f64, error_rate: f64, keystroke_timings: Vec<f64> },
    Pointer { path: Vec<(f64, f64)>, clicks: u32 },
}

/// Normalised login metrics (post C1 canonicalisation at the edge).
#[derive(Debug, Clone, Default)]
pub struct LoginMetrics {
    pub device: Option<DeviceFingerprint>,
    pub geo: Option<Geo>,
    pub ip: Option<IpAddr>,
    pub ip_asn: Option<String>,
    pub ip_city: Option<String>,
    pub ip_region: Option<String>,
    pub ip_country: Option<String>,
    pub scroll_max_pct: Option<f64>,
    pub dwell_ms: Option<f64>,
}

/// In-session telemetry sample (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct SessionTelemetry {
    pub device: Option<DeviceFingerprint>,
    pub geo: Option<Geo>,
    pub ip: Option<IpAddr>,
    pub ip_asn: Option<String>,
    pub ip_city: Option<String>,
    pub ip_region: Option<String>,
    pub ip_country: Option<String>,
    pub idle_jitter_ms: Option<f64>,
    pub pointer_speed_std: Option<f64>,
    pub nav_bf_usage: Option<f64>,
}

fn ip_weight_factor(asn: Option<&str>, config: &Config) -> f64 {
    match asn {
        Some(asn) if config.is_carrier_asn(&normalize_asn(asn)) => 0.3,
        _ => 1.0,
    }
}

fn ip_in_prefixes(ip: Option<IpAddr>, prefixes: &[IpNetwork]) -> bool {
    match ip {
        Some(ip) => prefixes.iter().any(|net| net.contains(ip)),
        None => false,
    }
}

fn ip_in_prefix_strings(ip: Option<IpAddr>, prefixes: &std::collections::HashSet<String>) -> bool {
    let Some(ip) = ip else { return false };
    prefixes.iter().filter_map(|p| p.parse::<IpNetwork>().ok()).any(|net| net.contains(ip))
}

/// Device fingerprint comparison, tolerant of minor version/screen drift (§4.1).
fn device_penalty(current: &DeviceFingerprint, profile: &DeviceFingerprint) -> (i64, Vec<String>) {
    let mut penalty = 0i64;
    let mut reasons = Vec::new();

    let cb = parse_browser(current.browser.as_deref());
    let pb = parse_browser(profile.browser.as_deref());
    match (&cb, &pb) {
        (Some(cb), Some(pb)) => {
            if cb.brand != pb.brand {
                penalty += 20;
                reasons.push(format!("Device browser brand mismatch: {} vs {}", cb.brand, pb.brand));
            } else if let (Some(cv), Some(pv)) = (cb.major_version, pb.major_version) {
                if (cv as i64 - pv as i64).abs() > 1 {
                    penalty += 5;
                    reasons.push(format!("Device browser version differs: {cv} vs {pv}"));
                }
            }
        }
        _ => {
            if let (Some(c), Some(p)) = (&current.browser, &profile.browser) {
                if c != p {
                    penalty += 10;
                    reasons.push("Device browser differs (unparsed)".to_string());
                }
            }
        }
    }

    let co = canonical_os(current.os.as_deref());
    let po = canonical_os(profile.os.as_deref());
    if let (Some(co), Some(po)) = (&co, &po) {
        if co != po {
            penalty += 15;
            reasons.push(format!("Device os family mismatch: {co} vs {po}"));
        }
    }

    if let (Some(cs), Some(ps)) = (&current.screen, &profile.screen) {
        let cwh = parse_screen(Some(cs));
        let pwh = parse_screen(Some(ps));
        match (cwh, pwh) {
            (Some(cwh), Some(pwh)) => {
                if !screen_within_tolerance(cwh, pwh, 100) {
                    let ccls = screen_class(cwh);
                    let pcls = screen_class(pwh);
                    if std::mem::discriminant(&ccls) == std::mem::discriminant(&pcls) {
                        penalty += 5;
                        reasons.push(format!("Screen size changed within same class ({ccls:?})"));
                    } else {
                        penalty += 15;
                        reasons.push(format!("Screen class changed: {ccls:?} -> {pcls:?}"));
                    }
                }
            }
            _ => {
                if cs != ps {
                    penalty += 5;
                    reasons.push("Screen differs".to_string());
                }
            }
        }
    }

    if let (Some(ct), Some(pt)) = (&current.timezone, &profile.timezone) {
        if ct != pt {
            penalty += 10;
            reasons.push(format!("Device timezone mismatch: {ct} vs {pt}"));
        }
    }

    (penalty, reasons)
}

/// Precise-geolocation comparison with an accuracy-scaled tolerance (§4.1).
fn geo_penalty(current: &Geo, profile: &Geo) -> (i64, Vec<String>) {
    let mut reasons = Vec::new();

    if let Some(accuracy) = current.accuracy {
        if accuracy > 500.0 {
            reasons.push("Geo accuracy too low (>500m); relying on IP/network".to_string());
            return (10, reasons);
        }
    }

    if let (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) =
        (current.latitude, current.longitude, profile.latitude, profile.longitude)
    {
        let dist_km = haversine_km(lat1, lon1, lat2, lon2);
        let dist_m = dist_km * 1000.0;
        let tol_m = current.accuracy.map(|a| a.clamp(100.0, 500.0)).unwrap_or(100.0);
        if dist_m > tol_m {
            let over = dist_m - tol_m;
            let add = 10.0 + (over / 100.0).min(20.0);
            reasons.push(format!("Geo differs by {dist_km:.2} km (> tol {}m)", tol_m as i64));
            return (add as i64, reasons);
        }
    }

    (0, reasons)
}

/// City-level fallback comparison when precise geo is absent or imprecise (§4.1).
fn city_fallback_penalty(current: Option<&IpGeo>, profile: Option<&IpGeo>) -> (i64, Vec<String>) {
    let norm = |s: &Option<String>| s.clone().unwrap_or_default().trim().to_lowercase();

    let Some(current) = current else {
        return (15, vec!["No IP geo info for fallback".to_string()]);
    };

    let p_country = profile.map(|p| norm(&p.country)).unwrap_or_default();
    if p_country.is_empty() {
        return (15, vec!["No baseline IP geo; applying default fallback".to_string()]);
    }

    let c_country = norm(&current.country);
    if c_country != p_country {
        return (10, vec!["IP geo country differs".to_string()]);
    }

    let c_city = norm(&current.city);
    let p_city = profile.map(|p| norm(&p.city)).unwrap_or_default();
    if !c_city.is_empty() && c_city == p_city {
        return (0, vec!["IP geo city matches baseline".to_string()]);
    }

    let c_region = norm(&current.region);
    let p_region = profile.map(|p| norm(&p.region)).unwrap_or_default();
    if !c_region.is_empty() && c_region == p_region {
        return (3, vec!["IP geo region matches baseline".to_string()]);
    }

    (7, vec!["IP geo region differs within country".to_string()])
}

fn zscore(val: f64, mean: Option<f64>, std: Option<f64>) -> Option<f64> {
    match (mean, std) {
        (Some(mean), Some(std)) if std > 1e-6 => Some(((val - mean) / std).abs()),
        _ => None,
    }
}

/// Typing-dimension penalty, z-score based with an absolute-difference fallback (§4.1).
fn typing_penalty(
    wpm: f64,
    error_rate: f64,
    keystroke_timings: &[f64],
    baselines: &crate::profile::TypingBaseline,
    raw_profile: Option<&TypingPattern>,
) -> (i64, Vec<String>) {
    let mut penalty = 0i64;
    let mut reasons = Vec::new();

    match zscore(wpm, baselines.wpm.mean, baselines.wpm.std) {
        Some(z) => {
            if z > 3.0 {
                penalty += 25;
                reasons.push(format!("Typing speed z={z:.1}"));
            } else if z > 2.0 {
                penalty += 15;
                reasons.push(format!("Typing speed z={z:.1}"));
            } else if z > 1.5 {
                penalty += 8;
                reasons.push(format!("Typing speed z={z:.1}"));
            }
        }
        None => {
            let baseline_wpm = raw_profile.map(|p| p.wpm).unwrap_or(0.0);
            let diff = (wpm - baseline_wpm).abs();
            if diff > 30.0 {
                penalty += 30;
            } else if diff > 20.0 {
                penalty += 20;
            } else if diff > 10.0 {
                penalty += 10;
            }
            if diff > 10.0 {
                reasons.push(format!("Typing speed differs by {diff:.1} WPM"));
            }
        }
    }

    match zscore(error_rate, baselines.err.mean, baselines.err.std) {
        Some(z) => {
            if z > 3.0 {
                penalty += 20;
                reasons.push(format!("Error rate z={z:.1}"));
            } else if z > 2.0 {
                penalty += 12;
                reasons.push(format!("Error rate z={z:.1}"));
            } else if z > 1.5 {
                penalty += 6;
                reasons.push(format!("Error rate z={z:.1}"));
            }
        }
        None => {
            let baseline_err = raw_profile.map(|p| p.error_rate).unwrap_or(0.0);
            let diff = (error_rate - baseline_err).abs();
            if diff > 0.2 {
                penalty += 20;
            } else if diff > 0.1 {
                penalty += 10;
            }
            if diff > 0.1 {
                reasons.push(format!("Error rate differs by {diff:.2}"));
            }
        }
    }

    if !keystroke_timings.is_empty() {
        let cur_mean = keystroke_timings.iter().sum::<f64>() / keystroke_timings.len() as f64;
        match zscore(cur_mean, baselines.timing.mean, baselines.timing.std) {
            Some(z) => {
                if z > 3.0 {
                    penalty += 20;
                    reasons.push(format!("Timing mean z={z:.1}"));
                } else if z > 2.0 {
                    penalty += 12;
                    reasons.push(format!("Timing mean z={z:.1}"));
                } else if z > 1.5 {
                    penalty += 6;
                    reasons.push(format!("Timing mean z={z:.1}"));
                }
            }
            None => {
                if let Some(prof) = raw_profile.filter(|p| !p.keystroke_timings.is_empty()) {
                    let prof_mean = prof.keystroke_timings.iter().sum::<f64>() / prof.keystroke_timings.len() as f64;
                    let diff = (cur_mean - prof_mean).abs();
                    if diff > 200.0 {
                        penalty += 25;
                    } else if diff > 100.0 {
                        penalty += 15;
                    } else if diff > 50.0 {
                        penalty += 5;
                    }
                    if diff > 50.0 {
                        reasons.push(format!("Keystroke timing mean differs by {diff:.0}ms"));
                    }
                }
            }
        }
    }

    (penalty, reasons)
}

/// Pointer-dimension penalty (mouse/touch), same z-score-or-fallback shape (§4.1).
fn mouse_penalty(
    path_len: usize,
    clicks: u32,
    baselines: &crate::profile::PointerBaseline,
    raw_profile: Option<&MouseDynamics>,
) -> (i64, Vec<String>) {
    let mut penalty = 0i64;
    let mut reasons = Vec::new();

    if path_len > 0 {
        match zscore(path_len as f64, baselines.path_len.mean, baselines.path_len.std) {
            Some(z) => {
                if z > 3.0 {
                    penalty += 12;
                    reasons.push(format!("Path len z={z:.1}"));
                } else if z > 2.0 {
                    penalty += 7;
                    reasons.push(format!("Path len z={z:.1}"));
                }
            }
            None => {
                if let Some(prof) = raw_profile {
                    let diff = (path_len as i64 - prof.path_len as i64).unsigned_abs();
                    if diff > 50 {
                        penalty += 15;
                    } else if diff > 10 {
                        penalty += 5;
                    }
                    if diff > 10 {
                        reasons.push(format!("Mouse/touch path length differs by {diff} points"));
                    }
                }
            }
        }
    }

    let prof_clicks = raw_profile.map(|p| p.clicks).unwrap_or(0);
    match zscore(clicks as f64, baselines.clicks.mean, baselines.clicks.std) {
        Some(z) => {
            if z > 3.0 {
                penalty += 10;
                reasons.push(format!("Clicks z={z:.1}"));
            } else if z > 2.0 {
                penalty += 6;
                reasons.push(format!("Clicks z={z:.1}"));
            }
        }
        None => {
            let diff = (clicks as i64 - prof_clicks as i64).unsigned_abs();
            if diff > 5 {
                penalty += 10;
            } else if diff > 2 {
                penalty += 5;
            }
            if diff > 2 {
                reasons.push(format!("Click/tap count differs by {diff}"));
            }
        }
    }

    (penalty, reasons)
}

fn level_for(score: i64, config: &Config) -> RiskLevel {
    if score > config.high_threshold {
        RiskLevel::High
    } else if score > config.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Score a login or step-up attempt (§4.1).
pub fn score_login(
    challenge: Option<&Challenge>,
    metrics: Option<&LoginMetrics>,
    profile: Option<&Profile>,
    config: &Config,
) -> ScoreResult {
    let mut score = 0i64;
    let mut reasons = Vec::new();
    let empty_metrics = LoginMetrics::default();
    let metrics = metrics.unwrap_or(&empty_metrics);

    let ip_factor = ip_weight_factor(metrics.ip_asn.as_deref(), config);

    if profile.is_none() {
        reasons.push("No behavior profile on file".to_string());
        score += 20;
    }
    if challenge.is_none() {
        reasons.push("No behavioral challenge provided".to_string());
        score += 15;
    }

    let geo_missing_or_fallback = metrics.geo.as_ref().map(|g| g.fallback).unwrap_or(true);
    if geo_missing_or_fallback {
        reasons.push("No reliable geolocation (fallback or missing)".to_string());
        let current_ip_geo = IpGeo {
            city: metrics.ip_city.clone(),
            region: metrics.ip_region.clone(),
            country: metrics.ip_country.clone(),
        };
        let profile_ip_geo = profile.and_then(|p| p.ip_geo.as_ref());
        let (pen, city_reasons) = city_fallback_penalty(Some(&current_ip_geo), profile_ip_geo);
        reasons.extend(city_reasons.into_iter().map(|r| format!("Geo fallback: {r}")));
        score += pen;
    }

    if metrics.device.as_ref().map(|d| d.is_empty()).unwrap_or(true) {
        reasons.push("No device fingerprint provided".to_string());
        score += 20;
    }

    if let Some(challenge) = challenge {
        match challenge {
            Challenge::Typing { wpm, error_rate, keystroke_timings } => {
                let baselines = profile.map(|p| &p.baselines.typing);
                let raw = profile.and_then(|p| p.typing_pattern.as_ref());
                if let Some(baselines) = baselines {
                    let (pen, r) = typing_penalty(*wpm, *error_rate, keystroke_timings, baselines, raw);
                    reasons.extend(r);
                    score += pen;
                }
            }
            Challenge::Pointer { path, clicks } => {
                let baselines = profile.map(|p| &p.baselines.pointer);
                let raw = profile.and_then(|p| p.mouse_dynamics.as_ref());
                if let Some(baselines) = baselines {
                    let (pen, r) = mouse_penalty(path.len(), *clicks, baselines, raw);
                    reasons.extend(r);
                    score += pen;
                }
            }
        }
    }

    if let Some(device) = &metrics.device {
        let missing_fields: Vec<&str> = [
            ("browser", &device.browser),
            ("os", &device.os),
            ("screen", &device.screen),
            ("timezone", &device.timezone),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k)
        .collect();
        if !missing_fields.is_empty() {
            reasons.push(format!("Missing device fields: {}", missing_fields.join(", ")));
            score += 10;
        }

        if let Some(profile_device) = profile.and_then(|p| p.device_fingerprint.as_ref()) {
            let (pen, r) = device_penalty(device, profile_device);
            reasons.extend(r);
            score += pen;
        }
    }

    if let (Some(profile_geo), Some(geo)) = (profile.and_then(|p| p.geo.as_ref()), &metrics.geo) {
        let (pen, r) = geo_penalty(geo, profile_geo);
        reasons.extend(r);
        score += pen;

        if let Some(accuracy) = geo.accuracy {
            if accuracy > 500.0 {
                let current_ip_geo = IpGeo {
                    city: metrics.ip_city.clone(),
                    region: metrics.ip_region.clone(),
                    country: metrics.ip_country.clone(),
                };
                let profile_ip_geo = profile.and_then(|p| p.ip_geo.as_ref());
                let (city_pen, city_reasons) = city_fallback_penalty(Some(&current_ip_geo), profile_ip_geo);
                let adj = (city_pen - 10).max(0);
                if adj > 0 {
                    reasons.extend(city_reasons.into_iter().map(|r| format!("Geo fallback: {r}")));
                    score += adj;
                }
            }
        }
    }

    if metrics.ip.is_none() {
        reasons.push("IP missing or unknown".to_string());
        score += 5;
    }

    if !config.denylist_prefixes.is_empty() && ip_in_prefixes(metrics.ip, &config.denylist_prefixes) {
        reasons.push("IP is in denylist range".to_string());
        score += 25;
    }
    if !config.allowlist_prefixes.is_empty() && !ip_in_prefixes(metrics.ip, &config.allowlist_prefixes) {
        score += (5.0 * ip_factor).round() as i64;
    }

    if let (Some(profile), Some(ip)) = (profile, metrics.ip) {
        if !profile.known_networks.is_empty() {
            if ip_in_prefix_strings(Some(ip), &profile.known_networks) {
                reasons.push("IP matches user's known network".to_string());
                score = (score - 7).max(0);
            } else {
                score += (3.0 * ip_factor).round() as i64;
            }
        }
    }

    if ip_factor < 1.0 {
        reasons.push("Carrier/mobile ASN detected; down-weighted IP-based checks".to_string());
    }

    let mut missing = 0u32;
    if profile.is_none() {
        missing += 1;
    }
    if challenge.is_none() {
        missing += 1;
    }
    if metrics.device.as_ref().map(|d| d.is_empty()).unwrap_or(true) {
        missing += 1;
    }
    if geo_missing_or_fallback {
        missing += 1;
    }
    if missing >= 2 {
        score = score.max(45);
    }
    if missing >= 3 {
        score = score.max(65);
    }

    score = score.min(100);

    if let Some(scroll) = metrics.scroll_max_pct {
        if scroll < 10.0 {
            score += 2;
            reasons.push("Low scroll depth".to_string());
        }
    }
    if let Some(dwell) = metrics.dwell_ms {
        if dwell < 2000.0 {
            score += 2;
            reasons.push("Very short dwell time".to_string());
        }
    }

    let level = level_for(score, config);
    ScoreResult { risk_score: score, level, reasons, missing_signals: missing }
}

/// Score an in-session telemetry sample with halved device/geo weights (§4.1).
pub fn score_session(telemetry: &SessionTelemetry, profile: Option<&Profile>, config: &Config) -> ScoreResult {
    let mut score = 0i64;
    let mut reasons = Vec::new();

    if let (Some(profile_device), Some(device)) = (profile.and_then(|p| p.device_fingerprint.as_ref()), &telemetry.device) {
        let (pen, r) = device_penalty(device, profile_device);
        reasons.extend(r);
        score += pen / 2;
    }

    if let (Some(profile_geo), Some(geo)) = (profile.and_then(|p| p.geo.as_ref()), &telemetry.geo) {
        let (pen, r) = geo_penalty(geo, profile_geo);
        reasons.extend(r);
        score += pen / 2;

        if let Some(accuracy) = geo.accuracy {
            if accuracy > 500.0 {
                let current_ip_geo = IpGeo {
                    city: telemetry.ip_city.clone(),
                    region: telemetry.ip_region.clone(),
                    country: telemetry.ip_country.clone(),
                };
                let profile_ip_geo = profile.and_then(|p| p.ip_geo.as_ref());
                let (city_pen, city_reasons) = city_fallback_penalty(Some(&current_ip_geo), profile_ip_geo);
                let adj = (city_pen - 10).max(0);
                if adj > 0 {
                    reasons.extend(city_reasons.into_iter().map(|r| format!("Geo fallback: {r}")));
                    score += adj / 2;
                }
            }
        }
    }

    let ip_factor = ip_weight_factor(telemetry.ip_asn.as_deref(), config);

    if telemetry.ip.is_none() {
        reasons.push("IP missing or unknown (session)".to_string());
        score += 3;
    } else {
        if let Some(profile) = profile {
            if !profile.known_networks.is_empty() && !ip_in_prefix_strings(telemetry.ip, &profile.known_networks) {
                score += (3.0 * ip_factor).round() as i64;
            }
        }
        if !config.denylist_prefixes.is_empty() && ip_in_prefixes(telemetry.ip, &config.denylist_prefixes) {
            reasons.push("IP in denylist range (session)".to_string());
            score += 20;
        }
        if !config.allowlist_prefixes.is_empty() && !ip_in_prefixes(telemetry.ip, &config.allowlist_prefixes) {
            score += (3.0 * ip_factor).round() as i64;
        }
    }

    if ip_factor < 1.0 {
        reasons.push("Carrier/mobile ASN detected; down-weighted IP checks (session)".to_string());
    }

    let mut elevated_behavior_signals = 0u32;
    if let Some(idle) = telemetry.idle_jitter_ms {
        if idle > 3000.0 {
            reasons.push("High idle jitter".to_string());
            score += 5;
            elevated_behavior_signals += 1;
        }
    }
    if let Some(std) = telemetry.pointer_speed_std {
        if std > 1.5 {
            reasons.push("Unstable pointer speed".to_string());
            score += 5;
            elevated_behavior_signals += 1;
        }
    }
    if let Some(bf) = telemetry.nav_bf_usage {
        if bf > 5.0 {
            reasons.push("High back/forward usage".to_string());
            score += 3;
            elevated_behavior_signals += 1;
        }
    }
    // Any one elevated signal alone is noise; three together describe a
    // session that no longer looks like the same user (mirrors the
    // missing-signal escalation floor in `score_login`).
    if elevated_behavior_signals >= 3 {
        reasons.push("Multiple behavioral signals elevated simultaneously".to_string());
        score = score.max(45);
    }

    score = score.clamp(0, 100);
    let level = level_for(score, config);
    ScoreResult { risk_score: score, level, reasons, missing_signals: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;

    #[test]
    fn score_is_bounded() {
        let config = Config::default();
        let result = score_login(None, None, None, &config);
        assert!(result.risk_score >= 0 && result.risk_score <= 100);
    }

    #[test]
    fn determinism_on_identical_inputs() {
        let config = Config::default();
        let metrics = LoginMetrics {
            ip: Some("203.0.113.10".parse().unwrap()),
            ..Default::default()
        };
        let a = score_login(None, Some(&metrics), None, &config);
        let b = score_login(None, Some(&metrics), None, &config);
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn missing_signals_clamp_the_score_up() {
        let config = Config::default();
        // No profile, no challenge, no device, no geo: missing=4, clamps to >=65.
        let result = score_login(None, None, None, &config);
        assert!(result.risk_score >= 45);
    }

    #[test]
    fn known_good_login_scores_low() {
        let config = Config::default();
        let mut profile = Profile::new("alice".into());
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

        let challenge = Challenge::Typing { wpm: 61.0, error_rate: 0.02, keystroke_timings: vec![] };
        let metrics = LoginMetrics {
            device: profile.device_fingerprint.clone(),
            geo: profile.geo.clone(),
            ip: Some("203.0.113.10".parse().unwrap()),
            ..Default::default()
        };

        let result = score_login(Some(&challenge), Some(&metrics), Some(&profile), &config);
        assert_eq!(result.level, RiskLevel::Low);
        assert!(result.risk_score <= 10);
    }

    #[test]
    fn impossible_travel_is_flagged() {
        let config = Config::default();
        let mut profile = Profile::new("alice".into());
        profile.geo = Some(Geo { latitude: Some(40.7128), longitude: Some(-74.006), accuracy: Some(20.0), fallback: false });

        let metrics = LoginMetrics {
            geo: Some(Geo { latitude: Some(34.0522), longitude: Some(-118.2437), accuracy: Some(20.0), fallback: false }),
            ..Default::default()
        };

        let result = score_login(None, Some(&metrics), Some(&profile), &config);
        assert!(result.reasons.iter().any(|r| r.contains("Geo differs by 3935")));
    }

    #[test]
    fn carrier_asn_downweights_allowlist_miss() {
        let mut config = Config::default();
        config.allowlist_prefixes = vec!["198.51.100.0/24".parse().unwrap()];
        let metrics = LoginMetrics {
            ip: Some("203.0.113.9".parse().unwrap()),
            ip_asn: Some("AS55836".to_string()),
            ..Default::default()
        };
        let result = score_login(None, Some(&metrics), None, &config);
        assert!(result.reasons.iter().any(|r| r.contains("Carrier/mobile ASN detected")));
    }

    #[test]
    fn session_scoring_halves_device_geo_weight() {
        let config = Config::default();
        let telemetry = SessionTelemetry {
            idle_jitter_ms: Some(5000.0),
            pointer_speed_std: Some(2.0),
            nav_bf_usage: Some(7.0),
            ..Default::default()
        };
        let result = score_session(&telemetry, None, &config);
        assert_eq!(result.level, RiskLevel::Medium);
    }
}
