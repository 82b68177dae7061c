//! Signature Binder (C7): derive and validate a per-session behaviour signature.
//!
//! The signature is a SHA-256 digest over a canonical JSON object of a client's
//! device fields plus its IP prefix. It is embedded in access tokens (§3) and
//! re-derived by the Session Guardian on every telemetry ingest to detect a
//! client swap mid-session (§4.3).

use std::net::IpAddr;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::profile::DeviceFingerprint;
use crate::signal::ip_prefix;

/// Compute the hex-encoded SHA-256 signature for a device fingerprint and
/// optional client IP. Fields absent from `device` are omitted from the
/// canonical object entirely, matching the reference implementation's
/// `{k: v for k in core_fields if v}` construction.
pub fn compute_signature(device: &DeviceFingerprint, ip: Option<IpAddr>) -> String {
    let mut core = serde_json::Map::new();
    if let Some(v) = &device.browser {
        core.insert("browser".into(), json!(v));
    }
    if let Some(v) = &device.os {
        core.insert("os".into(), json!(v));
    }
    if let Some(v) = &device.screen {
        core.insert("screen".into(), json!(v));
    }
    if let Some(v) = &device.timezone {
        core.insert("timezone".into(), json!(v));
    }
    if let Some(ip) = ip {
        if let Some(prefix) = ip_prefix(ip) {
            core.insert("ip_prefix".into(), json!(prefix.to_string()));
        }
    }
    // serde_json::Map is a BTreeMap by default, which keeps keys sorted —
    // this is what gives us "canonical JSON" without a separate sort step.
    let canonical = serde_json::Value::Object(core).to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Compare a signature carried by a token against the one derived from the
/// device/IP observed in current telemetry. `None` expected means the token
/// never carried a signature, so there is nothing to validate against.
pub fn validate_signature(expected: Option<&str>, device: &DeviceFingerprint, ip: Option<IpAddr>) -> bool {
    match expected {
        None => true,
        Some(expected) => compute_signature(device, ip) == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceFingerprint {
        DeviceFingerprint {
            browser: Some("Chrome 119".into()),
            os: Some("windows".into()),
            screen: Some("1920x1080".into()),
            timezone: Some("America/New_York".into()),
        }
    }

    #[test]
    fn signature_is_deterministic() {
        let ip: IpAddr = "203.0.113.10".parse().unwrap();
        let a = compute_signature(&device(), Some(ip));
        let b = compute_signature(&device(), Some(ip));
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_device() {
        let ip: IpAddr = "203.0.113.10".parse().unwrap();
        let a = compute_signature(&device(), Some(ip));
        let mut other = device();
        other.browser = Some("Firefox 120".into());
        let b = compute_signature(&other, Some(ip));
        assert_ne!(a, b);
    }

    #[test]
    fn validate_accepts_missing_expected() {
        let ip: IpAddr = "203.0.113.10".parse().unwrap();
        assert!(validate_signature(None, &device(), Some(ip)));
    }
}
