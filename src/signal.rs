//! Signal Normaliser (C1): canonicalise device, geo, and IP payloads to stable shapes.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::profile::DeviceFingerprint;

/// Raw device payload as received from a client, duck-typed per §9 Design Notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDevice {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub screen: Option<String>,
    pub timezone: Option<String>,
}

/// Recognised browser brand, with an optional major version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserId {
    pub brand: String,
    pub major_version: Option<u32>,
}

/// Width/height in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Coarse screen-size class used to judge whether a screen change is "within class".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenClass {
    MobileSmall,
    Mobile,
    Tablet,
    Desktop,
}

/// Parse `"Name NN"` shorthand or a user-agent string into `(brand, major_version)`.
/// Brand priority mirrors the scoring reference: chrome before safari, so Mobile
/// Safari on iOS (which contains "Safari" but also usually "CriOS"/"Chrome" if
/// it's actually Chrome) classifies correctly.
pub fn parse_browser(value: Option<&str>) -> Option<BrowserId> {
    let value = value?;
    if value.trim().is_empty() {
        return None;
    }
    let shorthand = Regex::new(r"^([A-Za-z]+)\s+(\d+)").unwrap();
    if let Some(caps) = shorthand.captures(value) {
        return Some(BrowserId {
            brand: caps[1].to_lowercase(),
            major_version: caps[2].parse().ok(),
        });
    }
    let low = value.to_lowercase();
    let extract = |needles: &[&str]| -> Option<u32> {
        for needle in needles {
            if let Some(idx) = low.find(needle) {
                let rest = &low[idx + needle.len()..];
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if !digits.is_empty() {
                    return digits.parse().ok();
                }
                return None;
            }
        }
        None
    };
    if low.contains("chrome") || low.contains("crios") {
        return Some(BrowserId { brand: "chrome".into(), major_version: extract(&["chrome/", "crios/"]) });
    }
    if low.contains("edg") {
        return Some(BrowserId { brand: "edge".into(), major_version: extract(&["edg/"]) });
    }
    if low.contains("firefox") || low.contains("fx") {
        return Some(BrowserId { brand: "firefox".into(), major_version: extract(&["firefox/"]) });
    }
    if low.contains("safari") && !low.contains("chrome") {
        return Some(BrowserId { brand: "safari".into(), major_version: extract(&["version/"]) });
    }
    if low.contains("opr/") || low.contains("opera") {
        return Some(BrowserId { brand: "opera".into(), major_version: extract(&["opr/", "opera/"]) });
    }
    None
}

/// Canonicalise an OS string to one of a fixed set of families.
pub fn canonical_os(value: Option<&str>) -> Option<String> {
    let value = value?;
    if value.trim().is_empty() {
        return None;
    }
    let s = value.to_lowercase();
    let family = if s.contains("win") {
        "windows"
    } else if s.contains("mac") || s.contains("darwin") || s.contains("os x") || s.contains("macos") {
        "macos"
    } else if s.contains("android") {
        "android"
    } else if s.contains("ios") || s.contains("iphone") || s.contains("ipad") {
        "ios"
    } else if s.contains("linux") || s.contains("ubuntu") || s.contains("debian") || s.contains("arch") {
        "linux"
    } else {
        return Some(s.trim().to_string());
    };
    Some(family.to_string())
}

/// Parse a `"WxH"` string or already-structured dimensions into a `ScreenSize`.
pub fn parse_screen(value: Option<&str>) -> Option<ScreenSize> {
    let value = value?;
    let re = Regex::new(r"^\s*(\d+)\s*[xX]\s*(\d+)\s*$").unwrap();
    let caps = re.captures(value)?;
    Some(ScreenSize { width: caps[1].parse().ok()?, height: caps[2].parse().ok()? })
}

pub fn screen_within_tolerance(a: ScreenSize, b: ScreenSize, tolerance_px: u32) -> bool {
    a.width.abs_diff(b.width) <= tolerance_px && a.height.abs_diff(b.height) <= tolerance_px
}

/// Bucket a screen size into a coarse class, sorting dimensions so orientation
/// does not affect classification (matches the reference implementation).
pub fn screen_class(size: ScreenSize) -> ScreenClass {
    let (w, h) = if size.width <= size.height {
        (size.width, size.height)
    } else {
        (size.height, size.width)
    };
    if w <= 480 && h <= 960 {
        ScreenClass::MobileSmall
    } else if w <= 820 && h <= 1366 {
        if w < 600 {
            ScreenClass::Mobile
        } else {
            ScreenClass::Tablet
        }
    } else {
        ScreenClass::Desktop
    }
}

/// Canonicalise a raw device payload into stable, comparable fields.
pub fn canonicalize_device(raw: &RawDevice) -> DeviceFingerprint {
    let browser = parse_browser(raw.browser.as_deref()).map(|b| match b.major_version {
        Some(v) => format!("{}{} {}", b.brand[..1].to_uppercase(), &b.brand[1..], v),
        None => format!("{}{}", b.brand[..1].to_uppercase(), &b.brand[1..]),
    });
    let os = canonical_os(raw.os.as_deref());
    let screen = parse_screen(raw.screen.as_deref()).map(|s| format!("{}x{}", s.width, s.height));
    DeviceFingerprint {
        browser: browser.or_else(|| raw.browser.clone()),
        os: os.or_else(|| raw.os.clone()),
        screen: screen.or_else(|| raw.screen.clone()),
        timezone: raw.timezone.clone(),
    }
}

/// Great-circle distance in kilometres (haversine formula).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    c * EARTH_RADIUS_KM
}

/// Derive the CIDR prefix used for known-network tracking and behaviour signatures:
/// IPv4 addresses collapse to a /24, IPv6 to a /64.
pub fn ip_prefix(ip: IpAddr) -> Option<IpNetwork> {
    let prefix_len = match ip {
        IpAddr::V4(_) => 24,
        IpAddr::V6(_) => 64,
    };
    let net = IpNetwork::new(ip, prefix_len).ok()?;
    IpNetwork::new(net.network(), prefix_len).ok()
}

/// RFC1918 / link-local / loopback classification (§4.4); these addresses are
/// never recorded as distinct-day rows or promoted to known networks.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Client-observed IP resolution precedence (§6): caller-supplied metrics IP wins,
/// then `CF-Connecting-IP`, then the first hop of `X-Forwarded-For`, then
/// `X-Real-IP`, finally the socket peer.
pub fn resolve_client_ip(
    metrics_ip: Option<&str>,
    cf_connecting_ip: Option<&str>,
    x_forwarded_for: Option<&str>,
    x_real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> Option<IpAddr> {
    if let Some(ip) = metrics_ip.and_then(|s| s.parse().ok()) {
        return Some(ip);
    }
    if let Some(ip) = cf_connecting_ip.and_then(|s| s.trim().parse().ok()) {
        return Some(ip);
    }
    if let Some(first) = x_forwarded_for.and_then(|s| s.split(',').next()) {
        if let Ok(ip) = first.trim().parse() {
            return Some(ip);
        }
    }
    if let Some(ip) = x_real_ip.and_then(|s| s.trim().parse().ok()) {
        return Some(ip);
    }
    peer
}
