//! Known-Network Tracker (C4): per-user IP-prefix promotion and decay (spec §4.4).

use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

use crate::config::Config;
use crate::profile::{Profile, UserId};
use crate::signal::{ip_prefix, is_private};

/// A single `(user_id, prefix, day)` row. Unique per that triple.
#[derive(Debug, Clone)]
pub struct CounterRow {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// In-memory reference implementation of the `CounterStore` trait boundary (§6).
/// Keyed by `(user_id, prefix)`, holding one row per distinct calendar day.
#[derive(Debug, Default)]
pub struct CounterStore {
    rows: DashMap<(UserId, String), DashMap<NaiveDate, CounterRow>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert today's row for `(user_id, prefix)`.
    pub fn upsert(&self, user_id: &UserId, prefix: &str, now: DateTime<Utc>) {
        let day = now.date_naive();
        let days = self.rows.entry((user_id.clone(), prefix.to_string())).or_default();
        days.entry(day)
            .and_modify(|row| row.last_seen = now)
            .or_insert(CounterRow { first_seen: now, last_seen: now });
    }

    /// Count distinct days for `(user_id, prefix)` with `last_seen >= since`.
    pub fn distinct_days_in_window(&self, user_id: &UserId, prefix: &str, since: DateTime<Utc>) -> u32 {
        match self.rows.get(&(user_id.clone(), prefix.to_string())) {
            None => 0,
            Some(days) => days.iter().filter(|e| e.value().last_seen >= since).count() as u32,
        }
    }

    /// Most recent `last_seen` across all days recorded for `(user_id, prefix)`.
    pub fn last_seen(&self, user_id: &UserId, prefix: &str) -> Option<DateTime<Utc>> {
        self.rows
            .get(&(user_id.clone(), prefix.to_string()))
            .and_then(|days| days.iter().map(|e| e.value().last_seen).max())
    }
}

/// Record a successful low-risk login from `ip` and run the promotion check.
/// Private addresses are neither recorded nor promoted.
pub fn record_and_promote(
    profile: &mut Profile,
    counters: &CounterStore,
    config: &Config,
    ip: IpAddr,
    now: DateTime<Utc>,
) {
    if is_private(ip) {
        return;
    }
    let Some(prefix) = ip_prefix(ip) else { return };
    let prefix = prefix.to_string();

    counters.upsert(&profile.user_id, &prefix, now);

    let since = now - chrono::Duration::days(30);
    let distinct_days = counters.distinct_days_in_window(&profile.user_id, &prefix, since);
    if distinct_days >= config.known_network_promotion_threshold {
        profile.known_networks.insert(prefix);
    }
}

/// Remove any known network whose most recent activity predates the decay window.
pub fn demote_stale(profile: &mut Profile, counters: &CounterStore, config: &Config, now: DateTime<Utc>) {
    let cutoff = now - chrono::Duration::days(config.known_network_decay_days);
    profile.known_networks.retain(|prefix| match counters.last_seen(&profile.user_id, prefix) {
        Some(last_seen) => last_seen >= cutoff,
        None => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn promotes_after_threshold_distinct_days() {
        let counters = CounterStore::new();
        let config = Config::default();
        let mut profile = Profile::new("alice".into());
        let ip: IpAddr = "198.51.100.5".parse().unwrap();
        let base = Utc::now();

        for day in 0..3 {
            record_and_promote(&mut profile, &counters, &config, ip, base + Duration::days(day));
        }

        assert!(profile.known_networks.contains("198.51.100.0/24"));
    }

    #[test]
    fn repeat_same_day_does_not_double_count() {
        let counters = CounterStore::new();
        let config = Config::default();
        let mut profile = Profile::new("alice".into());
        let ip: IpAddr = "198.51.100.5".parse().unwrap();
        let now = Utc::now();

        record_and_promote(&mut profile, &counters, &config, ip, now);
        record_and_promote(&mut profile, &counters, &config, ip, now + Duration::hours(2));

        assert!(!profile.known_networks.contains("198.51.100.0/24"));
        assert_eq!(counters.distinct_days_in_window(&"alice".to_string(), "198.51.100.0/24", now - Duration::days(30)), 1);
    }

    #[test]
    fn private_ips_are_never_recorded() {
        let counters = CounterStore::new();
        let config = Config::default();
        let mut profile = Profile::new("alice".into());
        let ip: IpAddr = "192.168.1.20".parse().unwrap();
        record_and_promote(&mut profile, &counters, &config, ip, Utc::now());
        assert!(profile.known_networks.is_empty());
    }

    #[test]
    fn decay_removes_stale_prefix() {
        let counters = CounterStore::new();
        let config = Config::default();
        let mut profile = Profile::new("alice".into());
        profile.known_networks.insert("198.51.100.0/24".to_string());
        let stale_time = Utc::now() - Duration::days(100);
        counters.upsert(&profile.user_id, "198.51.100.0/24", stale_time);

        demote_stale(&mut profile, &counters, &config, Utc::now());

        assert!(!profile.known_networks.contains("198.51.100.0/24"));
    }
}
