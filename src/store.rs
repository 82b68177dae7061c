//! Persistence boundaries (§6): trait contracts this crate needs from its
//! collaborators, plus `dashmap`-backed in-memory implementations of each so
//! the orchestrator and tests run without a real Postgres/Mongo/Redis.

use std::future::Future;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::RiskResult;
use crate::profile::{Profile, UserId};

/// Behaviour-profile persistence (C3's collaborator).
pub trait ProfileStore: Send + Sync {
    fn get(&self, user_id: &UserId) -> impl Future<Output = RiskResult<Option<Profile>>> + Send;
    fn upsert(&self, profile: Profile) -> impl Future<Output = RiskResult<()>> + Send;
}

/// In-memory `ProfileStore` reference implementation.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<UserId, Profile>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: &UserId) -> RiskResult<Option<Profile>> {
        Ok(self.profiles.get(user_id).map(|e| e.value().clone()))
    }

    async fn upsert(&self, profile: Profile) -> RiskResult<()> {
        self.profiles.insert(profile.user_id.clone(), profile);
        Ok(())
    }
}

/// Session-state persistence (C6's collaborator). `hset`/`hgetall` names
/// mirror a Redis-hash-backed production implementation; the reference store
/// below keeps the same shape with a plain struct instead of a field map.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub user_id: UserId,
    pub risk_level: crate::risk::RiskLevel,
    pub risk_score: i64,
    pub updated_at: DateTime<Utc>,
    pub reason: Option<String>,
}

pub trait SessionStore: Send + Sync {
    fn hset(&self, session_id: &str, state: SessionState, ttl_seconds: i64) -> impl Future<Output = RiskResult<()>> + Send;
    fn hgetall(&self, session_id: &str) -> impl Future<Output = RiskResult<Option<SessionState>>> + Send;
}

struct SessionRow {
    state: SessionState,
    expires_at: DateTime<Utc>,
}

/// In-memory `SessionStore` reference implementation with lazy TTL sweeping:
/// a row past its `expires_at` is treated as absent on read, and an explicit
/// `sweep_expired` lets a background task reclaim the memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionRow>,
}

impl std::fmt::Debug for SessionRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRow").field("expires_at", &self.expires_at).finish()
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every row whose TTL has lapsed. Call periodically from a
    /// background task; never required for correctness since reads already
    /// treat an expired row as absent.
    pub fn sweep_expired(&self, now: DateTime<Utc>) {
        self.sessions.retain(|_, row| row.expires_at > now);
    }
}

impl SessionStore for InMemorySessionStore {
    async fn hset(&self, session_id: &str, state: SessionState, ttl_seconds: i64) -> RiskResult<()> {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds);
        self.sessions.insert(session_id.to_string(), SessionRow { state, expires_at });
        Ok(())
    }

    async fn hgetall(&self, session_id: &str) -> RiskResult<Option<SessionState>> {
        match self.sessions.get(session_id) {
            Some(row) if row.expires_at > Utc::now() => Ok(Some(row.state.clone())),
            _ => Ok(None),
        }
    }
}

/// Re-exported from `network` so callers reach the distinct-day counter
/// through the same `store` module as the rest of the persistence surface.
pub use crate::network::CounterStore;

/// One raw geo observation, compacted by the background tile aggregator (§5).
#[derive(Debug, Clone)]
pub struct GeoEvent {
    pub user_id: UserId,
    pub lat: f64,
    pub lon: f64,
    pub accuracy: Option<f64>,
    pub ts: DateTime<Utc>,
}

pub trait GeoStore: Send + Sync {
    fn insert(&self, event: GeoEvent) -> impl Future<Output = RiskResult<()>> + Send;
    fn delete_older_than(&self, user_id: &UserId, cutoff: DateTime<Utc>) -> impl Future<Output = RiskResult<()>> + Send;
}

/// In-memory `GeoStore` reference implementation, one append-only `Vec` per user.
#[derive(Debug, Default)]
pub struct InMemoryGeoStore {
    events: DashMap<UserId, Vec<GeoEvent>>,
}

impl InMemoryGeoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeoStore for InMemoryGeoStore {
    async fn insert(&self, event: GeoEvent) -> RiskResult<()> {
        self.events.entry(event.user_id.clone()).or_default().push(event);
        Ok(())
    }

    async fn delete_older_than(&self, user_id: &UserId, cutoff: DateTime<Utc>) -> RiskResult<()> {
        if let Some(mut events) = self.events.get_mut(user_id) {
            events.retain(|e| e.ts >= cutoff);
        }
        Ok(())
    }
}

/// An aggregated geo tile: `(user_id, tile_lat, tile_lon)` with an observation
/// count and average accuracy (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTile {
    pub user_id: UserId,
    pub tile_lat: i64,
    pub tile_lon: i64,
    pub count: u32,
    pub avg_accuracy: Option<f64>,
}

/// Round a coordinate to 3 decimal places and return it as a fixed-point
/// integer (lat/lon × 1000), so tiles with near-identical floats bucket together.
fn tile_coord(v: f64) -> i64 {
    (v * 1000.0).round() as i64
}

/// Compact every raw event in `store` into `(user_id, tile_lat, tile_lon)`
/// tiles (§3, §5). Does not mutate `store`; retention enforcement is the
/// caller's job via [`InMemoryGeoStore::delete_older_than`] afterward.
pub fn compact_tiles(store: &InMemoryGeoStore) -> Vec<GeoTile> {
    let mut tiles: std::collections::HashMap<(UserId, i64, i64), (u32, f64)> = std::collections::HashMap::new();

    for entry in store.events.iter() {
        for event in entry.value() {
            let key = (event.user_id.clone(), tile_coord(event.lat), tile_coord(event.lon));
            let slot = tiles.entry(key).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += event.accuracy.unwrap_or(0.0);
        }
    }

    tiles
        .into_iter()
        .map(|((user_id, tile_lat, tile_lon), (count, accuracy_sum))| GeoTile {
            user_id,
            tile_lat,
            tile_lon,
            count,
            avg_accuracy: if count > 0 { Some(accuracy_sum / count as f64) } else { None },
        })
        .collect()
}

/// Alert event kinds the orchestrator emits (§4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    FailedLogin,
    HighRiskLogin,
    MediumRiskLogin,
    SuccessfulLogin,
    FailedAdditionalVerification,
    HighRiskTransaction,
    MediumRiskTransaction,
    ManualOverride,
}

/// Fire-and-forget alert dispatch (§6). Implementations must not block the
/// caller on a slow downstream (email/SMS/pager); the reference
/// implementation simply buffers in memory for a background dispatcher to drain.
pub trait AlertSink: Send + Sync {
    fn emit(&self, event: AlertEvent, user_id: &UserId, detail: String) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub event: AlertEvent,
    pub user_id: UserId,
    pub detail: String,
    pub ts: DateTime<Utc>,
}

/// In-memory `AlertSink` reference implementation: an unbounded in-process
/// queue a periodic dispatcher task can drain with `drain()`.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    queue: DashMap<u64, AlertRecord>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued alert, in insertion order.
    pub fn drain(&self) -> Vec<AlertRecord> {
        let mut ids: Vec<u64> = self.queue.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.queue.remove(&id).map(|(_, v)| v)).collect()
    }
}

impl AlertSink for InMemoryAlertSink {
    async fn emit(&self, event: AlertEvent, user_id: &UserId, detail: String) {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.queue.insert(id, AlertRecord { event, user_id: user_id.clone(), detail, ts: Utc::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn profile_store_round_trips() {
        let store = InMemoryProfileStore::new();
        let profile = Profile::new("alice".to_string());
        store.upsert(profile.clone()).await.unwrap();
        let loaded = store.get(&"alice".to_string()).await.unwrap();
        assert_eq!(loaded.unwrap().user_id, "alice");
    }

    #[tokio::test]
    async fn session_store_expires_rows() {
        let store = InMemorySessionStore::new();
        let state = SessionState {
            user_id: "alice".to_string(),
            risk_level: crate::risk::RiskLevel::Low,
            risk_score: 0,
            updated_at: Utc::now(),
            reason: None,
        };
        store.hset("sess-1", state, -1).await.unwrap();
        assert!(store.hgetall("sess-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn alert_sink_drains_in_order() {
        let sink = InMemoryAlertSink::new();
        sink.emit(AlertEvent::FailedLogin, &"alice".to_string(), "bad password".to_string()).await;
        sink.emit(AlertEvent::HighRiskLogin, &"alice".to_string(), "impossible travel".to_string()).await;
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].event, AlertEvent::FailedLogin);
    }

    #[tokio::test]
    async fn compact_tiles_groups_nearby_events() {
        let store = InMemoryGeoStore::new();
        let user_id = "alice".to_string();
        store.insert(GeoEvent { user_id: user_id.clone(), lat: 40.71280, lon: -74.00600, accuracy: Some(20.0), ts: Utc::now() }).await.unwrap();
        store.insert(GeoEvent { user_id: user_id.clone(), lat: 40.71281, lon: -74.00601, accuracy: Some(10.0), ts: Utc::now() }).await.unwrap();
        store.insert(GeoEvent { user_id, lat: 34.05220, lon: -118.24370, accuracy: Some(30.0), ts: Utc::now() }).await.unwrap();

        let tiles = compact_tiles(&store);
        assert_eq!(tiles.len(), 2);
        let ny_tile = tiles.iter().find(|t| t.tile_lat == 40713).unwrap();
        assert_eq!(ny_tile.count, 2);
        assert_eq!(ny_tile.avg_accuracy, Some(15.0));
    }
}
