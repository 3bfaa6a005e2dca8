//! [`EquipmentTracker`] – current status map, history rings, liveness sweep.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use navwatch_codec::MonitorByte;
use navwatch_types::EquipmentStatus;
use tracing::{debug, info};

/// Default per-equipment history ring capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default liveness timeout: equipment silent for longer than this is
/// demoted to disconnected by the sweep.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_millis(30_000);

struct EquipmentEntry {
    status: EquipmentStatus,
    /// FIFO ring, oldest at the front.  Every entry was equally "fresh" at
    /// insertion, so eviction is strictly oldest-first, never LRU.
    history: VecDeque<EquipmentStatus>,
}

/// Tracks the live status and bounded history of every piece of equipment.
///
/// Clone it cheaply – all clones share the same underlying state.  Mutation
/// is serialised through one `RwLock`; each operation holds it for
/// sub-microsecond map work only, never across I/O.  Concurrent
/// `record_status` calls for the same id resolve as last-write-wins, which is
/// all the datagram pipeline needs.
#[derive(Clone)]
pub struct EquipmentTracker {
    inner: Arc<RwLock<HashMap<String, EquipmentEntry>>>,
    history_capacity: usize,
}

impl EquipmentTracker {
    /// Create a tracker whose history rings hold `history_capacity` entries.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            history_capacity,
        }
    }

    /// Record a decoded packet for `equipment_id`, replacing any prior
    /// status and appending a history snapshot.  Returns the new status.
    pub fn record_status(
        &self,
        equipment_id: &str,
        decoded: &MonitorByte,
        source_ip: IpAddr,
        source_port: u16,
        listen_port: u16,
    ) -> EquipmentStatus {
        self.record_status_at(
            equipment_id,
            decoded,
            source_ip,
            source_port,
            listen_port,
            Utc::now(),
        )
    }

    /// Clock-injected body of [`record_status`](Self::record_status).
    fn record_status_at(
        &self,
        equipment_id: &str,
        decoded: &MonitorByte,
        source_ip: IpAddr,
        source_port: u16,
        listen_port: u16,
        now: DateTime<Utc>,
    ) -> EquipmentStatus {
        let status = EquipmentStatus {
            equipment_id: equipment_id.to_string(),
            path_state: decoded.path_state,
            severity: decoded.severity,
            last_seen_at: now,
            connected: true,
            source_ip,
            source_port,
            listen_port,
        };

        let mut map = self.inner.write().expect("tracker lock poisoned");
        let entry = map
            .entry(equipment_id.to_string())
            .or_insert_with(|| EquipmentEntry {
                status: status.clone(),
                history: VecDeque::with_capacity(self.history_capacity),
            });

        entry.status = status.clone();
        // Capacity 0 disables the ring entirely; otherwise evict oldest-first
        // so the ring never exceeds its capacity.
        if self.history_capacity > 0 {
            while entry.history.len() >= self.history_capacity {
                entry.history.pop_front();
            }
            entry.history.push_back(status.clone());
        }

        debug!(
            equipment = equipment_id,
            path = ?status.path_state,
            severity = ?status.severity,
            "status recorded"
        );
        status
    }

    /// Current snapshot for `id`, or `None` when the equipment has never
    /// reported.
    pub fn get_status(&self, id: &str) -> Option<EquipmentStatus> {
        let map = self.inner.read().expect("tracker lock poisoned");
        map.get(id).map(|entry| entry.status.clone())
    }

    /// Snapshot of every tracked equipment's current status.
    pub fn all_statuses(&self) -> HashMap<String, EquipmentStatus> {
        let map = self.inner.read().expect("tracker lock poisoned");
        map.iter()
            .map(|(id, entry)| (id.clone(), entry.status.clone()))
            .collect()
    }

    /// Up to `limit` most recent history entries for `id`, newest first.
    /// Empty for unknown ids.
    pub fn history(&self, id: &str, limit: usize) -> Vec<EquipmentStatus> {
        let map = self.inner.read().expect("tracker lock poisoned");
        match map.get(id) {
            Some(entry) => entry.history.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Demote every equipment whose last packet is older than `timeout` to
    /// `connected = false`, returning the ids demoted by this call.
    ///
    /// Only the `connected` flag changes: `last_seen_at`, `path_state`, and
    /// `severity` keep their stale-but-last-known values.
    pub fn sweep_liveness(&self, timeout: Duration) -> Vec<String> {
        self.sweep_liveness_at(timeout, Utc::now())
    }

    /// Clock-injected body of [`sweep_liveness`](Self::sweep_liveness).
    fn sweep_liveness_at(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let mut map = self.inner.write().expect("tracker lock poisoned");
        let mut demoted = Vec::new();

        for (id, entry) in map.iter_mut() {
            if entry.status.connected && now - entry.status.last_seen_at > timeout {
                entry.status.connected = false;
                demoted.push(id.clone());
            }
        }

        if !demoted.is_empty() {
            info!(equipment = ?demoted, "liveness sweep demoted silent equipment");
        }
        demoted
    }

    /// Drop all state for `id`.  Called when the descriptor itself is
    /// removed; a no-op for unknown ids.
    pub fn remove(&self, id: &str) {
        let mut map = self.inner.write().expect("tracker lock poisoned");
        map.remove(id);
    }

    /// Drop every status and history ring.  Test/reset collaborators only.
    pub fn clear(&self) {
        let mut map = self.inner.write().expect("tracker lock poisoned");
        map.clear();
    }

    /// Number of equipment ids currently tracked.
    pub fn len(&self) -> usize {
        self.inner.read().expect("tracker lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a fixed-period background task sweeping liveness every
    /// `period`.  Tolerates zero or many equipment; runs until the returned
    /// handle is aborted or the runtime shuts down.
    pub fn spawn_liveness_sweeper(
        &self,
        period: Duration,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick fires immediately; skip it so a fresh start never
            // sweeps before any equipment had a chance to report.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.sweep_liveness(timeout);
            }
        })
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, by: Duration) {
        let mut map = self.inner.write().expect("tracker lock poisoned");
        if let Some(entry) = map.get_mut(id) {
            entry.status.last_seen_at =
                entry.status.last_seen_at - chrono::Duration::from_std(by).unwrap();
        }
    }
}

impl Default for EquipmentTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navwatch_codec::decode;
    use navwatch_types::{PathState, Severity};
    use std::net::Ipv4Addr;

    const SRC: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

    fn record(tracker: &EquipmentTracker, id: &str, byte: u8) -> EquipmentStatus {
        tracker.record_status(id, &decode(byte).unwrap(), SRC, 40000, 5001)
    }

    #[test]
    fn record_creates_connected_status() {
        let tracker = EquipmentTracker::default();
        let status = record(&tracker, "dme", 0xA8);

        assert!(status.connected);
        assert_eq!(status.path_state, PathState::Active);
        assert_eq!(status.severity, Severity::Warning);
        assert_eq!(tracker.get_status("dme").unwrap(), status);
    }

    #[test]
    fn record_replaces_prior_status() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);
        record(&tracker, "dme", 0x98);

        let status = tracker.get_status("dme").unwrap();
        assert_eq!(status.path_state, PathState::Standby);
        assert_eq!(status.severity, Severity::Fault);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn get_status_unknown_id_is_none() {
        let tracker = EquipmentTracker::default();
        assert!(tracker.get_status("ghost").is_none());
    }

    #[test]
    fn history_is_most_recent_first_and_bounded() {
        let tracker = EquipmentTracker::new(100);
        // 101 records with capacity 100: the very first snapshot is evicted.
        for i in 0..101u8 {
            let byte = if i % 2 == 0 { 0xA0 } else { 0x80 };
            record(&tracker, "dme", byte);
        }

        let history = tracker.history("dme", 100);
        assert_eq!(history.len(), 100);
        // Newest first: the 101st record (i = 100, even, ACTIVE) leads.
        assert_eq!(history[0].path_state, PathState::Active);
        // The oldest remaining entry is the 2nd record (i = 1, STANDBY).
        assert_eq!(history[99].path_state, PathState::Standby);
    }

    #[test]
    fn zero_capacity_disables_the_ring_without_unbounded_growth() {
        let tracker = EquipmentTracker::new(0);
        for _ in 0..50 {
            record(&tracker, "dme", 0xA0);
        }

        // No ring at all, but the current status is still tracked.
        assert!(tracker.history("dme", 100).is_empty());
        assert!(tracker.get_status("dme").unwrap().connected);
    }

    #[test]
    fn capacity_one_ring_holds_exactly_the_latest_entry() {
        let tracker = EquipmentTracker::new(1);
        record(&tracker, "dme", 0xA0);
        record(&tracker, "dme", 0x98);

        let history = tracker.history("dme", 100);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].severity, Severity::Fault);
    }

    #[test]
    fn history_limit_is_honoured() {
        let tracker = EquipmentTracker::default();
        for _ in 0..10 {
            record(&tracker, "gp", 0xA0);
        }
        assert_eq!(tracker.history("gp", 3).len(), 3);
        assert_eq!(tracker.history("gp", 100).len(), 10);
        assert!(tracker.history("ghost", 10).is_empty());
    }

    #[test]
    fn fresh_equipment_survives_sweep() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);

        let demoted = tracker.sweep_liveness(Duration::from_millis(30_000));
        assert!(demoted.is_empty());
        assert!(tracker.get_status("dme").unwrap().connected);
    }

    #[test]
    fn stale_equipment_is_demoted_preserving_last_known_state() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xB0);
        tracker.backdate("dme", Duration::from_millis(31_000));

        let demoted = tracker.sweep_liveness(Duration::from_millis(30_000));
        assert_eq!(demoted, vec!["dme".to_string()]);

        let status = tracker.get_status("dme").unwrap();
        assert!(!status.connected);
        // Stale-but-last-known state is preserved for the operator.
        assert_eq!(status.path_state, PathState::Active);
        assert_eq!(status.severity, Severity::Alarm);
    }

    #[test]
    fn sweep_reports_each_demotion_once() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);
        tracker.backdate("dme", Duration::from_secs(60));

        assert_eq!(tracker.sweep_liveness(Duration::from_secs(30)).len(), 1);
        // Already disconnected: the second sweep has nothing new to demote.
        assert!(tracker.sweep_liveness(Duration::from_secs(30)).is_empty());
    }

    #[test]
    fn new_packet_reconnects_after_demotion() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);
        tracker.backdate("dme", Duration::from_secs(60));
        tracker.sweep_liveness(Duration::from_secs(30));
        assert!(!tracker.get_status("dme").unwrap().connected);

        record(&tracker, "dme", 0xA0);
        assert!(tracker.get_status("dme").unwrap().connected);
    }

    #[test]
    fn sweep_with_no_equipment_is_a_noop() {
        let tracker = EquipmentTracker::default();
        assert!(tracker.sweep_liveness(Duration::from_secs(30)).is_empty());
    }

    #[test]
    fn remove_and_clear_drop_state() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);
        record(&tracker, "gp", 0xA0);

        tracker.remove("dme");
        assert!(tracker.get_status("dme").is_none());
        assert_eq!(tracker.len(), 1);

        // Removing an unknown id must not panic or error.
        tracker.remove("ghost");

        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.history("gp", 10).is_empty());
    }

    #[test]
    fn all_statuses_snapshots_every_equipment() {
        let tracker = EquipmentTracker::default();
        record(&tracker, "dme", 0xA0);
        record(&tracker, "gp", 0x98);

        let all = tracker.all_statuses();
        assert_eq!(all.len(), 2);
        assert_eq!(all["gp"].severity, Severity::Fault);
    }

    #[test]
    fn concurrent_records_for_different_ids_do_not_interfere() {
        let tracker = EquipmentTracker::default();
        let mut handles = Vec::new();
        for i in 0..8 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                let id = format!("eq-{i}");
                for _ in 0..200 {
                    tracker.record_status(
                        &id,
                        &decode(0xA0).unwrap(),
                        SRC,
                        40000,
                        5000 + i as u16,
                    );
                    tracker.sweep_liveness(Duration::from_secs(30));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.len(), 8);
        for i in 0..8 {
            assert!(tracker.get_status(&format!("eq-{i}")).unwrap().connected);
        }
    }
}
