//! ---
//! ring_section: "07-member-agent"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Member agent runtime and probe pipelines."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::{Duration, Instant};

use netring_msg::MemberRecord;
use parking_lot::RwLock;

struct CacheInner {
    peers: HashMap<String, MemberRecord>,
    /// Consecutive refreshes each formerly-known peer has been absent.
    missing: HashMap<String, u32>,
    last_refresh: Option<Instant>,
}

/// Local view of the registry's peer list.
///
/// The cache is replaced wholesale on every successful poll; writers only
/// perform in-memory swaps, so the lock is never held across a suspension
/// point. Peers absent from two successive refreshes are reported back for
/// probe-result eviction.
pub struct PeerCache {
    inner: RwLock<CacheInner>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                peers: HashMap::new(),
                missing: HashMap::new(),
                last_refresh: None,
            }),
        }
    }

    /// Replace the cache with the registry's current list, filtered to
    /// active records other than ourselves. Returns the instance ids whose
    /// probe results should now be dropped.
    pub fn refresh(&self, self_id: &str, records: Vec<MemberRecord>) -> Vec<String> {
        let fresh: HashMap<String, MemberRecord> = records
            .into_iter()
            .filter(|record| record.is_active() && record.instance_id != self_id)
            .map(|record| (record.instance_id.clone(), record))
            .collect();

        let mut inner = self.inner.write();
        let mut evicted = Vec::new();
        let mut missing = HashMap::new();

        let candidates: Vec<String> = inner
            .peers
            .keys()
            .chain(inner.missing.keys())
            .cloned()
            .collect();
        for id in candidates {
            if fresh.contains_key(&id) {
                continue;
            }
            let streak = inner.missing.get(&id).copied().unwrap_or(0) + 1;
            if streak >= 2 {
                evicted.push(id);
            } else {
                missing.insert(id, streak);
            }
        }

        inner.peers = fresh;
        inner.missing = missing;
        inner.last_refresh = Some(Instant::now());
        evicted
    }

    /// Snapshot of the current peers.
    pub fn peers(&self) -> Vec<MemberRecord> {
        let inner = self.inner.read();
        let mut peers: Vec<MemberRecord> = inner.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        peers
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_refresh_age(&self) -> Option<Duration> {
        self.inner.read().last_refresh.map(|at| at.elapsed())
    }
}

impl Default for PeerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netring_msg::MemberStatus;

    fn record(id: &str, status: MemberStatus) -> MemberRecord {
        MemberRecord {
            instance_id: id.into(),
            location: "us1".into(),
            ip: "10.0.0.1".parse().unwrap(),
            port: 9000,
            registered_at: 0,
            last_seen: 0,
            status,
            deregistered_at: None,
        }
    }

    #[test]
    fn filters_self_and_inactive() {
        let cache = PeerCache::new();
        let evicted = cache.refresh(
            "me",
            vec![
                record("me", MemberStatus::Active),
                record("peer-a", MemberStatus::Active),
                record("peer-b", MemberStatus::Deregistered),
            ],
        );
        assert!(evicted.is_empty());
        let peers = cache.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].instance_id, "peer-a");
    }

    #[test]
    fn evicts_after_two_consecutive_misses() {
        let cache = PeerCache::new();
        cache.refresh("me", vec![record("peer-a", MemberStatus::Active)]);

        // first refresh without the peer: retained for one more interval
        let evicted = cache.refresh("me", vec![]);
        assert!(evicted.is_empty());

        let evicted = cache.refresh("me", vec![]);
        assert_eq!(evicted, vec!["peer-a".to_owned()]);

        // the streak is forgotten afterwards
        assert!(cache.refresh("me", vec![]).is_empty());
    }

    #[test]
    fn reappearing_peer_clears_the_streak() {
        let cache = PeerCache::new();
        cache.refresh("me", vec![record("peer-a", MemberStatus::Active)]);
        assert!(cache.refresh("me", vec![]).is_empty());
        assert!(cache
            .refresh("me", vec![record("peer-a", MemberStatus::Active)])
            .is_empty());
        // a new single miss does not evict
        assert!(cache.refresh("me", vec![]).is_empty());
    }
}
