//! ---
//! ring_section: "03-store"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Persistence abstractions for the registry."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{Result, Store};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

/// In-memory store with lazy TTL expiry.
///
/// Expired entries are dropped on the read path rather than by a background
/// sweeper; callers never observe a value past its TTL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.live(now));
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.prune();
        let entries = self.entries.read();
        let mut matched: Vec<(String, String)> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matched)
    }

    async fn set_many(&self, entries: Vec<(String, String, Option<Duration>)>) -> Result<()> {
        let now = Instant::now();
        let mut map = self.entries.write();
        for (key, value, ttl) in entries {
            map.insert(
                key,
                Entry {
                    value,
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_your_writes() {
        let store = MemoryStore::new();
        store.set("netring:member:a", "1".into(), None).await.unwrap();
        assert_eq!(store.get("netring:member:a").await.unwrap(), Some("1".into()));
        store.delete("netring:member:a").await.unwrap();
        assert_eq!(store.get("netring:member:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_values() {
        let store = MemoryStore::new();
        store
            .set("k", "v".into(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".into()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_filters_by_prefix_and_sorts() {
        let store = MemoryStore::new();
        store
            .set_many(vec![
                ("netring:member:b".into(), "2".into(), None),
                ("netring:member:a".into(), "1".into(), None),
                ("netring:metrics:a".into(), "m".into(), None),
            ])
            .await
            .unwrap();
        let members = store.scan("netring:member:").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "netring:member:a");
        assert_eq!(members[1].0, "netring:member:b");
    }
}
