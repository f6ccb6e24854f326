//! Per-shard statistics counters

use serde::{Deserialize, Serialize};

/// Hit/miss/eviction counters.
///
/// Counters are kept per shard (one JSON document under the shard lock)
/// to avoid global contention; `--show-stats` sums them across shards
/// and `--clear` resets them. Event constructors build single-event
/// deltas that are merged into the shard's document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(default)]
    pub direct_hits: u64,
    #[serde(default)]
    pub direct_misses: u64,
    #[serde(default)]
    pub local_hits: u64,
    #[serde(default)]
    pub remote_hits: u64,
    #[serde(default)]
    pub remote_misses: u64,
    #[serde(default)]
    pub evictions: u64,
}

impl CacheStats {
    pub fn direct_hit() -> Self {
        Self {
            direct_hits: 1,
            ..Self::default()
        }
    }

    pub fn direct_miss() -> Self {
        Self {
            direct_misses: 1,
            ..Self::default()
        }
    }

    pub fn local_hit() -> Self {
        Self {
            local_hits: 1,
            ..Self::default()
        }
    }

    pub fn remote_hit() -> Self {
        Self {
            remote_hits: 1,
            ..Self::default()
        }
    }

    pub fn remote_miss() -> Self {
        Self {
            remote_misses: 1,
            ..Self::default()
        }
    }

    pub fn evicted(count: u64) -> Self {
        Self {
            evictions: count,
            ..Self::default()
        }
    }

    /// Merge another counter set into this one.
    pub fn merge(&mut self, other: &CacheStats) {
        self.direct_hits += other.direct_hits;
        self.direct_misses += other.direct_misses;
        self.local_hits += other.local_hits;
        self.remote_hits += other.remote_hits;
        self.remote_misses += other.remote_misses;
        self.evictions += other.evictions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_constructors_touch_one_counter() {
        assert_eq!(CacheStats::direct_hit().direct_hits, 1);
        assert_eq!(CacheStats::direct_hit().local_hits, 0);
        assert_eq!(CacheStats::remote_miss().remote_misses, 1);
        assert_eq!(CacheStats::evicted(4).evictions, 4);
    }

    #[test]
    fn merge_accumulates() {
        let mut total = CacheStats::default();
        total.merge(&CacheStats::local_hit());
        total.merge(&CacheStats::local_hit());
        total.merge(&CacheStats::direct_miss());
        assert_eq!(total.local_hits, 2);
        assert_eq!(total.direct_misses, 1);
        assert_eq!(total.remote_hits, 0);
    }

    #[test]
    fn serde_tolerates_missing_fields() {
        let stats: CacheStats = serde_json::from_str(r#"{"local_hits": 7}"#).unwrap();
        assert_eq!(stats.local_hits, 7);
        assert_eq!(stats.evictions, 0);

        let json = serde_json::to_string(&CacheStats::remote_hit()).unwrap();
        let back: CacheStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.remote_hits, 1);
    }
}
