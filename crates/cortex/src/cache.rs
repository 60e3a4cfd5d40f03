//! Semantic cache (C6): similarity-matched candidate memoization.
//!
//! A linear scan over a small FIFO-bounded set of entries — no hash key,
//! because the whole point is fuzzy matching on nearby observations under
//! identical constraints. Capacity is small (default 100) so the scan cost
//! is irrelevant next to an LLM round-trip.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::model::{Candidate, Constraints, Observation};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_s: f64,
    pub threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 100,
            ttl_s: 60.0,
            threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    observation: Observation,
    constraints: Constraints,
    candidate: Candidate,
    created_at_s: f64,
    hit_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub total_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_lookups as f64
        }
    }
}

struct Inner {
    entries: VecDeque<CacheEntry>,
    stats: CacheStats,
}

/// Thread-safe recommendation cache keyed by observation similarity.
pub struct SemanticCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

const SPEED_RANGE: f64 = 5000.0;
const TEMP_RANGE: f64 = 150.0;
const PRESSURE_RANGE: f64 = 20.0;
const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Euclidean similarity over `(speed, temp, pressure)` normalized to fixed
/// ranges; shared with the adaptive learner's success-weighted ranking.
pub(crate) fn similarity(a: &Observation, b: &Observation) -> f64 {
    let ds = (a.motor_speed_rpm - b.motor_speed_rpm) / SPEED_RANGE;
    let dt = (a.motor_temp_c - b.motor_temp_c) / TEMP_RANGE;
    let dp = (a.pressure_bar - b.pressure_bar) / PRESSURE_RANGE;
    let dist = (ds * ds + dt * dt + dp * dp).sqrt();
    (1.0 - dist / SQRT_3).max(0.0)
}

impl SemanticCache {
    pub fn new(config: CacheConfig) -> Self {
        SemanticCache {
            config,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a candidate for `observation` under `constraints`. `now_s` is
    /// the caller's wall-clock in seconds, passed explicitly so TTL expiry is
    /// deterministic under test.
    pub fn lookup(
        &self,
        observation: &Observation,
        constraints: &Constraints,
        now_s: f64,
    ) -> Option<Candidate> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.stats.total_lookups += 1;

        inner
            .entries
            .retain(|e| now_s - e.created_at_s <= self.config.ttl_s);

        let threshold = self.config.threshold;
        let best = inner
            .entries
            .iter_mut()
            .filter(|e| e.constraints.matches(constraints))
            .map(|e| (similarity(observation, &e.observation), e))
            .filter(|(sim, _)| *sim >= threshold)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((_, entry)) => {
                entry.hit_count += 1;
                inner.stats.cache_hits += 1;
                Some(entry.candidate.clone())
            }
            None => {
                inner.stats.cache_misses += 1;
                None
            }
        }
    }

    /// Store a freshly produced candidate, evicting the oldest entry (FIFO)
    /// if the cache is at capacity.
    pub fn store(
        &self,
        observation: &Observation,
        constraints: &Constraints,
        candidate: &Candidate,
        now_s: f64,
    ) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.entries.len() >= self.config.capacity {
            inner.entries.pop_front();
            inner.stats.evictions += 1;
        }
        inner.entries.push_back(CacheEntry {
            observation: observation.clone(),
            constraints: *constraints,
            candidate: candidate.clone(),
            created_at_s: now_s,
            hit_count: 0,
        });
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache lock poisoned").stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    fn obs(speed: f64, temp: f64, pressure: f64) -> Observation {
        Observation {
            timestamp_us: 0,
            unix_us: Some(0),
            cycle_count: 0,
            safety_state: "nominal".into(),
            motor_speed_rpm: speed,
            motor_temp_c: temp,
            pressure_bar: pressure,
            cycle_jitter_us: 0,
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            min_speed_rpm: 0.0,
            max_speed_rpm: 3000.0,
            max_rate_rpm: 200.0,
            max_temp_c: 90.0,
            staleness_us: 250_000,
        }
    }

    fn candidate() -> Candidate {
        Candidate {
            action: Action::AdjustSetpoint,
            target_speed_rpm: 1550.0,
            confidence: 0.9,
            reasoning: "cached".into(),
        }
    }

    /// Scenario (d): similarity hit.
    #[test]
    fn similar_observation_hits_cache() {
        let cache = SemanticCache::new(CacheConfig {
            threshold: 0.9,
            ..CacheConfig::default()
        });
        cache.store(&obs(1500.0, 55.0, 5.0), &constraints(), &candidate(), 0.0);

        let hit = cache.lookup(&obs(1510.0, 56.0, 5.1), &constraints(), 1.0);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().target_speed_rpm, 1550.0);

        let stats = cache.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 0);
    }

    /// Scenario (e): TTL expiry.
    #[test]
    fn expired_entry_is_a_miss() {
        let cache = SemanticCache::new(CacheConfig {
            ttl_s: 0.1,
            ..CacheConfig::default()
        });
        cache.store(&obs(1500.0, 55.0, 5.0), &constraints(), &candidate(), 0.0);
        let hit = cache.lookup(&obs(1500.0, 55.0, 5.0), &constraints(), 0.15);
        assert!(hit.is_none());
    }

    #[test]
    fn mismatched_constraints_never_hit() {
        let cache = SemanticCache::new(CacheConfig::default());
        cache.store(&obs(1500.0, 55.0, 5.0), &constraints(), &candidate(), 0.0);
        let mut other = constraints();
        other.max_speed_rpm = 2000.0;
        let hit = cache.lookup(&obs(1500.0, 55.0, 5.0), &other, 1.0);
        assert!(hit.is_none());
    }

    #[test]
    fn fifo_eviction_at_capacity() {
        let cache = SemanticCache::new(CacheConfig {
            capacity: 2,
            threshold: 0.0,
            ..CacheConfig::default()
        });
        cache.store(&obs(0.0, 20.0, 1.0), &constraints(), &candidate(), 0.0);
        cache.store(&obs(100.0, 20.0, 1.0), &constraints(), &candidate(), 1.0);
        cache.store(&obs(200.0, 20.0, 1.0), &constraints(), &candidate(), 2.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn dissimilar_observation_misses() {
        let cache = SemanticCache::new(CacheConfig::default());
        cache.store(&obs(500.0, 30.0, 2.0), &constraints(), &candidate(), 0.0);
        let hit = cache.lookup(&obs(4000.0, 140.0, 19.0), &constraints(), 1.0);
        assert!(hit.is_none());
        assert_eq!(cache.stats().cache_misses, 1);
    }
}
