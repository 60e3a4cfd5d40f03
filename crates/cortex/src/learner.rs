//! Adaptive learner (C10): buckets past decisions by observed condition and
//! turns historical spine acceptance into a confidence adjustment and a
//! few-shot example feed for the agentic engines.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::LearningConfig;
use crate::error::CortexResult;
use crate::model::Observation;
use crate::store::{DecisionRow, DecisionStore};

const TEMP_BUCKETS: [(f64, f64); 5] = [(0.0, 30.0), (30.0, 50.0), (50.0, 70.0), (70.0, 80.0), (80.0, 150.0)];
const SPEED_BUCKETS: [(f64, f64); 5] = [(0.0, 500.0), (500.0, 1000.0), (1000.0, 2000.0), (2000.0, 2500.0), (2500.0, 3000.0)];

fn bucket_index(value: f64, buckets: &[(f64, f64); 5]) -> Option<usize> {
    buckets.iter().position(|(lo, hi)| value >= *lo && value < *hi)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LearningStats {
    pub total: u64,
    pub successful: u64,
    pub success_rate: f64,
    pub avg_confidence: f64,
}

impl Default for LearningStats {
    fn default() -> Self {
        LearningStats { total: 0, successful: 0, success_rate: 0.0, avg_confidence: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningStatsEntry {
    pub temp_range: (f64, f64),
    pub speed_range: (f64, f64),
    pub stats: LearningStats,
}

#[derive(Debug, Clone)]
pub struct ScoredScenario {
    pub decision: DecisionRow,
    pub observation: Observation,
    pub similarity: f64,
    pub score: f64,
}

struct Inner {
    buckets: Option<Vec<((usize, usize), LearningStats)>>,
    computed_at: Option<Instant>,
}

/// Success-rate buckets over temperature x speed, cached for
/// `config.cache_ttl_s` and invalidated on every recorded outcome.
pub struct AdaptiveLearner {
    config: LearningConfig,
    inner: Mutex<Inner>,
}

impl AdaptiveLearner {
    pub fn new(config: LearningConfig) -> Self {
        AdaptiveLearner { config, inner: Mutex::new(Inner { buckets: None, computed_at: None }) }
    }

    fn decisions_with_observation(&self, store: &DecisionStore) -> CortexResult<Vec<(DecisionRow, Observation)>> {
        let rows = store.query_decisions(None, None, None, false, 50_000, 0)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let obs: Observation = serde_json::from_str(&row.observation_json).ok()?;
                Some((row, obs))
            })
            .collect())
    }

    fn bucket_stats(&self, store: &DecisionStore) -> CortexResult<Vec<((usize, usize), LearningStats)>> {
        {
            let inner = self.inner.lock().expect("learner lock poisoned");
            if let (Some(buckets), Some(at)) = (&inner.buckets, inner.computed_at) {
                if at.elapsed() < Duration::from_secs_f64(self.config.cache_ttl_s.max(0.0)) {
                    return Ok(buckets.clone());
                }
            }
        }

        let decisions = self.decisions_with_observation(store)?;
        let mut totals: std::collections::HashMap<(usize, usize), (u64, u64, f64)> = std::collections::HashMap::new();

        for (row, obs) in &decisions {
            let Some(spine_accepted) = row.spine_accepted else { continue };
            let Some(ti) = bucket_index(obs.motor_temp_c, &TEMP_BUCKETS) else { continue };
            let Some(si) = bucket_index(obs.motor_speed_rpm, &SPEED_BUCKETS) else { continue };
            let entry = totals.entry((ti, si)).or_insert((0, 0, 0.0));
            entry.0 += 1;
            if spine_accepted {
                entry.1 += 1;
            }
            entry.2 += row.confidence;
        }

        let buckets: Vec<((usize, usize), LearningStats)> = totals
            .into_iter()
            .map(|(key, (total, successful, confidence_sum))| {
                let stats = LearningStats {
                    total,
                    successful,
                    success_rate: if total > 0 { successful as f64 / total as f64 } else { 0.0 },
                    avg_confidence: if total > 0 { confidence_sum / total as f64 } else { 0.0 },
                };
                (key, stats)
            })
            .collect();

        let mut inner = self.inner.lock().expect("learner lock poisoned");
        inner.buckets = Some(buckets.clone());
        inner.computed_at = Some(Instant::now());
        Ok(buckets)
    }

    fn stats_for(&self, store: &DecisionStore, obs: &Observation) -> CortexResult<LearningStats> {
        let buckets = self.bucket_stats(store)?;
        let ti = bucket_index(obs.motor_temp_c, &TEMP_BUCKETS);
        let si = bucket_index(obs.motor_speed_rpm, &SPEED_BUCKETS);
        let (Some(ti), Some(si)) = (ti, si) else { return Ok(LearningStats::default()) };
        Ok(buckets
            .into_iter()
            .find(|(key, _)| *key == (ti, si))
            .map(|(_, stats)| stats)
            .unwrap_or_default())
    }

    /// `base * (0.5 + 0.5 * success_rate)` when the bucket has data, else a
    /// conservative flat `base * 0.8`.
    pub fn compute_adjusted_confidence(&self, base: f64, obs: &Observation, store: &DecisionStore) -> f64 {
        match self.stats_for(store, obs) {
            Ok(stats) if stats.total > 0 => base * (0.5 + 0.5 * stats.success_rate),
            _ => base * 0.8,
        }
    }

    fn outcome_score(spine_accepted: Option<bool>) -> f64 {
        match spine_accepted {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => 0.5,
        }
    }

    /// Blend observation similarity with historical outcome:
    /// `score = (1-w)*sim + w*outcome`.
    pub fn get_success_weighted_similar(
        &self,
        obs: &Observation,
        k: usize,
        threshold: f64,
        store: &DecisionStore,
    ) -> CortexResult<Vec<ScoredScenario>> {
        let w = self.config.success_weight;
        let mut scored: Vec<ScoredScenario> = self
            .decisions_with_observation(store)?
            .into_iter()
            .map(|(row, candidate_obs)| {
                let sim = crate::cache::similarity(obs, &candidate_obs);
                let outcome = Self::outcome_score(row.spine_accepted);
                let score = (1.0 - w) * sim + w * outcome;
                ScoredScenario { decision: row, observation: candidate_obs, similarity: sim, score }
            })
            .filter(|s| s.similarity >= threshold)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Top-n accepted scenarios at or above `min_confidence`, for use as
    /// few-shot examples in an agentic prompt.
    pub fn get_few_shot_examples(
        &self,
        obs: &Observation,
        n: usize,
        min_confidence: f64,
        store: &DecisionStore,
    ) -> CortexResult<Vec<ScoredScenario>> {
        let candidates = self.get_success_weighted_similar(obs, n.max(20), 0.0, store)?;
        let mut examples: Vec<ScoredScenario> = candidates
            .into_iter()
            .filter(|s| s.decision.spine_accepted == Some(true) && s.decision.confidence >= min_confidence)
            .collect();
        examples.truncate(n);
        Ok(examples)
    }

    /// Coarse `low`/`medium`/`high` range names map onto groups of the fixed
    /// buckets above; non-empty buckets only.
    pub fn get_learning_stats(
        &self,
        temp_range: Option<&str>,
        speed_range: Option<&str>,
        store: &DecisionStore,
    ) -> CortexResult<Vec<LearningStatsEntry>> {
        let temp_indices = coarse_range_indices(temp_range, TEMP_BUCKETS.len());
        let speed_indices = coarse_range_indices(speed_range, SPEED_BUCKETS.len());

        Ok(self
            .bucket_stats(store)?
            .into_iter()
            .filter(|((ti, si), stats)| stats.total > 0 && temp_indices.contains(ti) && speed_indices.contains(si))
            .map(|((ti, si), stats)| LearningStatsEntry { temp_range: TEMP_BUCKETS[ti], speed_range: SPEED_BUCKETS[si], stats })
            .collect())
    }

    /// Persist spine feedback and invalidate the cached bucket stats.
    pub fn record_outcome(
        &self,
        store: &DecisionStore,
        trace_id: &str,
        accepted: bool,
        actual_speed_rpm: Option<f64>,
    ) -> CortexResult<bool> {
        let updated = store.record_feedback(&crate::model::OutcomeFeedback {
            trace_id: trace_id.to_string(),
            spine_accepted: accepted,
            actual_speed_rpm,
            outcome_timestamp_us: None,
            notes: None,
        })?;
        self.inner.lock().expect("learner lock poisoned").buckets = None;
        Ok(updated)
    }
}

/// `low`/`medium`/`high` map onto thirds of the five fixed buckets; any
/// other name (or `None`) means "all buckets".
fn coarse_range_indices(name: Option<&str>, bucket_count: usize) -> Vec<usize> {
    match name {
        Some("low") => (0..bucket_count).take(2).collect(),
        Some("medium") => (0..bucket_count).skip(1).take(bucket_count.saturating_sub(2).max(1)).collect(),
        Some("high") => (0..bucket_count).skip(bucket_count.saturating_sub(2)).collect(),
        _ => (0..bucket_count).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Candidate, Constraints, DecisionRecord};

    fn obs(speed: f64, temp: f64) -> Observation {
        Observation {
            timestamp_us: 0,
            unix_us: Some(0),
            cycle_count: 0,
            safety_state: "nominal".into(),
            motor_speed_rpm: speed,
            motor_temp_c: temp,
            pressure_bar: 5.0,
            cycle_jitter_us: 0,
        }
    }

    fn seed(store: &DecisionStore, trace_id: &str, speed: f64, temp: f64, accepted: bool) {
        store
            .record_decision(&DecisionRecord {
                trace_id: trace_id.into(),
                timestamp_unix_us: 0,
                observation: obs(speed, temp),
                candidate: Candidate { action: Action::AdjustSetpoint, target_speed_rpm: speed, confidence: 0.9, reasoning: "t".into() },
                constraints: Constraints { min_speed_rpm: 0.0, max_speed_rpm: 3000.0, max_rate_rpm: 200.0, max_temp_c: 90.0, staleness_us: 250_000 },
                engine: "baseline".into(),
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                approved: true,
                violations: vec![],
                warnings: vec![],
                tool_traces: vec![],
                spine_accepted: None,
                actual_speed_rpm: None,
                outcome_timestamp_us: None,
                outcome_notes: None,
            })
            .unwrap();
        store
            .record_feedback(&crate::model::OutcomeFeedback {
                trace_id: trace_id.into(),
                spine_accepted: accepted,
                actual_speed_rpm: Some(speed),
                outcome_timestamp_us: Some(1),
                notes: None,
            })
            .unwrap();
    }

    #[test]
    fn adjusted_confidence_is_conservative_without_data() {
        let store = DecisionStore::open_in_memory(1000).unwrap();
        let learner = AdaptiveLearner::new(LearningConfig { enabled: true, success_weight: 0.3, few_shot_count: 5, min_confidence: 0.7, cache_ttl_s: 60.0 });
        let adjusted = learner.compute_adjusted_confidence(1.0, &obs(1500.0, 55.0), &store);
        assert_eq!(adjusted, 0.8);
    }

    #[test]
    fn adjusted_confidence_uses_bucket_success_rate() {
        let store = DecisionStore::open_in_memory(1000).unwrap();
        let learner = AdaptiveLearner::new(LearningConfig { enabled: true, success_weight: 0.3, few_shot_count: 5, min_confidence: 0.7, cache_ttl_s: 60.0 });
        for i in 0..10 {
            seed(&store, &format!("t{i}"), 1500.0, 55.0, i < 8);
        }
        let adjusted = learner.compute_adjusted_confidence(1.0, &obs(1510.0, 56.0), &store);
        assert!((adjusted - (0.5 + 0.5 * 0.8)).abs() < 1e-9);
    }

    #[test]
    fn few_shot_examples_only_include_accepted() {
        let store = DecisionStore::open_in_memory(1000).unwrap();
        let learner = AdaptiveLearner::new(LearningConfig { enabled: true, success_weight: 0.3, few_shot_count: 5, min_confidence: 0.5, cache_ttl_s: 60.0 });
        seed(&store, "accepted", 1500.0, 55.0, true);
        seed(&store, "rejected", 1500.0, 55.0, false);
        let examples = learner.get_few_shot_examples(&obs(1500.0, 55.0), 5, 0.5, &store).unwrap();
        assert!(examples.iter().all(|e| e.decision.spine_accepted == Some(true)));
        assert!(!examples.is_empty());
    }

    #[test]
    fn record_outcome_invalidates_cache() {
        let store = DecisionStore::open_in_memory(1000).unwrap();
        let learner = AdaptiveLearner::new(LearningConfig { enabled: true, success_weight: 0.3, few_shot_count: 5, min_confidence: 0.7, cache_ttl_s: 60.0 });
        seed(&store, "t0", 1500.0, 55.0, true);
        let _ = learner.compute_adjusted_confidence(1.0, &obs(1500.0, 55.0), &store);
        assert!(learner.record_outcome(&store, "t0", false, None).unwrap());
        assert!(learner.inner.lock().unwrap().buckets.is_none());
    }
}
