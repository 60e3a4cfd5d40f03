//! Randomized checks for the invariants enumerated in the decision
//! pipeline's testable-properties list: the safety validator's approval
//! guarantee (1) and idempotence law, the circuit breaker's open/closed
//! gate (4), and the semantic cache's hit guarantee (5).

use cortex::cache::{CacheConfig, SemanticCache};
use cortex::dispatch::EngineBreaker;
use cortex::model::{Action, Candidate, Constraints, Observation};
use cortex::safety::validate;
use proptest::prelude::*;
use std::time::Duration;

fn obs(speed: f64, temp: f64, pressure: f64) -> Observation {
    Observation {
        timestamp_us: 0,
        unix_us: Some(0),
        cycle_count: 0,
        safety_state: "nominal".to_string(),
        motor_speed_rpm: speed,
        motor_temp_c: temp,
        pressure_bar: pressure,
        cycle_jitter_us: 0,
    }
}

fn candidate(target: f64, confidence: f64) -> Candidate {
    Candidate {
        action: Action::AdjustSetpoint,
        target_speed_rpm: target,
        confidence,
        reasoning: "property test".to_string(),
    }
}

fn constraints(min: f64, max: f64, max_rate: f64, max_temp: f64) -> Constraints {
    Constraints {
        min_speed_rpm: min,
        max_speed_rpm: max,
        max_rate_rpm: max_rate,
        max_temp_c: max_temp,
        staleness_us: 250_000,
    }
}

proptest! {
    /// Invariant 1: every validator output either rejects (target can be
    /// anything, the wire layer nulls it out) or is within bounds, within
    /// slew rate of the observed speed, and finite.
    #[test]
    fn approved_recommendation_is_always_safe(
        min in -1000.0f64..1000.0,
        extra in 0.0f64..5000.0,
        max_rate in 0.0f64..1000.0,
        max_temp in 1.0f64..200.0,
        observed_speed in -2000.0f64..6000.0,
        observed_temp in -50.0f64..199.0,
        target in -10_000.0f64..10_000.0,
        confidence in 0.0f64..1.0,
    ) {
        let max = min + extra;
        let cons = constraints(min, max, max_rate, max_temp);
        let observation = obs(observed_speed, observed_temp, 5.0);
        let result = validate(&candidate(target, confidence), &observation, &cons, true);

        if result.approved {
            prop_assert!(result.target_speed_rpm.is_finite());
            prop_assert!(result.target_speed_rpm >= cons.min_speed_rpm - 1e-9);
            prop_assert!(result.target_speed_rpm <= cons.max_speed_rpm + 1e-9);
            prop_assert!((result.target_speed_rpm - observed_speed).abs() <= max_rate + 1e-9);
        }
    }

    /// Validator idempotence law: feeding the already-clamped target back
    /// through the validator under the same observation/constraints raises
    /// no violation that concerns the *target* (bounds, rate, finiteness).
    /// The temperature interlock is a property of the observation, not the
    /// target, so it is expected to recur identically rather than vanish.
    #[test]
    fn validator_is_idempotent_on_target_derived_violations(
        min in -1000.0f64..1000.0,
        extra in 0.0f64..5000.0,
        max_rate in 0.0f64..1000.0,
        max_temp in 1.0f64..200.0,
        observed_speed in -2000.0f64..6000.0,
        observed_temp in -50.0f64..199.0,
        target in -10_000.0f64..10_000.0,
    ) {
        let max = min + extra;
        let cons = constraints(min, max, max_rate, max_temp);
        let observation = obs(observed_speed, observed_temp, 5.0);

        let first = validate(&candidate(target, 1.0), &observation, &cons, true);
        let reclamped = candidate(first.target_speed_rpm, 1.0);
        let second = validate(&reclamped, &observation, &cons, true);

        prop_assert!(!second.violations.iter().any(|v| v.contains("outside bounds")));
        prop_assert!(!second.violations.iter().any(|v| v.contains("rate")));
        prop_assert!(!second.violations.iter().any(|v| v.contains("non-finite target")));
        prop_assert_eq!(second.target_speed_rpm, first.target_speed_rpm);
    }

    /// Invariant 4: a breaker with `failures >= threshold` stays open for
    /// the whole cooldown window, never opening early and never staying
    /// closed once the threshold is crossed.
    #[test]
    fn breaker_open_state_tracks_failure_threshold(
        threshold in 1u32..20,
        failures in 0u32..30,
    ) {
        let mut breaker = EngineBreaker::new(threshold, Duration::from_secs(9999));
        for _ in 0..failures {
            breaker.on_failure();
        }
        prop_assert_eq!(breaker.is_open(), failures >= threshold);
    }

    /// A single success resets the failure count, so the breaker can never
    /// be open immediately after `on_success`.
    #[test]
    fn breaker_success_always_closes(
        threshold in 1u32..20,
        failures in 0u32..30,
    ) {
        let mut breaker = EngineBreaker::new(threshold, Duration::from_secs(9999));
        for _ in 0..failures {
            breaker.on_failure();
        }
        breaker.on_success();
        prop_assert!(!breaker.is_open());
        prop_assert_eq!(breaker.failures(), 0);
    }

    /// Invariant 5: whenever the cache returns a stored candidate, the
    /// query observation really is within similarity threshold of the
    /// stored one, constraints matched exactly, and the entry had not
    /// outlived its TTL.
    #[test]
    fn cache_hit_implies_similarity_constraints_and_ttl(
        d_speed in -400.0f64..400.0,
        d_temp in -20.0f64..20.0,
        d_pressure in -3.0f64..3.0,
        age_s in 0.0f64..120.0,
        constraints_match in any::<bool>(),
    ) {
        let cache = SemanticCache::new(CacheConfig { capacity: 10, ttl_s: 60.0, threshold: 0.95 });
        let stored_obs = obs(1500.0, 55.0, 5.0);
        let stored_cons = constraints(0.0, 3000.0, 200.0, 90.0);
        cache.store(&stored_obs, &stored_cons, &candidate(1550.0, 0.9), 0.0);

        let query_obs = obs(1500.0 + d_speed, 55.0 + d_temp, 5.0 + d_pressure);
        let query_cons = if constraints_match {
            stored_cons
        } else {
            let mut c = stored_cons;
            c.max_speed_rpm += 1.0;
            c
        };

        let hit = cache.lookup(&query_obs, &query_cons, age_s);

        if hit.is_some() {
            prop_assert!(constraints_match);
            prop_assert!(age_s < 60.0);

            let ds = d_speed / 5000.0;
            let dt = d_temp / 150.0;
            let dp = d_pressure / 20.0;
            let dist = (ds * ds + dt * dt + dp * dp).sqrt();
            let similarity = (1.0 - dist / 3.0f64.sqrt()).max(0.0);
            prop_assert!(similarity >= 0.95 - 1e-9);
        }
    }
}
