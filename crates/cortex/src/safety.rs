//! Deterministic safety validator (C3).
//!
//! Pure function: no I/O, no locks. Runs the same way whether invoked from
//! the baseline engine, the LLM single-shot path, or the workflow graph's
//! `validate` node.

use crate::model::{Candidate, Constraints, Observation, Recommendation};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub approved: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub target_speed_rpm: f64,
}

/// Run the five-step algorithm from the spec, in order, against a working
/// copy of the candidate's target.
///
/// `rate_limit_is_violation` is the knob called for in §9: a rate breach is
/// recorded as a `violations` entry (the default, matching the deterministic
/// validator's own call path) when true, or downgraded to a `warnings` entry
/// — which does not affect `approved` — when false.
pub fn validate(
    candidate: &Candidate,
    observation: &Observation,
    constraints: &Constraints,
    rate_limit_is_violation: bool,
) -> ValidationResult {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();
    let mut target = candidate.target_speed_rpm;

    // 1. Non-finite target.
    if !target.is_finite() {
        violations.push("non-finite target".to_string());
        target = 0.0;
    }

    // 2. Non-finite observation.
    if !observation.motor_speed_rpm.is_finite() || !observation.motor_temp_c.is_finite() {
        violations.push("non-finite observation".to_string());
    }

    // 3. Bounds clamp.
    if target < constraints.min_speed_rpm || target > constraints.max_speed_rpm {
        violations.push(format!(
            "target {target} outside bounds [{}, {}]",
            constraints.min_speed_rpm, constraints.max_speed_rpm
        ));
        target = target.clamp(constraints.min_speed_rpm, constraints.max_speed_rpm);
    }

    // 4. Rate clamp. Always clamped; whether the breach counts against
    // `approved` is the `rate_limit_is_violation` knob.
    let delta = target - observation.motor_speed_rpm;
    if delta.abs() > constraints.max_rate_rpm {
        let message = format!("rate {delta:.3} exceeds max {}", constraints.max_rate_rpm);
        if rate_limit_is_violation {
            violations.push(message);
        } else {
            warnings.push(message);
        }
        let bounded_delta = delta.signum() * constraints.max_rate_rpm;
        target = observation.motor_speed_rpm + bounded_delta;
    }

    // 5. Temperature interlock — does not further modify target.
    if observation.motor_temp_c > constraints.max_temp_c {
        violations.push(format!(
            "temp {} exceeds max {}",
            observation.motor_temp_c, constraints.max_temp_c
        ));
    }

    let approved = violations.is_empty();
    ValidationResult {
        approved,
        violations,
        warnings,
        target_speed_rpm: target,
    }
}

/// Run the validator and assemble the post-validation `Recommendation`.
pub fn validate_into_recommendation(
    candidate: &Candidate,
    observation: &Observation,
    constraints: &Constraints,
    rate_limit_is_violation: bool,
    trace_id: impl Into<String>,
) -> Recommendation {
    let result = validate(candidate, observation, constraints, rate_limit_is_violation);
    let mut candidate = candidate.clone();
    candidate.target_speed_rpm = result.target_speed_rpm;
    Recommendation {
        candidate,
        approved: result.approved,
        violations: result.violations,
        warnings: result.warnings,
        trace_id: trace_id.into(),
    }
}
