use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

/// A candidate after the deterministic validator has had its say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub approved: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub trace_id: String,
}

impl Recommendation {
    /// Invariant checked by callers and by the property tests: an approved
    /// recommendation must be within bounds, within slew rate, and finite.
    pub fn is_internally_consistent(
        &self,
        min: f64,
        max: f64,
        observed_speed: f64,
        max_rate: f64,
    ) -> bool {
        if !self.approved {
            return true;
        }
        let t = self.candidate.target_speed_rpm;
        t.is_finite()
            && t >= min
            && t <= max
            && (t - observed_speed).abs() <= max_rate
    }
}
