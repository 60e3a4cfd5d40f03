use serde::{Deserialize, Serialize};

/// Safety envelope the validator enforces against a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub min_speed_rpm: f64,
    pub max_speed_rpm: f64,
    pub max_rate_rpm: f64,
    pub max_temp_c: f64,
    #[serde(default = "default_staleness_us")]
    pub staleness_us: u64,
}

fn default_staleness_us() -> u64 {
    250_000
}

impl Constraints {
    /// `min <= max`, `max_rate >= 0`, `max_temp > 0`.
    pub fn is_valid(&self) -> bool {
        self.min_speed_rpm <= self.max_speed_rpm
            && self.max_rate_rpm >= 0.0
            && self.max_temp_c > 0.0
    }

    /// Exact field-wise equality, used by the semantic cache to gate hits.
    pub fn matches(&self, other: &Constraints) -> bool {
        self.max_speed_rpm == other.max_speed_rpm
            && self.min_speed_rpm == other.min_speed_rpm
            && self.max_rate_rpm == other.max_rate_rpm
            && self.max_temp_c == other.max_temp_c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> Constraints {
        Constraints {
            min_speed_rpm: 0.0,
            max_speed_rpm: 3000.0,
            max_rate_rpm: 50.0,
            max_temp_c: 80.0,
            staleness_us: 250_000,
        }
    }

    #[test]
    fn valid_constraints_pass() {
        assert!(constraints().is_valid());
    }

    #[test]
    fn inverted_bounds_are_invalid() {
        let mut c = constraints();
        c.min_speed_rpm = 4000.0;
        assert!(!c.is_valid());
    }

    #[test]
    fn negative_rate_is_invalid() {
        let mut c = constraints();
        c.max_rate_rpm = -1.0;
        assert!(!c.is_valid());
    }

    #[test]
    fn matches_ignores_staleness() {
        let mut other = constraints();
        other.staleness_us = 999;
        assert!(constraints().matches(&other));
    }
}
