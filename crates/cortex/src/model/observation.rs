use serde::{Deserialize, Serialize};

/// One sensor reading from the spine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp_us: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unix_us: Option<u64>,
    #[serde(default)]
    pub cycle_count: u64,
    pub safety_state: String,
    pub motor_speed_rpm: f64,
    pub motor_temp_c: f64,
    pub pressure_bar: f64,
    #[serde(default)]
    pub cycle_jitter_us: u64,
}

impl Observation {
    /// True when every numeric field is finite; non-finite observations
    /// degrade straight to fallback rather than reaching an engine.
    pub fn is_usable(&self) -> bool {
        self.motor_speed_rpm.is_finite()
            && self.motor_temp_c.is_finite()
            && self.pressure_bar.is_finite()
    }

    /// Age of this observation relative to `now_unix_us`, or `None` if the
    /// observation carried no wall-clock timestamp.
    pub fn age_us(&self, now_unix_us: u64) -> Option<u64> {
        self.unix_us.map(|t| now_unix_us.saturating_sub(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(speed: f64, temp: f64, pressure: f64) -> Observation {
        Observation {
            timestamp_us: 0,
            unix_us: Some(1_000_000),
            cycle_count: 0,
            safety_state: "nominal".into(),
            motor_speed_rpm: speed,
            motor_temp_c: temp,
            pressure_bar: pressure,
            cycle_jitter_us: 0,
        }
    }

    #[test]
    fn usable_requires_all_finite() {
        assert!(obs(1500.0, 55.0, 5.0).is_usable());
        assert!(!obs(f64::NAN, 55.0, 5.0).is_usable());
        assert!(!obs(1500.0, f64::INFINITY, 5.0).is_usable());
    }

    #[test]
    fn age_is_none_without_unix_clock() {
        let mut o = obs(1500.0, 55.0, 5.0);
        o.unix_us = None;
        assert_eq!(o.age_us(2_000_000), None);
    }

    #[test]
    fn age_saturates_instead_of_underflowing() {
        let o = obs(1500.0, 55.0, 5.0);
        assert_eq!(o.age_us(500_000), Some(0));
    }
}
