use serde::{Deserialize, Serialize};

/// The kind of action an engine is proposing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AdjustSetpoint,
    Hold,
    Fallback,
    Review,
}

/// An engine-produced proposal, before safety validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub action: Action,
    pub target_speed_rpm: f64,
    pub confidence: f64,
    pub reasoning: String,
}

impl Candidate {
    pub fn fallback(observed_speed_rpm: f64, reason: impl Into<String>) -> Self {
        Candidate {
            action: Action::Fallback,
            target_speed_rpm: observed_speed_rpm,
            confidence: 0.3,
            reasoning: format!("fallback: {}", reason.into()),
        }
    }

    pub fn hold(current_speed_rpm: f64, reason: impl Into<String>) -> Self {
        Candidate {
            action: Action::Hold,
            target_speed_rpm: current_speed_rpm,
            confidence: 0.8,
            reasoning: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_carries_observed_speed() {
        let c = Candidate::fallback(1500.0, "staleness");
        assert_eq!(c.action, Action::Fallback);
        assert_eq!(c.target_speed_rpm, 1500.0);
        assert_eq!(c.reasoning, "fallback: staleness");
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_string(&Action::AdjustSetpoint).unwrap();
        assert_eq!(json, "\"adjust_setpoint\"");
    }
}
