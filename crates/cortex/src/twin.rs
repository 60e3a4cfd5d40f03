//! Digital-twin adapter (C16, ambient): an HTTP client for the external
//! industrial-asset registry, queried as an opaque property oracle.
//!
//! Outages degrade to the constraints-derived fallback in `get_property` —
//! a twin failure never fails a cycle, it only loses a nameplate property.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::TwinConfig;
use crate::error::{CortexError, CortexResult};
use crate::model::Constraints;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinProperty {
    MaxSpeedRpm,
    MinSpeedRpm,
    MaxTemperatureC,
    MaxRateChangeRpm,
    SafetyIntegrityLevel,
    ManufacturerName,
    SerialNumber,
}

impl TwinProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwinProperty::MaxSpeedRpm => "MaxSpeedRPM",
            TwinProperty::MinSpeedRpm => "MinSpeedRPM",
            TwinProperty::MaxTemperatureC => "MaxTemperatureC",
            TwinProperty::MaxRateChangeRpm => "MaxRateChangeRPM",
            TwinProperty::SafetyIntegrityLevel => "SafetyIntegrityLevel",
            TwinProperty::ManufacturerName => "ManufacturerName",
            TwinProperty::SerialNumber => "SerialNumber",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MaxSpeedRPM" => Some(TwinProperty::MaxSpeedRpm),
            "MinSpeedRPM" => Some(TwinProperty::MinSpeedRpm),
            "MaxTemperatureC" => Some(TwinProperty::MaxTemperatureC),
            "MaxRateChangeRPM" => Some(TwinProperty::MaxRateChangeRpm),
            "SafetyIntegrityLevel" => Some(TwinProperty::SafetyIntegrityLevel),
            "ManufacturerName" => Some(TwinProperty::ManufacturerName),
            "SerialNumber" => Some(TwinProperty::SerialNumber),
            _ => None,
        }
    }

    /// Constraints-derived default used when neither the cache nor the
    /// remote registry can answer.
    fn constraints_fallback(&self, constraints: &Constraints) -> Value {
        match self {
            TwinProperty::MaxSpeedRpm => serde_json::json!(constraints.max_speed_rpm),
            TwinProperty::MinSpeedRpm => serde_json::json!(constraints.min_speed_rpm),
            TwinProperty::MaxTemperatureC => serde_json::json!(constraints.max_temp_c),
            TwinProperty::MaxRateChangeRpm => serde_json::json!(constraints.max_rate_rpm),
            TwinProperty::SafetyIntegrityLevel => serde_json::json!("unknown"),
            TwinProperty::ManufacturerName => serde_json::json!("unknown"),
            TwinProperty::SerialNumber => serde_json::json!("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySource {
    DigitalTwin,
    DigitalTwinCached,
    ConstraintsFallback,
}

struct Inner {
    cache: HashMap<&'static str, (Value, Instant)>,
    ensured: bool,
}

pub struct TwinAdapter {
    client: reqwest::Client,
    config: TwinConfig,
    inner: Mutex<Inner>,
}

impl TwinAdapter {
    pub fn new(config: TwinConfig) -> CortexResult<Self> {
        if config.base_url.is_none() {
            return Err(CortexError::ConfigError("twin adapter requires CORTEX_TWIN_URL".into()));
        }
        Ok(TwinAdapter {
            client: reqwest::Client::new(),
            config,
            inner: Mutex::new(Inner { cache: HashMap::new(), ensured: false }),
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or_default()
    }

    /// Idempotent: ensures the AAS + submodels exist on the registry.
    /// Called once, lazily, before the first update.
    pub async fn ensure_models(&self) -> CortexResult<()> {
        {
            let inner = self.inner.lock().expect("twin adapter lock poisoned");
            if inner.ensured {
                return Ok(());
            }
        }
        let url = format!("{}/shells/{}", self.base_url(), self.config.aas_id);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| CortexError::TransientEngine(format!("twin ensure_models: {e}")))?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(CortexError::TransientEngine(format!(
                "twin ensure_models returned {}",
                response.status()
            )));
        }
        self.inner.lock().expect("twin adapter lock poisoned").ensured = true;
        Ok(())
    }

    pub async fn update_operational(&self, safety_state: &str, cycle_count: u64, is_healthy: bool) -> CortexResult<()> {
        let url = format!("{}/shells/{}/submodels/operational", self.base_url(), self.config.aas_id);
        let body = serde_json::json!({
            "safetyState": safety_state,
            "cycleCount": cycle_count,
            "isHealthy": is_healthy,
        });
        self.put(&url, &body).await
    }

    pub async fn update_recommendation(&self, target_speed_rpm: Option<f64>, confidence: f64, reasoning_hash: &str) -> CortexResult<()> {
        let url = format!("{}/shells/{}/submodels/recommendation", self.base_url(), self.config.aas_id);
        let body = serde_json::json!({
            "targetSpeedRpm": target_speed_rpm,
            "confidence": confidence,
            "reasoningHash": reasoning_hash,
        });
        self.put(&url, &body).await
    }

    async fn put(&self, url: &str, body: &Value) -> CortexResult<()> {
        let response = self
            .client
            .put(url)
            .json(body)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| CortexError::TransientEngine(format!("twin update: {e}")))?;
        if !response.status().is_success() {
            return Err(CortexError::TransientEngine(format!("twin update returned {}", response.status())));
        }
        Ok(())
    }

    /// Resolve a nameplate/safety property: cache, then remote, then the
    /// constraints-derived default. Never fails the caller.
    pub async fn get_property(&self, property: TwinProperty, constraints: &Constraints) -> (Value, PropertySource) {
        let ttl = Duration::from_secs_f64(self.config.property_cache_ttl_s.max(0.0));
        {
            let inner = self.inner.lock().expect("twin adapter lock poisoned");
            if let Some((value, fetched_at)) = inner.cache.get(property.as_str()) {
                if fetched_at.elapsed() < ttl {
                    return (value.clone(), PropertySource::DigitalTwinCached);
                }
            }
        }

        match self.fetch_remote(property).await {
            Ok(value) => {
                self.inner
                    .lock()
                    .expect("twin adapter lock poisoned")
                    .cache
                    .insert(property.as_str(), (value.clone(), Instant::now()));
                (value, PropertySource::DigitalTwin)
            }
            Err(_) => (property.constraints_fallback(constraints), PropertySource::ConstraintsFallback),
        }
    }

    async fn fetch_remote(&self, property: TwinProperty) -> CortexResult<Value> {
        let url = format!(
            "{}/shells/{}/submodels/nameplate/properties/{}",
            self.base_url(),
            self.config.aas_id,
            property.as_str()
        );
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| CortexError::TransientEngine(format!("twin get_property: {e}")))?;
        if !response.status().is_success() {
            return Err(CortexError::TransientEngine(format!("twin get_property returned {}", response.status())));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| CortexError::TransientEngine(format!("twin get_property bad body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names_round_trip() {
        for p in [
            TwinProperty::MaxSpeedRpm,
            TwinProperty::MinSpeedRpm,
            TwinProperty::MaxTemperatureC,
            TwinProperty::MaxRateChangeRpm,
            TwinProperty::SafetyIntegrityLevel,
            TwinProperty::ManufacturerName,
            TwinProperty::SerialNumber,
        ] {
            assert_eq!(TwinProperty::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn unknown_property_name_does_not_parse() {
        assert_eq!(TwinProperty::parse("NotARealProperty"), None);
    }

    #[test]
    fn fallback_uses_constraints_values() {
        let constraints = Constraints {
            min_speed_rpm: 0.0,
            max_speed_rpm: 3000.0,
            max_rate_rpm: 200.0,
            max_temp_c: 90.0,
            staleness_us: 250_000,
        };
        assert_eq!(
            TwinProperty::MaxSpeedRpm.constraints_fallback(&constraints),
            serde_json::json!(3000.0)
        );
    }

    #[test]
    fn new_requires_base_url() {
        let config = TwinConfig {
            base_url: None,
            aas_id: "a".into(),
            asset_id: "b".into(),
            update_interval_s: 1.0,
            property_cache_ttl_s: 300.0,
        };
        assert!(TwinAdapter::new(config).is_err());
    }
}
