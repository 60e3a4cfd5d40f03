//! Observation ring buffer (C4).
//!
//! Fixed-capacity rolling window over (speed, temp, pressure, timestamp),
//! with periodic persistence to the decision store. A single reentrant
//! lock serializes readers and writers; no component else holds it.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::model::Observation;
use crate::store::DecisionStore;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub max_size: usize,
    pub persist_interval: usize,
    pub preload_on_start: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            max_size: 500,
            persist_interval: 10,
            preload_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeriesStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    pub count: usize,
    pub speed: SeriesStats,
    pub temp: SeriesStats,
}

struct Inner {
    speed: VecDeque<f64>,
    temp: VecDeque<f64>,
    pressure: VecDeque<f64>,
    timestamps: VecDeque<u64>,
    persist_counter: usize,
}

/// Thread-safe rolling buffer for sensor observations.
pub struct ObservationBuffer {
    config: BufferConfig,
    inner: Mutex<Inner>,
}

impl ObservationBuffer {
    pub fn new(config: BufferConfig, store: Option<&DecisionStore>) -> Self {
        let mut inner = Inner {
            speed: VecDeque::with_capacity(config.max_size),
            temp: VecDeque::with_capacity(config.max_size),
            pressure: VecDeque::with_capacity(config.max_size),
            timestamps: VecDeque::with_capacity(config.max_size),
            persist_counter: 0,
        };

        if config.preload_on_start {
            if let Some(store) = store {
                if let Ok(records) = store.get_recent_observations(config.max_size, None) {
                    // Records come back newest-first; push oldest-first.
                    for record in records.into_iter().rev() {
                        push_bounded(&mut inner.speed, record.motor_speed_rpm, config.max_size);
                        push_bounded(&mut inner.temp, record.motor_temp_c, config.max_size);
                        push_bounded(&mut inner.pressure, record.pressure_bar, config.max_size);
                        push_bounded(&mut inner.timestamps, record.timestamp_unix_us, config.max_size);
                    }
                }
            }
        }

        ObservationBuffer {
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn add(&self, obs: &Observation, timestamp_us: u64, store: Option<&DecisionStore>) {
        let mut inner = self.inner.lock().expect("observation buffer lock poisoned");
        push_bounded(&mut inner.speed, obs.motor_speed_rpm, self.config.max_size);
        push_bounded(&mut inner.temp, obs.motor_temp_c, self.config.max_size);
        push_bounded(&mut inner.pressure, obs.pressure_bar, self.config.max_size);
        push_bounded(&mut inner.timestamps, timestamp_us, self.config.max_size);

        inner.persist_counter += 1;
        if inner.persist_counter >= self.config.persist_interval {
            inner.persist_counter = 0;
            if let Some(store) = store {
                let _ = store.add_observation(obs, timestamp_us);
            }
        }
    }

    pub fn speed_history(&self) -> Vec<f64> {
        self.inner.lock().expect("lock poisoned").speed.iter().copied().collect()
    }

    pub fn temp_history(&self) -> Vec<f64> {
        self.inner.lock().expect("lock poisoned").temp.iter().copied().collect()
    }

    pub fn get_window(&self, n: usize) -> (Vec<f64>, Vec<f64>) {
        let inner = self.inner.lock().expect("lock poisoned");
        let take_tail = |series: &VecDeque<f64>| -> Vec<f64> {
            let len = series.len();
            let start = len.saturating_sub(n);
            series.iter().skip(start).copied().collect()
        };
        (take_tail(&inner.speed), take_tail(&inner.temp))
    }

    pub fn get_stats(&self) -> BufferStats {
        let inner = self.inner.lock().expect("lock poisoned");
        if inner.speed.is_empty() {
            return BufferStats::default();
        }
        let series_stats = |series: &VecDeque<f64>| SeriesStats {
            count: series.len(),
            min: series.iter().cloned().fold(f64::INFINITY, f64::min),
            max: series.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            avg: series.iter().sum::<f64>() / series.len() as f64,
        };
        BufferStats {
            count: inner.speed.len(),
            speed: series_stats(&inner.speed),
            temp: series_stats(&inner.temp),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").speed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.speed.clear();
        inner.temp.clear();
        inner.pressure.clear();
        inner.timestamps.clear();
    }
}

fn push_bounded<T>(deque: &mut VecDeque<T>, value: T, max_size: usize) {
    if deque.len() >= max_size {
        deque.pop_front();
    }
    deque.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn add_is_bounded_by_max_size() {
        let buf = ObservationBuffer::new(
            BufferConfig { max_size: 3, persist_interval: 1000, preload_on_start: false },
            None,
        );
        for i in 0..5 {
            buf.add(&obs(i as f64, 50.0), i, None);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.speed_history(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn get_window_returns_tail() {
        let buf = ObservationBuffer::new(BufferConfig::default(), None);
        for i in 0..10 {
            buf.add(&obs(i as f64, i as f64), i, None);
        }
        let (speed, temp) = buf.get_window(3);
        assert_eq!(speed, vec![7.0, 8.0, 9.0]);
        assert_eq!(temp, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn stats_on_empty_buffer_is_zeroed() {
        let buf = ObservationBuffer::new(BufferConfig::default(), None);
        let stats = buf.get_stats();
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn stats_computed_over_full_window() {
        let buf = ObservationBuffer::new(BufferConfig::default(), None);
        for s in [10.0, 20.0, 30.0] {
            buf.add(&obs(s, 50.0), 0, None);
        }
        let stats = buf.get_stats();
        assert_eq!(stats.speed.min, 10.0);
        assert_eq!(stats.speed.max, 30.0);
        assert_eq!(stats.speed.avg, 20.0);
    }
}
