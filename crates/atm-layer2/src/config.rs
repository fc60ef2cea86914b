//! Interface configuration loaded from TOML.
//!
//! Raw `*Input` structs accept whatever the file contains; [`Layer2ConfigInput::resolve`]
//! fills in defaults and rejects values the model cannot run with. Per-queue
//! `[[queues]]` entries override the interface-wide RED and capacity values
//! for one queue index and fall back to them field by field.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::red::RedParams;

pub const CONFIG_VERSION: u32 = 1;

pub const DEFAULT_LINK_BANDWIDTH_BPS: u64 = 112_000;
pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_QUEUE_SIZE_BYTES: usize = 15_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{key} must not be negative, got {value}")]
    Negative { key: &'static str, value: f64 },
    #[error("{key} must be a finite number")]
    NotFinite { key: &'static str },
    #[error("{key} must not exceed {max}, got {value}")]
    TooLarge {
        key: &'static str,
        value: f64,
        max: f64,
    },
    #[error("queue {0} is configured more than once")]
    DuplicateQueue(usize),
}

/// Queue-level settings. Every field is optional so that the same shape
/// serves both the interface-wide defaults and per-queue overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfigInput {
    pub queue_size_bytes: Option<i64>,
    pub red_min_threshold: Option<f64>,
    pub red_max_threshold: Option<f64>,
    pub red_max_probability: Option<f64>,
    pub red_small_packet_tx_time_ms: Option<f64>,
    pub red_queue_weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueOverrideInput {
    pub index: usize,
    #[serde(flatten)]
    pub queue: QueueConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Layer2ConfigInput {
    pub version: u32,
    pub link_bandwidth_bps: Option<i64>,
    pub propagation_delay_ms: Option<f64>,
    #[serde(flatten)]
    pub queue: QueueConfigInput,
    pub layer2_statistics: Option<bool>,
    pub scheduler_statistics: Option<bool>,
    pub queues: Vec<QueueOverrideInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub capacity_bytes: usize,
    pub red: RedParams,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_QUEUE_SIZE_BYTES,
            red: RedParams::default(),
        }
    }
}

/// Resolved settings for one interface.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer2Config {
    pub version: u32,
    pub bandwidth_bps: u64,
    pub propagation_delay: Duration,
    /// Applies to every queue without an override.
    pub queue: QueueConfig,
    pub overrides: BTreeMap<usize, QueueConfig>,
    pub layer2_statistics: bool,
    pub scheduler_statistics: bool,
}

impl Default for Layer2Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            bandwidth_bps: DEFAULT_LINK_BANDWIDTH_BPS,
            propagation_delay: DEFAULT_PROPAGATION_DELAY,
            queue: QueueConfig::default(),
            overrides: BTreeMap::new(),
            layer2_statistics: false,
            scheduler_statistics: false,
        }
    }
}

fn non_negative(key: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite { key });
    }
    if value < 0.0 {
        return Err(ConfigError::Negative { key, value });
    }
    Ok(value)
}

fn at_most(key: &'static str, value: f64, max: f64) -> Result<f64, ConfigError> {
    let value = non_negative(key, value)?;
    if value > max {
        return Err(ConfigError::TooLarge { key, value, max });
    }
    Ok(value)
}

fn non_negative_int(key: &'static str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Negative {
        key,
        value: value as f64,
    })
}

fn millis(ms: f64) -> Duration {
    Duration::from_nanos((ms * 1_000_000.0).round() as u64)
}

impl QueueConfigInput {
    /// Fields left unset here are taken from `base`.
    pub fn or(self, base: &QueueConfigInput) -> QueueConfigInput {
        QueueConfigInput {
            queue_size_bytes: self.queue_size_bytes.or(base.queue_size_bytes),
            red_min_threshold: self.red_min_threshold.or(base.red_min_threshold),
            red_max_threshold: self.red_max_threshold.or(base.red_max_threshold),
            red_max_probability: self.red_max_probability.or(base.red_max_probability),
            red_small_packet_tx_time_ms: self
                .red_small_packet_tx_time_ms
                .or(base.red_small_packet_tx_time_ms),
            red_queue_weight: self.red_queue_weight.or(base.red_queue_weight),
        }
    }

    pub fn resolve(&self) -> Result<QueueConfig, ConfigError> {
        let defaults = QueueConfig::default();
        let capacity_bytes = match self.queue_size_bytes {
            Some(v) => non_negative_int("queue_size_bytes", v)? as usize,
            None => defaults.capacity_bytes,
        };

        let d = defaults.red;
        let red = RedParams {
            min_threshold: self
                .red_min_threshold
                .map(|v| non_negative("red_min_threshold", v))
                .transpose()?
                .unwrap_or(d.min_threshold),
            max_threshold: self
                .red_max_threshold
                .map(|v| non_negative("red_max_threshold", v))
                .transpose()?
                .unwrap_or(d.max_threshold),
            max_probability: self
                .red_max_probability
                .map(|v| non_negative("red_max_probability", v))
                .transpose()?
                .unwrap_or(d.max_probability),
            small_packet_tx_time: self
                .red_small_packet_tx_time_ms
                .map(|v| non_negative("red_small_packet_tx_time_ms", v).map(millis))
                .transpose()?
                .unwrap_or(d.small_packet_tx_time),
            queue_weight: self
                .red_queue_weight
                .map(|v| at_most("red_queue_weight", v, 1.0))
                .transpose()?
                .unwrap_or(d.queue_weight),
        };
        Ok(QueueConfig { capacity_bytes, red })
    }
}

impl Layer2ConfigInput {
    /// Fields left unset here are taken from `base`. Queue overrides from
    /// both are kept, with `self` winning on the same index.
    pub fn or(self, base: &Layer2ConfigInput) -> Layer2ConfigInput {
        let mut queues = self.queues;
        for q in &base.queues {
            if !queues.iter().any(|own| own.index == q.index) {
                queues.push(q.clone());
            }
        }
        Layer2ConfigInput {
            version: if self.version == 0 { base.version } else { self.version },
            link_bandwidth_bps: self.link_bandwidth_bps.or(base.link_bandwidth_bps),
            propagation_delay_ms: self.propagation_delay_ms.or(base.propagation_delay_ms),
            queue: self.queue.or(&base.queue),
            layer2_statistics: self.layer2_statistics.or(base.layer2_statistics),
            scheduler_statistics: self.scheduler_statistics.or(base.scheduler_statistics),
            queues,
        }
    }

    pub fn resolve(self) -> Result<Layer2Config, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let bandwidth_bps = match self.link_bandwidth_bps {
            Some(v) => non_negative_int("link_bandwidth_bps", v)?,
            None => DEFAULT_LINK_BANDWIDTH_BPS,
        };
        let propagation_delay = match self.propagation_delay_ms {
            Some(v) => millis(non_negative("propagation_delay_ms", v)?),
            None => DEFAULT_PROPAGATION_DELAY,
        };
        if bandwidth_bps == 0 {
            tracing::warn!("link bandwidth is 0, every frame on this link will be dropped");
        }

        let queue = self.queue.resolve()?;
        let mut overrides = BTreeMap::new();
        for entry in self.queues {
            let resolved = entry.queue.or(&self.queue).resolve()?;
            if overrides.insert(entry.index, resolved).is_some() {
                return Err(ConfigError::DuplicateQueue(entry.index));
            }
        }

        Ok(Layer2Config {
            version,
            bandwidth_bps,
            propagation_delay,
            queue,
            overrides,
            layer2_statistics: self.layer2_statistics.unwrap_or(false),
            scheduler_statistics: self.scheduler_statistics.unwrap_or(false),
        })
    }
}

impl Layer2Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Layer2Config::default());
        }
        let parsed: Layer2ConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    /// Settings for queue `index`, falling back to the interface-wide ones.
    pub fn queue(&self, index: usize) -> &QueueConfig {
        self.overrides.get(&index).unwrap_or(&self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_uses_defaults() {
        let cfg = Layer2Config::from_toml_str("").unwrap();
        assert_eq!(cfg, Layer2Config::default());
        assert_eq!(cfg.bandwidth_bps, 112_000);
        assert_eq!(cfg.propagation_delay, Duration::from_millis(50));
        assert_eq!(cfg.queue.capacity_bytes, 15_000);
        assert_eq!(cfg.queue.red, RedParams::default());
        assert!(!cfg.layer2_statistics);
        assert!(!cfg.scheduler_statistics);
    }

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            version = 1
            link_bandwidth_bps = 1544000
            propagation_delay_ms = 2.5
            queue_size_bytes = 5300
            red_min_threshold = 3
            red_max_threshold = 9
            red_max_probability = 0.1
            red_small_packet_tx_time_ms = 1
            red_queue_weight = 0.002
            layer2_statistics = true
        "#;
        let cfg = Layer2Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.bandwidth_bps, 1_544_000);
        assert_eq!(cfg.propagation_delay, Duration::from_micros(2500));
        assert_eq!(cfg.queue.capacity_bytes, 5300);
        assert_eq!(cfg.queue.red.min_threshold, 3.0);
        assert_eq!(cfg.queue.red.max_threshold, 9.0);
        assert_eq!(cfg.queue.red.max_probability, 0.1);
        assert_eq!(cfg.queue.red.small_packet_tx_time, Duration::from_millis(1));
        assert_eq!(cfg.queue.red.queue_weight, 0.002);
        assert!(cfg.layer2_statistics);
        assert!(!cfg.scheduler_statistics);
    }

    #[test]
    fn queue_overrides_fall_back_per_field() {
        let toml = r#"
            queue_size_bytes = 10000
            red_max_threshold = 30

            [[queues]]
            index = 0
            queue_size_bytes = 530

            [[queues]]
            index = 2
            red_min_threshold = 1
        "#;
        let cfg = Layer2Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.queue(0).capacity_bytes, 530);
        assert_eq!(cfg.queue(0).red.max_threshold, 30.0);
        assert_eq!(cfg.queue(1), &cfg.queue);
        assert_eq!(cfg.queue(2).capacity_bytes, 10_000);
        assert_eq!(cfg.queue(2).red.min_threshold, 1.0);
        assert_eq!(cfg.queue(2).red.max_threshold, 30.0);
    }

    #[test]
    fn negative_values_are_rejected() {
        for toml in [
            "link_bandwidth_bps = -1",
            "propagation_delay_ms = -5",
            "queue_size_bytes = -53",
            "red_min_threshold = -1",
            "red_max_threshold = -1",
            "red_max_probability = -0.5",
            "red_small_packet_tx_time_ms = -10",
        ] {
            let err = Layer2Config::from_toml_str(toml).unwrap_err();
            assert!(matches!(err, ConfigError::Negative { .. }), "{toml}: {err}");
        }
    }

    #[test]
    fn inverted_thresholds_are_accepted() {
        let cfg = Layer2Config::from_toml_str("red_min_threshold = 20\nred_max_probability = 2.0").unwrap();
        assert_eq!(cfg.queue.red.min_threshold, 20.0);
        assert_eq!(cfg.queue.red.max_threshold, 15.0);
        assert_eq!(cfg.queue.red.warnings().len(), 2);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let err = Layer2Config::from_toml_str("version = 7").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(7)));
    }

    #[test]
    fn queue_weight_above_one_is_rejected() {
        let err = Layer2Config::from_toml_str("red_queue_weight = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooLarge {
                key: "red_queue_weight",
                ..
            }
        ));
        assert!(err.to_string().contains("must not exceed 1"));

        let cfg = Layer2Config::from_toml_str("red_queue_weight = 1.0").unwrap();
        assert_eq!(cfg.queue.red.queue_weight, 1.0);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = Layer2Config::from_toml_str("link_bandwidth_bps = [").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn duplicate_queue_override_is_rejected() {
        let toml = "[[queues]]\nindex = 1\n[[queues]]\nindex = 1\n";
        let err = Layer2Config::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateQueue(1)));
    }

    #[test]
    fn input_falls_back_to_base() {
        let base: Layer2ConfigInput =
            toml::from_str("link_bandwidth_bps = 64000\nred_max_threshold = 40\n[[queues]]\nindex = 1\nqueue_size_bytes = 106").unwrap();
        let own: Layer2ConfigInput = toml::from_str("propagation_delay_ms = 1").unwrap();
        let cfg = own.or(&base).resolve().unwrap();
        assert_eq!(cfg.bandwidth_bps, 64_000);
        assert_eq!(cfg.propagation_delay, Duration::from_millis(1));
        assert_eq!(cfg.queue.red.max_threshold, 40.0);
        assert_eq!(cfg.queue(1).capacity_bytes, 106);
    }
}
