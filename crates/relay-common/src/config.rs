//! Configuration structures for the relay processor.
//!
//! Everything has a default suitable for a single relay instance; a TOML
//! document only needs to name the values it changes.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Rate at which the external timer advances the cycle counter (per second).
    pub nominal_cycle_rate: u32,

    /// Highest packet tick rate the relay processes (per second).
    pub max_tick_rate: u32,

    /// Wall-clock interval between alarm ticks (secondary-stream work).
    #[serde(with = "humantime_serde")]
    pub alarm_interval: Duration,

    /// Cycle counters divisible by this value always take the full path.
    pub full_path_modulus: i64,

    /// Maximum number of control messages drained per iteration.
    pub batch_size: usize,

    /// Control queue capacity; 0 means unbounded.
    ///
    /// With a bound, wakeups never allocate and are dropped when the queue
    /// is full.
    pub queue_capacity: usize,

    /// Name given to the scheduler worker thread.
    pub thread_name: String,

    /// Phase timing observability.
    pub observability: ObservabilityConfig,

    /// Real-time scheduling for the worker thread.
    pub realtime: RealtimeConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            nominal_cycle_rate: 200,
            max_tick_rate: 100,
            alarm_interval: Duration::from_secs(1),
            full_path_modulus: 7,
            batch_size: 10,
            queue_capacity: 0,
            thread_name: String::from("relay-proc"),
            observability: ObservabilityConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Cycle-counter ticks that make up one packet tick.
    #[must_use]
    pub fn cycles_per_tick(&self) -> i64 {
        i64::from(self.nominal_cycle_rate / self.max_tick_rate.max(1))
    }

    /// Check that the configuration can drive a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] describing the first invalid value.
    pub fn validate(&self) -> RelayResult<()> {
        if self.max_tick_rate == 0 {
            return Err(RelayError::Config("max_tick_rate must be non-zero".into()));
        }
        if self.nominal_cycle_rate < self.max_tick_rate {
            return Err(RelayError::Config(format!(
                "nominal_cycle_rate ({}) must be at least max_tick_rate ({})",
                self.nominal_cycle_rate, self.max_tick_rate
            )));
        }
        if self.full_path_modulus < 1 {
            return Err(RelayError::Config(
                "full_path_modulus must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(RelayError::Config("batch_size must be at least 1".into()));
        }
        let alpha = self.observability.filter_alpha;
        if !(0.0..1.0).contains(&alpha) {
            return Err(RelayError::Config(format!(
                "observability.filter_alpha must be in [0, 1), got {alpha}"
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Phase timing observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Collect per-phase timings and feed them to the phase sink.
    pub enabled: bool,

    /// Smoothing factor of the moving-average phase filters.
    pub filter_alpha: f64,

    /// Clock ticks between periodic phase reports.
    pub report_every: u32,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filter_alpha: 0.999,
            report_every: 200,
        }
    }
}

/// Real-time scheduling configuration for the worker thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Apply real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr" or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// CPU affinity for the worker thread.
    pub cpu_affinity: CpuAffinity,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: 50,
            cpu_affinity: CpuAffinity::None,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl CpuAffinity {
    /// CPUs named by this affinity, empty when unset.
    #[must_use]
    pub fn cpus(&self) -> Vec<usize> {
        match self {
            CpuAffinity::None => Vec::new(),
            CpuAffinity::Single(cpu) => vec![*cpu],
            CpuAffinity::Set(cpus) => cpus.clone(),
        }
    }
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index cannot be negative"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
