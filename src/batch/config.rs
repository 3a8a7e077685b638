//! Batcher configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Queue length that closes a batch while a given number of batches are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ThresholdRepr", into = "ThresholdRepr")]
pub enum Threshold {
    Count(usize),
    /// Never closes on queue length alone.
    Unbounded,
}

impl Threshold {
    /// Whether a queue of `len` entries has reached this threshold.
    pub fn reached(self, len: usize) -> bool {
        match self {
            Threshold::Count(n) => len >= n,
            Threshold::Unbounded => false,
        }
    }
}

impl From<usize> for Threshold {
    fn from(n: usize) -> Self {
        Threshold::Count(n)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Count(n) => write!(f, "{}", n),
            Threshold::Unbounded => f.write_str("unbounded"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ThresholdRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<ThresholdRepr> for Threshold {
    type Error = String;

    fn try_from(repr: ThresholdRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ThresholdRepr::Count(n) => Ok(Threshold::Count(n)),
            ThresholdRepr::Keyword(k) if k.eq_ignore_ascii_case("unbounded") => {
                Ok(Threshold::Unbounded)
            }
            ThresholdRepr::Keyword(k) => Err(format!(
                "expected a positive integer or \"unbounded\", got {:?}",
                k
            )),
        }
    }
}

impl From<Threshold> for ThresholdRepr {
    fn from(t: Threshold) -> Self {
        match t {
            Threshold::Count(n) => ThresholdRepr::Count(n),
            Threshold::Unbounded => ThresholdRepr::Keyword("unbounded".to_string()),
        }
    }
}

/// Numeric batching options.
///
/// Collaborators (the batch operation and pacing function) are not part of
/// this struct; they are supplied to [`BatcherBuilder`](super::BatcherBuilder).
/// Delays are kept in milliseconds so the config round-trips through YAML and
/// JSON unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatcherConfig {
    /// Cap on entries per batch. `None` means unbounded.
    pub max_batch_size: Option<usize>,
    /// Closing thresholds indexed by the number of active batches.
    /// Empty, or only `unbounded`, means no threshold gating: any non-empty
    /// queue closes on the next scheduling turn.
    pub closing_thresholds: Vec<Threshold>,
    /// Postponement applied to threshold-permitted and automatic closes.
    pub queuing_delay_ms: u64,
    /// Fixed wait before each dispatch, used when no pacing function is given.
    pub pacing_delay_ms: Option<u64>,
}

impl BatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = Some(n);
        self
    }
    pub fn with_closing_thresholds<T: Into<Threshold>>(
        mut self,
        thresholds: impl IntoIterator<Item = T>,
    ) -> Self {
        self.closing_thresholds = thresholds.into_iter().map(Into::into).collect();
        self
    }
    pub fn with_queuing_delay(mut self, d: Duration) -> Self {
        self.queuing_delay_ms = duration_to_ms(d);
        self
    }
    pub fn with_pacing_delay(mut self, d: Duration) -> Self {
        self.pacing_delay_ms = Some(duration_to_ms(d));
        self
    }

    pub fn queuing_delay(&self) -> Duration {
        Duration::from_millis(self.queuing_delay_ms)
    }

    pub fn pacing_delay(&self) -> Option<Duration> {
        self.pacing_delay_ms.map(Duration::from_millis)
    }

    /// Threshold in force while `active` batches are in flight, clamped to the
    /// last configured value.
    ///
    /// `None` when no thresholds are configured. A list made only of
    /// `Unbounded` counts as unconfigured, since it could never close a queue
    /// on its own.
    pub fn threshold_for(&self, active: usize) -> Option<Threshold> {
        if self
            .closing_thresholds
            .iter()
            .all(|t| *t == Threshold::Unbounded)
        {
            return None;
        }
        let last = self.closing_thresholds.len().checked_sub(1)?;
        Some(self.closing_thresholds[active.min(last)])
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == Some(0) {
            return Err(Error::validation_with_context(
                "max_batch_size must be a positive integer",
                ErrorContext::new()
                    .with_field_path("max_batch_size")
                    .with_details("got 0")
                    .with_source("batcher_config"),
            ));
        }
        for (i, t) in self.closing_thresholds.iter().enumerate() {
            if *t == Threshold::Count(0) {
                return Err(Error::validation_with_context(
                    "closing thresholds must be positive or unbounded",
                    ErrorContext::new()
                        .with_field_path(format!("closing_thresholds[{}]", i))
                        .with_details("got 0")
                        .with_source("batcher_config"),
                ));
            }
        }
        Ok(())
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw),
            other => Err(Error::configuration_with_context(
                "unsupported config file extension",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(format!("extension: {:?}", other))
                    .with_source("config_loader"),
            )),
        }
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
