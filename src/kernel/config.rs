//! Configuration records
//!
//! Plain serde records so a host can keep them in its own settings files.
//! Validation happens when a record is handed to the kernel or factory, so a
//! bad value is reported as [`Error::Configuration`] before anything is
//! scheduled.

use super::error::{Error, Result};
use super::trace::TRACE_BUFFER_SIZE;
use serde::{Deserialize, Serialize};

/// Kernel-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Record scheduler events in the in-memory trace buffer
    pub trace_enabled: bool,
    /// Trace events kept before the oldest are dropped
    pub trace_capacity: usize,
    /// Most periodic timer fires delivered in a single step (0 = no limit).
    /// Crossings over the limit are delivered on later steps.
    pub max_catch_up_fires: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            trace_enabled: false,
            trace_capacity: TRACE_BUFFER_SIZE,
            max_catch_up_fires: 0,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trace_enabled && self.trace_capacity == 0 {
            return Err(Error::config("kernel", "trace_capacity must be positive when tracing"));
        }
        Ok(())
    }

    /// Parse and validate a JSON settings object. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::config("kernel", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Timer settings: `delay` is the one-shot delay or the periodic interval,
/// in seconds of simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerConfig {
    pub delay: f64,
    #[serde(default)]
    pub repeat: bool,
}

impl TimerConfig {
    pub fn once(delay: f64) -> Self {
        Self {
            delay,
            repeat: false,
        }
    }

    pub fn periodic(interval: f64) -> Self {
        Self {
            delay: interval,
            repeat: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.delay.is_finite() || self.delay < 0.0 {
            return Err(Error::config(
                "timer",
                format!("delay must be a finite, non-negative number of seconds, got {}", self.delay),
            ));
        }
        if self.repeat && self.delay == 0.0 {
            return Err(Error::config("timer", "periodic interval must be positive"));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::config("timer", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
