//! Device subsystem configuration
//!
//! Sizes that a kernel build would fix at compile time are carried here so
//! the subsystem can be exercised at small scale. Configuration can be
//! loaded from JSON; missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// What the terminal driver does with a completed line when the line
/// buffer is already full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Hold the line and switch receive interrupts off until a reader
    /// frees a slot. Further input waits in the device; output continues.
    #[default]
    Block,
    /// Discard the oldest buffered line to make room.
    DropOldest,
}

fn default_terminal_units() -> usize {
    4
}

fn default_line_buffer_depth() -> usize {
    10
}

fn default_max_line() -> usize {
    80
}

/// Device subsystem settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of terminal units
    #[serde(default = "default_terminal_units")]
    pub terminal_units: usize,
    /// Completed lines buffered per terminal
    #[serde(default = "default_line_buffer_depth")]
    pub line_buffer_depth: usize,
    /// Longest line, in bytes, before it is force-completed
    #[serde(default = "default_max_line")]
    pub max_line: usize,
    /// Full line buffer behavior
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Cap on pending sleep requests (`None` = bounded only by memory)
    #[serde(default)]
    pub sleep_queue_limit: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            terminal_units: default_terminal_units(),
            line_buffer_depth: default_line_buffer_depth(),
            max_line: default_max_line(),
            overflow_policy: OverflowPolicy::default(),
            sleep_queue_limit: None,
        }
    }
}

impl DeviceConfig {
    /// Parse from JSON bytes
    pub fn from_json(data: &[u8]) -> Result<Self, DeviceError> {
        let config: Self = serde_json::from_slice(data)
            .map_err(|e| DeviceError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> Vec<u8> {
        // Plain data with string keys: serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Reject settings the subsystem cannot run with
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.terminal_units == 0 {
            return Err(DeviceError::InvalidConfig("terminal_units must be > 0".into()));
        }
        if self.terminal_units > u32::MAX as usize {
            return Err(DeviceError::InvalidConfig("terminal_units too large".into()));
        }
        if self.line_buffer_depth == 0 {
            return Err(DeviceError::InvalidConfig("line_buffer_depth must be > 0".into()));
        }
        if self.max_line == 0 {
            return Err(DeviceError::InvalidConfig("max_line must be > 0".into()));
        }
        if self.sleep_queue_limit == Some(0) {
            return Err(DeviceError::InvalidConfig("sleep_queue_limit must be > 0".into()));
        }
        Ok(())
    }

    /// Builder-style override of the unit count
    pub fn with_terminal_units(mut self, units: usize) -> Self {
        self.terminal_units = units;
        self
    }

    /// Builder-style override of the line buffer depth
    pub fn with_line_buffer_depth(mut self, depth: usize) -> Self {
        self.line_buffer_depth = depth;
        self
    }

    /// Builder-style override of the maximum line length
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Builder-style override of the overflow policy
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Builder-style override of the sleep queue limit
    pub fn with_sleep_queue_limit(mut self, limit: usize) -> Self {
        self.sleep_queue_limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.terminal_units, 4);
        assert_eq!(config.line_buffer_depth, 10);
        assert_eq!(config.max_line, 80);
        assert_eq!(config.overflow_policy, OverflowPolicy::Block);
        assert_eq!(config.sleep_queue_limit, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            DeviceConfig::from_json(br#"{"terminal_units":2,"overflow_policy":"drop_oldest"}"#)
                .unwrap();
        assert_eq!(config.terminal_units, 2);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.max_line, 80);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = DeviceConfig::default()
            .with_line_buffer_depth(3)
            .with_sleep_queue_limit(16);
        let parsed = DeviceConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(DeviceConfig::default().with_terminal_units(0).validate().is_err());
        assert!(DeviceConfig::default().with_line_buffer_depth(0).validate().is_err());
        assert!(DeviceConfig::default().with_max_line(0).validate().is_err());
        assert!(DeviceConfig::default().with_sleep_queue_limit(0).validate().is_err());
    }

    #[test]
    fn test_from_json_garbage() {
        assert!(matches!(
            DeviceConfig::from_json(b"not json"),
            Err(DeviceError::InvalidConfig(_))
        ));
    }
}
