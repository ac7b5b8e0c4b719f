use std::fmt;

use rocbridge_contracts::{
    failure_suffix, DEFAULT_ENTRY_NAME, DEFAULT_MODULE_NAME, ENV_MAX_RESULT_BYTES, MAX_FRAME_LEN,
};

/// Knobs for one [`crate::Boundary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryConfig {
    /// Entry point name used in failure messages.
    pub entry_name: String,
    /// Module name used in failure messages.
    pub module_name: String,
    /// Largest result payload the supervisor accepts from a worker.
    pub max_result_bytes: usize,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            entry_name: DEFAULT_ENTRY_NAME.to_string(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            max_result_bytes: MAX_FRAME_LEN,
        }
    }
}

impl BoundaryConfig {
    pub fn new(entry_name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            entry_name: entry_name.into(),
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_result_bytes(mut self, max_result_bytes: usize) -> Self {
        self.max_result_bytes = max_result_bytes;
        self
    }

    /// Defaults overridden by `ROCBRIDGE_MAX_RESULT_BYTES` when it is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var(ENV_MAX_RESULT_BYTES).ok();
        Self::default().apply_env_with(raw.as_deref())
    }

    /// Applies an already-read value of `ROCBRIDGE_MAX_RESULT_BYTES`.
    pub fn apply_env_with(mut self, raw: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(raw) = raw {
            self.max_result_bytes = parse_max_result_bytes(ENV_MAX_RESULT_BYTES, raw)?;
        }
        Ok(self)
    }

    pub fn failure_suffix(&self) -> String {
        failure_suffix(&self.entry_name, &self.module_name)
    }
}

/// Parses a result cap. Frames carry a `u32` length, so that is also the upper bound.
pub fn parse_max_result_bytes(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    let err = |reason| ConfigError {
        name,
        value: raw.to_string(),
        reason,
    };
    let n: u64 = raw
        .trim()
        .parse()
        .map_err(|_| err("expected a decimal byte count"))?;
    if n == 0 {
        return Err(err("must be at least 1"));
    }
    if n > u64::from(u32::MAX) {
        return Err(err("exceeds the 4 GiB frame limit"));
    }
    usize::try_from(n).map_err(|_| err("does not fit in usize"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}={:?}: {}", self.name, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}
