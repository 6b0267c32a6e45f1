use serde::{Deserialize, Serialize};

use crate::error::{GcError, Result};

/// Tuning for threshold driven collection through [`Allocator::collect`].
///
/// [`Allocator::collect`]: crate::Allocator::collect
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes that must be allocated before the first threshold driven cycle.
    pub initial_threshold: usize,
    /// After a cycle the threshold becomes `bytes_allocated * threshold_adj`.
    pub threshold_adj: f32,
}

impl Config {
    const THRESHOLD: usize = 1024 * 1024;
    const THRESHOLD_ADJ: f32 = 2.0;

    pub fn from_json(data: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.threshold_adj >= 1.0) {
            return Err(GcError::InvalidConfig(format!(
                "threshold_adj must be at least 1.0, got {}",
                self.threshold_adj
            )));
        }

        Ok(())
    }

    pub(crate) fn next_threshold(&self, bytes_allocated: usize) -> usize {
        (bytes_allocated as f32 * self.threshold_adj) as usize + 100
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_threshold: Self::THRESHOLD,
            threshold_adj: Self::THRESHOLD_ADJ,
        }
    }
}
