use crate::dates::Granularity;
use crate::error::{IndicatorError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How calculated ratios are expressed before averaging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ValueScale {
    /// Raw `numerator / denominator`.
    Ratio,
    /// `round2(ratio * 100)`.
    #[default]
    Percentage,
}

pub const DEFAULT_COLOR: &str = "gray";

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default = "default_workers")]
    #[schemars(description = "Worker threads used for parallel batches. Must be at least 1.")]
    pub workers: usize,

    #[serde(default)]
    #[schemars(description = "Calculate one bucket per day or per month end")]
    pub granularity: Granularity,

    #[serde(default)]
    pub value_scale: ValueScale,

    #[serde(default = "default_color")]
    #[schemars(description = "Color reported when an indicator has no threshold bands")]
    pub default_color: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            granularity: Granularity::default(),
            value_scale: ValueScale::default(),
            default_color: default_color(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(IndicatorError::ValidationError {
                field: "workers".to_string(),
                details: "At least one worker is required".to_string(),
            });
        }
        if self.default_color.trim().is_empty() {
            return Err(IndicatorError::ValidationError {
                field: "default_color".to_string(),
                details: "Default color must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
