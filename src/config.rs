//! Pipeline configuration.
//!
//! All settings are optional in the TOML file; missing keys take their
//! defaults:
//!
//! ```toml
//! [stability]
//! stable_overlap_fraction = 0.5
//!
//! [events]
//! kind = "division"
//! stable_before = 3
//! stable_after = 2
//! max_missing = 0
//! branch_proximity = "immediate"
//!
//! [selection]
//! border_width = 2
//!
//! [topology]
//! max_events = 4
//! max_anomalies = 0
//! ```

use crate::analysis::events::DetectionParams;
use crate::analysis::selection::SelectionOptions;
use crate::core::error::{LineageResult, ParameterError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stable-edge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Minimum overlap fraction on both sides of a stable edge.
    pub stable_overlap_fraction: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            stable_overlap_fraction: 0.0,
        }
    }
}

/// Topology catalog limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Maximum fusions plus divisions of a catalogued skeleton.
    pub max_events: usize,
    /// Maximum vertices with degree above two of a catalogued skeleton.
    pub max_anomalies: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_events: 4,
            max_anomalies: 0,
        }
    }
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stability: StabilityConfig,
    pub events: DetectionParams,
    pub selection: SelectionOptions,
    pub topology: TopologyConfig,
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> LineageResult<Self> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> LineageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ParameterError> {
        let fraction = self.stability.stable_overlap_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ParameterError::out_of_range(
                "stability.stable_overlap_fraction",
                fraction,
                "must be within [0, 1]",
            ));
        }
        if self.selection.border_width == Some(0) {
            return Err(ParameterError::out_of_range(
                "selection.border_width",
                0,
                "must be positive when set",
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Builder Methods
    // ========================================================================

    pub fn with_stable_overlap_fraction(mut self, fraction: f64) -> Self {
        self.stability.stable_overlap_fraction = fraction;
        self
    }

    pub fn with_events(mut self, events: DetectionParams) -> Self {
        self.events = events;
        self
    }

    pub fn with_selection(mut self, selection: SelectionOptions) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_topology_limits(mut self, max_events: usize, max_anomalies: usize) -> Self {
        self.topology = TopologyConfig {
            max_events,
            max_anomalies,
        };
        self
    }
}
