//! Runtime configuration: cycle timing, anomaly site, phase targets,
//! and broadcast limits. Every field has a default matching the
//! reference demo, so an empty JSON object is a valid config file.

use crate::error::{GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    pub cycle:            CycleConfig,
    pub site:             SiteConfig,
    pub targets:          TargetConfig,
    /// Half-width of the uniform jitter band applied every tick.
    pub jitter_amplitude: f64,
    pub tick_interval_ms: u64,
    /// Per-connection queue depth before a slow client is dropped.
    pub subscriber_queue: usize,
    /// Master RNG seed. `None` picks a fresh one at startup.
    pub seed:             Option<u64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cycle:            CycleConfig::default(),
            site:             SiteConfig::default(),
            targets:          TargetConfig::default(),
            jitter_amplitude: 2.0,
            tick_interval_ms: 1000,
            subscriber_queue: 32,
            seed:             None,
        }
    }
}

/// Phase boundaries in seconds from the start of each cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CycleConfig {
    pub length_secs:         f64,
    pub anomaly_start_secs:  f64,
    pub fault_start_secs:    f64,
    pub recovery_start_secs: f64,
    /// Ticks landing inside `[0, reset_window_secs)` force a full reset.
    pub reset_window_secs:   f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            length_secs:         180.0,
            anomaly_start_secs:  60.0,
            fault_start_secs:    90.0,
            recovery_start_secs: 150.0,
            reset_window_secs:   1.0,
        }
    }
}

/// Which nodes the scripted anomaly plays out on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    pub pressure_node:       String,
    pub acoustic_node:       String,
    pub manual_trigger_node: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            pressure_node:       "N2".into(),
            acoustic_node:       "N5".into(),
            manual_trigger_node: "N1".into(),
        }
    }
}

/// Pre-jitter attribute targets per phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    pub baseline_pressure:    f64,
    pub baseline_acoustic:    f64,
    pub anomaly_pressure:     f64,
    pub anomaly_acoustic:     f64,
    pub fault_pressure:       f64,
    pub fault_acoustic:       f64,
    pub recovery_pressure:    f64,
    pub recovery_acoustic:    f64,
    /// Pressure removed from a node by the manual trigger.
    pub manual_pressure_drop: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            baseline_pressure:    100.0,
            baseline_acoustic:    0.0,
            anomaly_pressure:     60.0,
            anomaly_acoustic:     85.0,
            fault_pressure:       40.0,
            fault_acoustic:       95.0,
            recovery_pressure:    80.0,
            recovery_acoustic:    30.0,
            manual_pressure_drop: 18.0,
        }
    }
}

impl GridConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> GridResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: GridConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> GridResult<()> {
        let c = &self.cycle;
        let bounds = [
            0.0,
            c.anomaly_start_secs,
            c.fault_start_secs,
            c.recovery_start_secs,
            c.length_secs,
        ];
        if !bounds.windows(2).all(|w| w[0] < w[1]) {
            return Err(invalid(format!(
                "phase boundaries must strictly increase inside the cycle, got {bounds:?}"
            )));
        }
        if !(0.0..=c.anomaly_start_secs).contains(&c.reset_window_secs) {
            return Err(invalid("reset window must fit inside the NORMAL phase"));
        }
        if self.jitter_amplitude < 0.0 || !self.jitter_amplitude.is_finite() {
            return Err(invalid("jitter_amplitude must be a finite value >= 0"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms must be > 0"));
        }
        // At least one tick must land inside PREDICTED_FAULT every cycle.
        let fault_window_ms = (c.recovery_start_secs - c.fault_start_secs) * 1000.0;
        if self.tick_interval_ms as f64 >= fault_window_ms {
            return Err(invalid(format!(
                "tick_interval_ms must be shorter than the PREDICTED_FAULT window ({fault_window_ms}ms)"
            )));
        }
        if self.subscriber_queue == 0 {
            return Err(invalid("subscriber_queue must be > 0"));
        }
        if self.site.pressure_node == self.site.acoustic_node {
            return Err(invalid("pressure and acoustic nodes must differ"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> GridError {
    GridError::InvalidConfig(msg.into())
}
