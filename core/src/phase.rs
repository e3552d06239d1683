//! Phase scheduler: which of the four scripted phases is active, and the
//! one-time mutations that fire on entry into each.
//!
//! RULES:
//!   - Phase is a pure function of seconds-into-cycle.
//!   - Entry side effects are edge-triggered: they fire only when the
//!     resolved phase differs from the recorded one.
//!   - The anomaly site is resolved once, at construction. A missing
//!     node or edge is a startup error, never a runtime skip.

use crate::{
    config::{CycleConfig, SiteConfig, TargetConfig},
    error::{GridError, GridResult},
    topology::{EdgeStatus, NodeStatus, Topology},
    types::CycleSecs,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Normal,
    PhysicalAnomaly,
    PredictedFault,
    Recovering,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Normal,
        Phase::PhysicalAnomaly,
        Phase::PredictedFault,
        Phase::Recovering,
    ];

    /// Resolve the active phase for `t` seconds into the cycle.
    /// `t` is expected in `[0, length)`; values past the last boundary
    /// fall into `Recovering`.
    pub fn at(t: CycleSecs, cycle: &CycleConfig) -> Phase {
        if t < cycle.anomaly_start_secs {
            Phase::Normal
        } else if t < cycle.fault_start_secs {
            Phase::PhysicalAnomaly
        } else if t < cycle.recovery_start_secs {
            Phase::PredictedFault
        } else {
            Phase::Recovering
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal          => "NORMAL",
            Self::PhysicalAnomaly => "PHYSICAL_ANOMALY",
            Self::PredictedFault  => "PREDICTED_FAULT",
            Self::Recovering      => "RECOVERING",
        }
    }
}

/// What the wire reports as `systemState`: the scheduled phase, or the
/// manual-override marker for snapshots produced by the trigger command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Normal,
    PhysicalAnomaly,
    PredictedFault,
    Recovering,
    Anomalous,
}

impl From<Phase> for SystemState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Normal          => Self::Normal,
            Phase::PhysicalAnomaly => Self::PhysicalAnomaly,
            Phase::PredictedFault  => Self::PredictedFault,
            Phase::Recovering      => Self::Recovering,
        }
    }
}

/// Validated handles into the topology for the scripted fault.
#[derive(Debug, Clone)]
pub struct AnomalySite {
    pub pressure_node: String,
    pub acoustic_node: String,
    pub pressure_idx:  usize,
    pub acoustic_idx:  usize,
    pub edge_idx:      usize,
}

impl AnomalySite {
    pub fn resolve(topology: &Topology, site: &SiteConfig) -> GridResult<Self> {
        let lookup = |id: &str| {
            topology
                .node_index(id)
                .ok_or_else(|| GridError::UnknownNode { id: id.to_string() })
        };
        let pressure_idx = lookup(&site.pressure_node)?;
        let acoustic_idx = lookup(&site.acoustic_node)?;
        let edge_idx = topology
            .edge_index_between(&site.pressure_node, &site.acoustic_node)
            .ok_or_else(|| GridError::MissingEdge {
                a: site.pressure_node.clone(),
                b: site.acoustic_node.clone(),
            })?;
        Ok(Self {
            pressure_node: site.pressure_node.clone(),
            acoustic_node: site.acoustic_node.clone(),
            pressure_idx,
            acoustic_idx,
            edge_idx,
        })
    }

    /// Short label for the fault edge, e.g. `N2-N5`.
    pub fn edge_label(&self) -> String {
        format!("{}-{}", self.pressure_node, self.acoustic_node)
    }
}

pub struct PhaseScheduler {
    cycle:   CycleConfig,
    targets: TargetConfig,
    site:    AnomalySite,
    current: Phase,
}

impl PhaseScheduler {
    pub fn new(cycle: CycleConfig, targets: TargetConfig, site: AnomalySite) -> Self {
        Self { cycle, targets, site, current: Phase::Normal }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn site(&self) -> &AnomalySite {
        &self.site
    }

    pub fn cycle(&self) -> &CycleConfig {
        &self.cycle
    }

    pub fn in_reset_window(&self, t: CycleSecs) -> bool {
        t < self.cycle.reset_window_secs
    }

    /// Full reset: exact baseline everywhere, recorded phase back to NORMAL.
    pub fn reset(&mut self, topology: &mut Topology) {
        topology.reset_to_baseline();
        self.current = Phase::Normal;
    }

    /// Resolve the phase for `t` and apply entry effects if it changed.
    /// Returns the newly entered phase, or `None` when nothing changed.
    pub fn advance(&mut self, t: CycleSecs, topology: &mut Topology) -> Option<Phase> {
        let next = Phase::at(t, &self.cycle);
        if next == self.current {
            return None;
        }
        log::info!("phase {} -> {} at t={t:.1}s", self.current.as_str(), next.as_str());
        self.enter(next, topology);
        self.current = next;
        Some(next)
    }

    /// Enter PREDICTED_FAULT if `t` lands in RECOVERING while the recorded
    /// phase is still before the fault window, i.e. the fault window fell
    /// between two ticks of the same cycle. Call before `advance`.
    pub fn catch_up(&mut self, t: CycleSecs, topology: &mut Topology) -> Option<Phase> {
        let before_fault = matches!(self.current, Phase::Normal | Phase::PhysicalAnomaly);
        if !before_fault || Phase::at(t, &self.cycle) != Phase::Recovering {
            return None;
        }
        log::warn!(
            "phase {} -> {} skipped by the clock at t={t:.1}s, entering it late",
            self.current.as_str(),
            Phase::PredictedFault.as_str()
        );
        self.enter(Phase::PredictedFault, topology);
        self.current = Phase::PredictedFault;
        Some(Phase::PredictedFault)
    }

    fn enter(&self, phase: Phase, topology: &mut Topology) {
        let t = &self.targets;
        let site = &self.site;
        match phase {
            Phase::Normal => topology.reset_to_baseline(),
            Phase::PhysicalAnomaly => {
                let p = topology.node_mut(site.pressure_idx);
                p.status = NodeStatus::Warning;
                p.pressure = t.anomaly_pressure;
                let a = topology.node_mut(site.acoustic_idx);
                a.status = NodeStatus::Warning;
                a.acoustic = t.anomaly_acoustic;
            }
            Phase::PredictedFault => {
                let p = topology.node_mut(site.pressure_idx);
                p.status = NodeStatus::Critical;
                p.pressure = t.fault_pressure;
                let a = topology.node_mut(site.acoustic_idx);
                a.status = NodeStatus::Critical;
                a.acoustic = t.fault_acoustic;
                topology.edge_mut(site.edge_idx).status = EdgeStatus::Critical;
            }
            Phase::Recovering => {
                let p = topology.node_mut(site.pressure_idx);
                p.status = NodeStatus::Normal;
                p.pressure = t.recovery_pressure;
                let a = topology.node_mut(site.acoustic_idx);
                a.status = NodeStatus::Normal;
                a.acoustic = t.recovery_acoustic;
                topology.edge_mut(site.edge_idx).status = EdgeStatus::Normal;
            }
        }
    }

    /// Pre-jitter `(pressure, acoustic)` target for a node in a phase.
    pub fn targets_for(&self, node_idx: usize, phase: Phase) -> (f64, f64) {
        let t = &self.targets;
        let mut pressure = t.baseline_pressure;
        let mut acoustic = t.baseline_acoustic;
        if node_idx == self.site.pressure_idx {
            pressure = match phase {
                Phase::Normal          => t.baseline_pressure,
                Phase::PhysicalAnomaly => t.anomaly_pressure,
                Phase::PredictedFault  => t.fault_pressure,
                Phase::Recovering      => t.recovery_pressure,
            };
        }
        if node_idx == self.site.acoustic_idx {
            acoustic = match phase {
                Phase::Normal          => t.baseline_acoustic,
                Phase::PhysicalAnomaly => t.anomaly_acoustic,
                Phase::PredictedFault  => t.fault_acoustic,
                Phase::Recovering      => t.recovery_acoustic,
            };
        }
        (pressure, acoustic)
    }
}
