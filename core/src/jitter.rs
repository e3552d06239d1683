//! Jitter generator: bounded noise around each node's phase target.
//!
//! Runs every tick, after phase resolution. It rewrites pressure and
//! acoustic readings only; statuses are the scheduler's business.

use crate::{
    phase::{Phase, PhaseScheduler},
    rng::StreamRng,
    topology::Topology,
};

pub struct JitterGenerator {
    amplitude: f64,
    rng:       StreamRng,
}

impl JitterGenerator {
    pub fn new(amplitude: f64, rng: StreamRng) -> Self {
        Self { amplitude, rng }
    }

    /// One draw per node, shared by both readings, floored at zero.
    pub fn apply(&mut self, topology: &mut Topology, scheduler: &PhaseScheduler, phase: Phase) {
        for (idx, node) in topology.nodes_mut().enumerate() {
            let variance = self.rng.symmetric(self.amplitude);
            let (pressure, acoustic) = scheduler.targets_for(idx, phase);
            node.pressure = (pressure + variance).max(0.0);
            node.acoustic = (acoustic + variance).max(0.0);
        }
    }
}
