//! The tick engine: the single writer of grid state.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Read elapsed time from the clock, locate it in the cycle
//!   2. Full reset if inside the reset window or the cycle index moved
//!   3. Phase resolution + edge-triggered entry effects. A stalled clock
//!      that jumps over PREDICTED_FAULT still enters it (and fires the
//!      incident) before RECOVERING.
//!   4. Jitter on every node
//!   5. Capture an immutable snapshot
//!   6. Refresh the latest-snapshot watch, then publish: incident (only
//!      on PREDICTED_FAULT entry), then snapshot
//!
//! RULES:
//!   - Only tick() and apply() mutate the topology.
//!   - All randomness flows through the RngBank.
//!   - Nothing here blocks: publish() is synchronous and callbacks only
//!     enqueue.

use crate::{
    broadcast::EventBroadcaster,
    clock::{Clock, CyclePosition},
    command::GridCommand,
    config::GridConfig,
    error::{GridError, GridResult},
    event::GridEvent,
    incident::IncidentRecord,
    jitter::JitterGenerator,
    phase::{AnomalySite, Phase, PhaseScheduler, SystemState},
    rng::{RngBank, StreamRng, StreamSlot},
    snapshot::Snapshot,
    topology::{Baseline, NodeStatus, Topology},
    types::{CycleSecs, NodeId, Tick},
};
use std::sync::Arc;
use tokio::sync::watch;

/// What one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick:     Tick,
    pub offset:   CycleSecs,
    pub phase:    Phase,
    /// Set when this tick entered a new phase.
    pub entered:  Option<Phase>,
    pub reset:    bool,
    pub incident: Option<Arc<IncidentRecord>>,
    pub snapshot: Arc<Snapshot>,
}

pub struct GridEngine {
    seed:          u64,
    clock:         Arc<dyn Clock>,
    broadcaster:   Arc<EventBroadcaster>,
    topology:      Topology,
    scheduler:     PhaseScheduler,
    jitter:        JitterGenerator,
    incident_rng:  StreamRng,
    manual_node:   NodeId,
    manual_drop:   f64,
    tick:          Tick,
    sequence:      u64,
    last_cycle:    Option<u64>,
    latest:        watch::Sender<Arc<Snapshot>>,
}

impl GridEngine {
    /// Build the topology and validate the anomaly site against it.
    /// Fails if the config is invalid or names nodes/edges that don't exist.
    pub fn new(
        config: &GridConfig,
        clock: Arc<dyn Clock>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> GridResult<Self> {
        config.validate()?;

        let bank = RngBank::seeded_or_random(config.seed);
        let baseline = Baseline {
            pressure: config.targets.baseline_pressure,
            acoustic: config.targets.baseline_acoustic,
        };
        let topology = Topology::generate(&mut bank.stream(StreamSlot::Topology), baseline);
        let site = AnomalySite::resolve(&topology, &config.site)?;

        let manual_node = config.site.manual_trigger_node.clone();
        if topology.node_index(&manual_node).is_none() {
            return Err(GridError::UnknownNode { id: manual_node });
        }

        log::info!(
            "engine ready: seed={} nodes={} edges={} fault edge {}",
            bank.master_seed(),
            topology.nodes().len(),
            topology.edges().len(),
            site.edge_label(),
        );

        let (latest, _) = watch::channel(Arc::new(Snapshot::capture(
            &topology,
            SystemState::Normal,
            0,
            0,
        )));
        Ok(Self {
            seed: bank.master_seed(),
            clock,
            broadcaster,
            scheduler: PhaseScheduler::new(config.cycle.clone(), config.targets.clone(), site),
            jitter: JitterGenerator::new(config.jitter_amplitude, bank.stream(StreamSlot::Jitter)),
            incident_rng: bank.stream(StreamSlot::Incident),
            manual_node,
            manual_drop: config.targets.manual_pressure_drop,
            topology,
            tick: 0,
            sequence: 0,
            last_cycle: None,
            latest,
        })
    }

    /// Advance one tick. This is the core simulation step.
    pub fn tick(&mut self) -> TickOutcome {
        let position = CyclePosition::of(self.clock.elapsed(), self.scheduler.cycle().length_secs);
        self.tick += 1;

        let continuing = self.last_cycle == Some(position.cycle);
        let wrapped = self.last_cycle.is_some_and(|c| c != position.cycle);
        let reset = wrapped || self.scheduler.in_reset_window(position.offset);
        if reset {
            self.scheduler.reset(&mut self.topology);
            log::debug!("tick={} full reset (cycle {})", self.tick, position.cycle);
        }
        self.last_cycle = Some(position.cycle);

        let skipped_fault = if reset || !continuing {
            None
        } else {
            self.scheduler.catch_up(position.offset, &mut self.topology)
        };
        let entered = self.scheduler.advance(position.offset, &mut self.topology);
        let phase = self.scheduler.current();
        self.jitter.apply(&mut self.topology, &self.scheduler, phase);

        let fault_entered =
            skipped_fault == Some(Phase::PredictedFault) || entered == Some(Phase::PredictedFault);
        let incident = fault_entered.then(|| {
            let site = self.scheduler.site();
            Arc::new(IncidentRecord::synthesize(
                &mut self.incident_rng,
                &site.pressure_node,
                &site.acoustic_node,
            ))
        });

        if let Some(record) = &incident {
            self.broadcaster.publish(&GridEvent::IncidentTriggered(Arc::clone(record)));
        }
        let snapshot = self.publish_snapshot(phase.into());

        log::debug!("tick={} t={:.1}s phase={}", self.tick, position.offset, phase.as_str());

        TickOutcome {
            tick: self.tick,
            offset: position.offset,
            phase,
            entered,
            reset,
            incident,
            snapshot,
        }
    }

    /// Run an operator command between ticks.
    pub fn apply(&mut self, command: GridCommand) -> GridResult<Arc<Snapshot>> {
        match command {
            GridCommand::TriggerAnomaly { node_id } => {
                let id = node_id.unwrap_or_else(|| self.manual_node.clone());
                let idx = self
                    .topology
                    .node_index(&id)
                    .ok_or_else(|| GridError::UnknownNode { id: id.clone() })?;
                let node = self.topology.node_mut(idx);
                node.status = NodeStatus::Critical;
                node.pressure = (node.pressure - self.manual_drop).max(0.0);
                log::warn!("manual anomaly forced on {id} (tick {})", self.tick);
                Ok(self.publish_snapshot(SystemState::Anomalous))
            }
        }
    }

    fn publish_snapshot(&mut self, state: SystemState) -> Arc<Snapshot> {
        self.sequence += 1;
        let snapshot = Arc::new(Snapshot::capture(&self.topology, state, self.tick, self.sequence));
        // Readers bootstrapping mid-publish must see this snapshot already.
        self.latest.send_replace(Arc::clone(&snapshot));
        let report = self.broadcaster.publish(&GridEvent::SnapshotUpdated(Arc::clone(&snapshot)));
        if !report.dropped.is_empty() {
            log::info!(
                "tick={} delivered={} dropped={}",
                self.tick,
                report.delivered,
                report.dropped.len()
            );
        }
        snapshot
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.latest.borrow().clone()
    }

    /// Receiver that always holds the newest snapshot. It is updated before
    /// the snapshot reaches any broadcast subscriber.
    pub fn watch_latest(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.latest.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.scheduler.current()
    }

    pub fn tick_count(&self) -> Tick {
        self.tick
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}
