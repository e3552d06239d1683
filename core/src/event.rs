//! Broadcast events: everything the engine tells the outside world.
//!
//! RULE: Payloads are immutable and shared by `Arc`.
//! Subscribers receive a reference; they can never mutate engine state.

use crate::{incident::IncidentRecord, snapshot::Snapshot};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum GridEvent {
    /// Fires every tick, and once per manual trigger.
    SnapshotUpdated(Arc<Snapshot>),
    /// Fires once per cycle, on entry into PREDICTED_FAULT.
    IncidentTriggered(Arc<IncidentRecord>),
}

impl GridEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SnapshotUpdated(_)   => EventKind::SnapshotUpdated,
            Self::IncidentTriggered(_) => EventKind::IncidentTriggered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SnapshotUpdated,
    IncidentTriggered,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SnapshotUpdated   => "snapshot_updated",
            Self::IncidentTriggered => "incident_triggered",
        }
    }
}
