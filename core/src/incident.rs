//! Incident records and the single-slot incident cache.
//!
//! The engine synthesizes one record per cycle, on entry into
//! PREDICTED_FAULT. The cache holds it until a NORMAL snapshot arrives.

use crate::{
    broadcast::EventBroadcaster,
    event::{EventKind, GridEvent},
    phase::SystemState,
    rng::StreamRng,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Incident ids are drawn from `INC-0`..`INC-9999`.
const INCIDENT_ID_SPACE: u64 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentRecord {
    pub id:        String,
    pub timestamp: DateTime<Utc>,
    pub severity:  Severity,
    pub event:     String,
    pub report:    String,
}

impl IncidentRecord {
    pub fn synthesize(rng: &mut StreamRng, pressure_node: &str, acoustic_node: &str) -> Self {
        let edge = format!("{pressure_node}-{acoustic_node}");
        Self {
            id:        format!("INC-{}", rng.next_u64_below(INCIDENT_ID_SPACE)),
            timestamp: Utc::now(),
            severity:  Severity::Critical,
            event:     format!("Virtual Leak Predicted (Edge {edge})"),
            report:    render_report(pressure_node, acoustic_node, &edge),
        }
    }
}

fn render_report(pressure_node: &str, acoustic_node: &str, edge: &str) -> String {
    format!(
        "HydroGraph Agent Analysis:\n\
         A high-probability unmonitored leak has been localised to pipe segment {edge}, \
         between {pressure_node} (sustained pressure drop) and {acoustic_node} (acoustic spike).\n\
         Location context: subsurface pipeline cross-section.\n\
         Recommended action: dispatch field engineers to segment {edge} and close the \
         isolation valves on either side of it."
    )
}

#[derive(Debug, Default)]
pub struct IncidentCache {
    slot: RwLock<Option<Arc<IncidentRecord>>>,
}

impl IncidentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the cache with the broadcaster: incident events fill the
    /// slot, NORMAL snapshots empty it. Both registrations last until the
    /// broadcaster is closed.
    pub fn attach(self: &Arc<Self>, broadcaster: &EventBroadcaster) {
        let cache = Arc::clone(self);
        broadcaster.subscribe(EventKind::IncidentTriggered, move |event| {
            if let GridEvent::IncidentTriggered(record) = event {
                log::info!("incident {} cached ({})", record.id, record.event);
                cache.set(Arc::clone(record));
            }
            Ok(())
        });

        let cache = Arc::clone(self);
        broadcaster.subscribe(EventKind::SnapshotUpdated, move |event| {
            if let GridEvent::SnapshotUpdated(snapshot) = event {
                if snapshot.system_state == SystemState::Normal {
                    cache.clear();
                }
            }
            Ok(())
        });
    }

    pub fn current(&self) -> Option<Arc<IncidentRecord>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_none()
    }

    fn set(&self, record: Arc<IncidentRecord>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }

    fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            log::info!("incident {} cleared on cycle reset", old.id);
        }
    }
}
