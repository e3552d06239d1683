use crate::{error::GridResult, snapshot::Snapshot, types::NodeId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Out-of-schedule operator commands.
/// They run on the tick runner, between ticks, never concurrently with one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum GridCommand {
    /// Force one node critical and publish immediately. `None` targets
    /// the configured manual-trigger node.
    TriggerAnomaly {
        #[serde(default)]
        node_id: Option<NodeId>,
    },
}

/// A command waiting for the runner, with the channel its result goes back on.
#[derive(Debug)]
pub struct QueuedCommand {
    pub command: GridCommand,
    pub reply:   oneshot::Sender<GridResult<Arc<Snapshot>>>,
}
