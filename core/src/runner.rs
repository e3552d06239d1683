//! Tick runner: owns the engine on one tokio task and drives it on a
//! fixed interval.
//!
//! RULE: The runner task is the engine's only owner. Commands from other
//! tasks are queued and applied between ticks, so a manual override can
//! never race a cycle reset.

use crate::{
    command::{GridCommand, QueuedCommand},
    engine::GridEngine,
    error::{GridError, GridResult},
    snapshot::Snapshot,
    types::NodeId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const COMMAND_QUEUE: usize = 16;

/// Cheap, cloneable access to a running engine.
#[derive(Clone)]
pub struct RunnerClient {
    commands: mpsc::Sender<QueuedCommand>,
    latest:   watch::Receiver<Arc<Snapshot>>,
}

impl RunnerClient {
    /// The most recently published snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.latest.borrow().clone()
    }

    pub async fn send(&self, command: GridCommand) -> GridResult<Arc<Snapshot>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(QueuedCommand { command, reply })
            .await
            .map_err(|_| GridError::RunnerStopped)?;
        rx.await.map_err(|_| GridError::RunnerStopped)?
    }

    pub async fn trigger_anomaly(&self, node_id: Option<NodeId>) -> GridResult<Arc<Snapshot>> {
        self.send(GridCommand::TriggerAnomaly { node_id }).await
    }
}

/// Stop handle for the runner task. Dropping it also stops the runner.
pub struct RunnerHandle {
    client: RunnerClient,
    stop:   oneshot::Sender<()>,
    join:   JoinHandle<GridEngine>,
}

impl RunnerHandle {
    pub fn client(&self) -> RunnerClient {
        self.client.clone()
    }

    /// Stop ticking and hand the engine back.
    pub async fn shutdown(self) -> GridResult<GridEngine> {
        // The task may already be gone; join tells us either way.
        let _ = self.stop.send(());
        self.join
            .await
            .map_err(|e| GridError::Other(anyhow::anyhow!("tick runner task failed: {e}")))
    }
}

pub struct TickRunner;

impl TickRunner {
    /// Spawn the tick loop. Must be called inside a tokio runtime.
    /// The first tick fires immediately.
    pub fn spawn(mut engine: GridEngine, interval: Duration) -> RunnerHandle {
        let (command_tx, mut command_rx) = mpsc::channel::<QueuedCommand>(COMMAND_QUEUE);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let latest = engine.watch_latest();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("tick runner started ({}ms cadence)", interval.as_millis());

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    Some(queued) = command_rx.recv() => {
                        let result = engine.apply(queued.command);
                        // Caller may have given up waiting; nothing to do then.
                        let _ = queued.reply.send(result);
                    }
                    _ = ticker.tick() => {
                        engine.tick();
                    }
                }
            }

            log::info!("tick runner stopped after {} ticks", engine.tick_count());
            engine
        });

        RunnerHandle {
            client: RunnerClient { commands: command_tx, latest },
            stop: stop_tx,
            join,
        }
    }
}
