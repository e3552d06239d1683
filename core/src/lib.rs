//! HydroGraph grid simulator core.
//!
//! A scripted, cyclic water-grid simulation and the broadcaster that fans
//! its snapshots out to observers. See `engine` for the per-tick order.

pub mod broadcast;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod incident;
pub mod jitter;
pub mod phase;
pub mod rng;
pub mod runner;
pub mod snapshot;
pub mod topology;
pub mod types;
