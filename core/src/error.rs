use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Config file error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Node '{id}' not found in topology")]
    UnknownNode { id: String },

    #[error("No edge connects '{a}' and '{b}'")]
    MissingEdge { a: String, b: String },

    #[error("Tick runner has stopped")]
    RunnerStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type GridResult<T> = Result<T, GridError>;

/// Why a single subscriber could not take an event.
/// Any of these removes the subscriber from the broadcaster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber queue is full")]
    QueueFull,

    #[error("subscriber has disconnected")]
    Disconnected,

    #[error("subscriber rejected event: {0}")]
    Rejected(String),
}
