//! Streaming gateway: HTTP surface over the broadcaster, incident cache
//! and tick runner.
//!
//! RULES:
//!   - Handlers never touch the engine directly. Reads go through the
//!     runner's latest snapshot or the incident cache; the one mutating
//!     route sends a command to the runner.
//!   - Every stream connection owns a bounded queue. The broadcaster
//!     callback only ever calls try_send on it.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use hydrograph_core::{
    broadcast::{EventBroadcaster, Subscription},
    error::{DeliveryError, GridError},
    event::{EventKind, GridEvent},
    incident::{IncidentCache, IncidentRecord},
    phase::SystemState,
    runner::RunnerClient,
    snapshot::Snapshot,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::cors::CorsLayer;

pub struct AppStateInner {
    pub broadcaster: Arc<EventBroadcaster>,
    pub incidents:   Arc<IncidentCache>,
    pub runner:      RunnerClient,
    /// Per-connection queue depth before a slow client is dropped.
    pub queue_depth: usize,
    /// Open stream connections. Internal broadcaster subscribers are not counted.
    pub clients:     Arc<AtomicUsize>,
    pub start_time:  Instant,
}

pub type SharedState = Arc<AppStateInner>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/stream/network", get(stream_network))
        .route("/api/agent/dispatch", get(dispatch))
        .route("/api/trigger-anomaly", post(trigger_anomaly))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Stream ───────────────────────────────────────────────────────────────────

/// One frame on the network stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum StreamMessage {
    Init(Arc<Snapshot>),
    Update(Arc<Snapshot>),
}

struct Connection {
    init:          Option<Arc<Snapshot>>,
    cursor:        u64,
    rx:            mpsc::Receiver<Arc<Snapshot>>,
    clients:       Arc<AtomicUsize>,
    _subscription: Subscription,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
        log::info!("stream client disconnected (last sequence {})", self.cursor);
    }
}

/// `init` with the latest snapshot, then one `update` per published
/// snapshot. The registration is taken before the init snapshot is read,
/// so nothing published in between is lost; anything at or before the
/// init sequence is skipped, so nothing is repeated or reordered.
pub fn snapshot_stream(state: &AppStateInner) -> impl Stream<Item = StreamMessage> + Send + 'static {
    let (tx, rx) = mpsc::channel::<Arc<Snapshot>>(state.queue_depth);
    let subscription = state
        .broadcaster
        .subscribe_guarded(EventKind::SnapshotUpdated, move |event| match event {
            GridEvent::SnapshotUpdated(snapshot) => {
                tx.try_send(Arc::clone(snapshot)).map_err(|e| match e {
                    TrySendError::Full(_) => DeliveryError::QueueFull,
                    TrySendError::Closed(_) => DeliveryError::Disconnected,
                })
            }
            GridEvent::IncidentTriggered(_) => Ok(()),
        });

    let init = state.runner.latest();
    log::info!(
        "stream client connected ({:?}), init at tick {} ({:?})",
        subscription.id(),
        init.tick,
        init.system_state
    );

    state.clients.fetch_add(1, Ordering::Relaxed);
    let connection = Connection {
        cursor: init.sequence,
        init: Some(init),
        rx,
        clients: Arc::clone(&state.clients),
        _subscription: subscription,
    };

    futures::stream::unfold(connection, |mut conn| async move {
        if let Some(init) = conn.init.take() {
            return Some((StreamMessage::Init(init), conn));
        }
        loop {
            // None: the broadcaster dropped us (queue full) or closed.
            let snapshot = conn.rx.recv().await?;
            if snapshot.sequence > conn.cursor {
                conn.cursor = snapshot.sequence;
                return Some((StreamMessage::Update(snapshot), conn));
            }
        }
    })
}

async fn stream_network(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = snapshot_stream(&state).filter_map(|message| async move {
        match Event::default().json_data(&message) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                log::error!("failed to encode stream frame: {e}");
                None
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ── Incident poll ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub has_dispatch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch:     Option<Arc<IncidentRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message:      Option<&'static str>,
}

async fn dispatch(State(state): State<SharedState>) -> Json<DispatchResponse> {
    Json(match state.incidents.current() {
        Some(record) => DispatchResponse {
            has_dispatch: true,
            dispatch:     Some(record),
            message:      None,
        },
        None => DispatchResponse {
            has_dispatch: false,
            dispatch:     None,
            message:      Some("No active anomalous incidents requiring dispatch."),
        },
    })
}

// ── Manual trigger ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success:      bool,
    pub message:      String,
    pub system_state: SystemState,
    pub tick:         u64,
}

async fn trigger_anomaly(
    State(state): State<SharedState>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let snapshot = state.runner.trigger_anomaly(request.node_id).await?;
    Ok(Json(TriggerResponse {
        success:      true,
        message:      "Anomaly Triggered Manually".into(),
        system_state: snapshot.system_state,
        tick:         snapshot.tick,
    }))
}

// ── Health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status:          &'static str,
    pub simulator_state: SystemState,
    pub tick:            u64,
    pub subscribers:     usize,
    pub uptime_secs:     u64,
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let latest = state.runner.latest();
    Json(HealthResponse {
        status:          "active",
        simulator_state: latest.system_state,
        tick:            latest.tick,
        subscribers:     state.clients.load(Ordering::Relaxed),
        uptime_secs:     state.start_time.elapsed().as_secs(),
    })
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GridError> for ApiError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::UnknownNode { .. } => Self::NotFound(err.to_string()),
            GridError::RunnerStopped => Self::ServiceUnavailable(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {self}");
        }
        let body = serde_json::json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrograph_core::{
        clock::ManualClock, config::GridConfig, engine::GridEngine, runner::{RunnerHandle, TickRunner},
    };
    use std::time::Duration;

    struct Fixture {
        state:  SharedState,
        clock:  ManualClock,
        handle: RunnerHandle,
    }

    fn fixture(start_secs: f64, queue_depth: usize) -> Fixture {
        let clock = ManualClock::new();
        clock.set_secs(start_secs);
        let broadcaster = EventBroadcaster::shared();
        let incidents = Arc::new(IncidentCache::new());
        incidents.attach(&broadcaster);
        let config = GridConfig { seed: Some(21), ..GridConfig::default() };
        let engine = GridEngine::new(&config, Arc::new(clock.clone()), Arc::clone(&broadcaster))
            .expect("engine");
        let handle = TickRunner::spawn(engine, Duration::from_millis(5));
        let state = Arc::new(AppStateInner {
            broadcaster,
            incidents,
            runner: handle.client(),
            queue_depth,
            clients: Arc::default(),
            start_time: Instant::now(),
        });
        Fixture { state, clock, handle }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn init_then_updates_in_order() {
        let fx = fixture(10.0, 64);
        let mut stream = Box::pin(snapshot_stream(&fx.state));

        let init = match stream.next().await {
            Some(StreamMessage::Init(s)) => s,
            other => panic!("expected init, got {other:?}"),
        };
        let mut last = init.sequence;
        for _ in 0..5 {
            match tokio::time::timeout(Duration::from_secs(2), stream.next()).await {
                Ok(Some(StreamMessage::Update(s))) => {
                    assert!(s.sequence > last);
                    last = s.sequence;
                }
                other => panic!("expected update, got {other:?}"),
            }
        }
        drop(stream);
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn late_client_bootstraps_into_normal() {
        let fx = fixture(200.0, 64);
        let runner = fx.state.runner.clone();
        wait_for(|| runner.latest().tick >= 1).await;

        let mut stream = Box::pin(snapshot_stream(&fx.state));
        match stream.next().await {
            Some(StreamMessage::Init(s)) => assert_eq!(s.system_state, SystemState::Normal),
            other => panic!("expected init, got {other:?}"),
        }
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_registration() {
        let fx = fixture(0.0, 64);
        let before = fx.state.broadcaster.subscriber_count(EventKind::SnapshotUpdated);
        let stream = snapshot_stream(&fx.state);
        assert_eq!(fx.state.broadcaster.subscriber_count(EventKind::SnapshotUpdated), before + 1);
        drop(stream);
        assert_eq!(fx.state.broadcaster.subscriber_count(EventKind::SnapshotUpdated), before);
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stalled_client_is_disconnected() {
        let fx = fixture(0.0, 1);
        let before = fx.state.broadcaster.subscriber_count(EventKind::SnapshotUpdated);
        let mut stream = Box::pin(snapshot_stream(&fx.state));
        assert!(matches!(stream.next().await, Some(StreamMessage::Init(_))));

        // Never read: the one-slot queue overflows and the broadcaster drops us.
        let broadcaster = Arc::clone(&fx.state.broadcaster);
        wait_for(|| broadcaster.subscriber_count(EventKind::SnapshotUpdated) == before).await;

        // Whatever was queued drains, then the stream ends.
        let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect::<Vec<_>>())
            .await
            .expect("stream ends after disconnect");
        assert!(rest.len() <= 1);
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn frames_carry_type_discriminator() {
        let fx = fixture(0.0, 8);
        let snapshot = fx.state.runner.latest();
        let init = serde_json::to_value(StreamMessage::Init(Arc::clone(&snapshot))).unwrap();
        assert_eq!(init["type"], "init");
        assert!(init["payload"]["nodes"].is_array());
        assert!(init["payload"]["edges"].is_array());
        assert!(init["payload"]["systemState"].is_string());
        let update = serde_json::to_value(StreamMessage::Update(snapshot)).unwrap();
        assert_eq!(update["type"], "update");
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_reflects_the_cache() {
        let fx = fixture(10.0, 8);
        let Json(empty) = dispatch(State(Arc::clone(&fx.state))).await;
        assert!(!empty.has_dispatch);
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["hasDispatch"], false);
        assert!(json.get("dispatch").is_none());

        fx.clock.set_secs(95.0);
        let incidents = Arc::clone(&fx.state.incidents);
        wait_for(|| incidents.current().is_some()).await;

        let Json(full) = dispatch(State(Arc::clone(&fx.state))).await;
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["hasDispatch"], true);
        assert_eq!(json["dispatch"]["severity"], "CRITICAL");
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn trigger_routes_through_runner() {
        let fx = fixture(10.0, 8);
        let Json(ok) = trigger_anomaly(State(Arc::clone(&fx.state)), None).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.system_state, SystemState::Anomalous);

        let err = trigger_anomaly(
            State(Arc::clone(&fx.state)),
            Some(Json(TriggerRequest { node_id: Some("N77".into()) })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        fx.handle.shutdown().await.unwrap();
        let err = trigger_anomaly(State(Arc::clone(&fx.state)), None).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_state() {
        let fx = fixture(70.0, 8);
        let runner = fx.state.runner.clone();
        wait_for(|| runner.latest().tick >= 1).await;
        let Json(h) = health(State(Arc::clone(&fx.state))).await;
        assert_eq!(h.status, "active");
        assert_eq!(h.simulator_state, SystemState::PhysicalAnomaly);
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn health_counts_only_stream_clients() {
        let fx = fixture(10.0, 8);
        let Json(h) = health(State(Arc::clone(&fx.state))).await;
        assert_eq!(h.subscribers, 0, "incident cache registration must not count");

        let first = snapshot_stream(&fx.state);
        let second = snapshot_stream(&fx.state);
        let Json(h) = health(State(Arc::clone(&fx.state))).await;
        assert_eq!(h.subscribers, 2);

        drop(first);
        let Json(h) = health(State(Arc::clone(&fx.state))).await;
        assert_eq!(h.subscribers, 1);

        drop(second);
        let Json(h) = health(State(Arc::clone(&fx.state))).await;
        assert_eq!(h.subscribers, 0);
        fx.handle.shutdown().await.unwrap();
    }
}
