//! Push-channel observers: one WebSocket per dashboard, fed by the hub.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use herald_core::ObserverId;
use herald_session::{EventHub, Subscription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

const REPLY_QUEUE: usize = 64;

/// Liveness bookkeeping for one connected observer.
pub struct Observer {
    pub id: ObserverId,
    last_seen: AtomicU64,
    cancel: CancellationToken,
}

impl Observer {
    fn new(id: ObserverId) -> Self {
        Self {
            id,
            last_seen: AtomicU64::new(now_secs()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn record_seen(&self) {
        self.last_seen.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_seen.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Resolves once the observer has been evicted.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of connected push-channel observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: DashMap<ObserverId, Arc<Observer>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ObserverId) -> Arc<Observer> {
        let observer = Arc::new(Observer::new(id.clone()));
        let _ = self.observers.insert(id, Arc::clone(&observer));
        observer
    }

    pub fn unregister(&self, id: &ObserverId) {
        if let Some((_, observer)) = self.observers.remove(id) {
            observer.cancel.cancel();
        }
    }

    pub fn count(&self) -> usize {
        self.observers.len()
    }

    pub fn ids(&self) -> Vec<ObserverId> {
        self.observers.iter().map(|e| e.key().clone()).collect()
    }

    /// Evict observers that have been silent for longer than `timeout`.
    pub fn cleanup_dead_observers(&self, timeout: Duration) -> usize {
        let dead: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(observer_id = %id, "evicted silent observer");
        }
        dead.len()
    }

    pub fn get(&self, id: &ObserverId) -> Option<Arc<Observer>> {
        self.observers.get(id).map(|e| Arc::clone(e.value()))
    }
}

/// Drive one observer socket until either side goes away or the observer is
/// evicted. Hub events and RPC replies share the outbound half; inbound
/// text frames are RPC requests.
pub async fn handle_ws_connection(
    socket: WebSocket,
    subscription: Subscription,
    hub: Arc<EventHub>,
    registry: Arc<ObserverRegistry>,
    state: Arc<HandlerState>,
    heartbeat: Duration,
) {
    let Subscription { id, mut events } = subscription;
    let observer = registry.register(id.clone());
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_QUEUE);

    let writer_observer = Arc::clone(&observer);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            let frame = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize session event");
                            continue;
                        }
                    },
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => WsMessage::Text(text.into()),
                    None => break,
                },
                _ = ping_interval.tick() => {
                    tracing::trace!(observer_id = %writer_observer.id, "sent ping");
                    WsMessage::Ping(Vec::new().into())
                }
                () = writer_observer.cancelled() => break,
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_observer = Arc::clone(&observer);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            reader_observer.record_seen();
            match msg {
                WsMessage::Text(text) => {
                    let state = Arc::clone(&state);
                    let reply_tx = reply_tx.clone();
                    let _ = tokio::spawn(async move {
                        let response = handle_request(&state, text.as_str()).await;
                        if let Ok(json) = serde_json::to_string(&response) {
                            let _ = reply_tx.send(json).await;
                        }
                    });
                }
                WsMessage::Close(_) => break,
                // Pongs only refresh liveness; axum answers pings itself.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&id);
    let _ = hub.unsubscribe(&id);
    tracing::info!(observer_id = %id, "observer disconnected");
}

async fn handle_request(state: &Arc<HandlerState>, raw: &str) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(_) => return RpcResponse::unparseable(),
    };
    let params = request.params.unwrap_or_else(|| serde_json::json!({}));
    handlers::dispatch(state, &request.method, &params, request.id).await
}

/// Periodically evict observers that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ObserverRegistry>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_observers(timeout);
                    if removed > 0 {
                        tracing::info!(removed, "dead observer cleanup");
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    })
}
