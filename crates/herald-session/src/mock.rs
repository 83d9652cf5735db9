//! Scriptable protocol client for deterministic tests without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::{
    ClientConnection, ClientError, ClientEvent, Credentials, DeliveryId, EventSink, ProtocolClient,
};
use parking_lot::Mutex;

/// Outcome of the next `connect()` call.
#[derive(Clone, Debug)]
pub enum MockConnect {
    /// Hand back a connection; events are injected with [`MockClient::emit`].
    Ok,
    /// Fail to initialize with the given error.
    Fail(ClientError),
    Panic,
    /// Never resolve.
    Hang,
}

#[derive(Default)]
struct MockState {
    connect_script: Mutex<VecDeque<MockConnect>>,
    sinks: Mutex<Vec<EventSink>>,
    credentials_seen: Mutex<Vec<Option<Credentials>>>,
    sent: Mutex<Vec<(String, String)>>,
    send_failures: Mutex<HashMap<String, ClientError>>,
    send_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    logouts: AtomicUsize,
    closes: AtomicUsize,
    next_delivery: AtomicU64,
}

/// Mock client. Clones share state, so a test keeps one handle while the
/// controller owns another.
#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future `connect()`. Unscripted calls succeed.
    pub fn push_connect(&self, outcome: MockConnect) {
        self.state.connect_script.lock().push_back(outcome);
    }

    /// Emit through the most recent attempt's sink.
    pub fn emit(&self, event: ClientEvent) -> bool {
        match self.sink() {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// The sink handed to the most recent `connect()`.
    pub fn sink(&self) -> Option<EventSink> {
        self.state.sinks.lock().last().cloned()
    }

    /// Make sends to `target` fail with `error`.
    pub fn fail_sends_to(&self, target: &str, error: ClientError) {
        let _ = self
            .state
            .send_failures
            .lock()
            .insert(target.to_string(), error);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.state.send_delay.lock() = Some(delay);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::Relaxed)
    }

    pub fn logout_count(&self) -> usize {
        self.state.logouts.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::Relaxed)
    }

    /// Credentials passed to each `connect()`, in call order.
    pub fn credentials_seen(&self) -> Vec<Option<Credentials>> {
        self.state.credentials_seen.lock().clone()
    }

    /// Successful sends as `(target, payload)`, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.sent.lock().clone()
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        credentials: Option<Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn ClientConnection>, ClientError> {
        let _ = self.state.connects.fetch_add(1, Ordering::Relaxed);
        self.state.credentials_seen.lock().push(credentials);
        self.state.sinks.lock().push(sink);

        let outcome = self
            .state
            .connect_script
            .lock()
            .pop_front()
            .unwrap_or(MockConnect::Ok);
        match outcome {
            MockConnect::Ok => Ok(Arc::new(MockConnection {
                state: self.state.clone(),
            })),
            MockConnect::Fail(e) => Err(e),
            MockConnect::Panic => panic!("mock client exploded"),
            MockConnect::Hang => futures::future::pending().await,
        }
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl ClientConnection for MockConnection {
    async fn send_text(&self, target: &str, payload: &str) -> Result<DeliveryId, ClientError> {
        let delay = *self.state.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.state.send_failures.lock().get(target).cloned();
        if let Some(err) = failure {
            return Err(err);
        }
        self.state
            .sent
            .lock()
            .push((target.to_string(), payload.to_string()));
        let n = self.state.next_delivery.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(DeliveryId::from_raw(format!("MOCK{n:04}")))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let _ = self.state.logouts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) {
        let _ = self.state.closes.fetch_add(1, Ordering::Relaxed);
    }
}
