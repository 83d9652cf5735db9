//! The connection controller.
//!
//! One task owns the [`Session`] and is the only place its fields change.
//! Commands from callers, events from the protocol client and the retry
//! timer are all funnelled into that task and handled one at a time, so
//! transitions are strictly linear and at most one attempt is ever live.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use herald_core::{
    AttemptEvent, AttemptId, ClientConnection, ClientEvent, CloseSignal, Credentials,
    DisconnectReason, EventSink, ProtocolClient, RetryClass, SessionEvent, SessionState,
    SessionStatus,
};
use herald_store::CredentialStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::errors::ControllerError;
use crate::hub::EventHub;

const COMMAND_QUEUE: usize = 32;
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only view of the session, republished after every change.
#[derive(Clone, Default)]
pub struct Snapshot {
    pub status: SessionStatus,
    pub pairing_artifact: Option<String>,
    connection: Option<Arc<dyn ClientConnection>>,
}

impl Snapshot {
    /// The live connection, only while connected.
    pub fn connection(&self) -> Option<Arc<dyn ClientConnection>> {
        if self.status.state == SessionState::Connected {
            self.connection.clone()
        } else {
            None
        }
    }
}

enum Command {
    Connect { reply: oneshot::Sender<SessionState> },
    Disconnect { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Input {
    Command(Command),
    Client(AttemptEvent),
    RetryDue,
}

/// Handle to the controller task. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    hub: Arc<EventHub>,
}

impl SessionController {
    /// Spawn the controller task. The session starts `idle`.
    pub fn spawn(
        client: Arc<dyn ProtocolClient>,
        store: Arc<dyn CredentialStore>,
        hub: Arc<EventHub>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let actor = Actor {
            client,
            store,
            hub: hub.clone(),
            policy,
            session: Session::default(),
            events_tx: event_tx,
            snapshot_tx,
            retry_at: None,
        };
        let _ = tokio::spawn(actor.run(cmd_rx, event_rx));

        Self {
            commands: cmd_tx,
            snapshot: snapshot_rx,
            hub,
        }
    }

    /// Start connecting unless an attempt is already active. Returns the
    /// state right after the request was handled.
    pub async fn request_connect(&self) -> Result<SessionState, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply }).await?;
        Ok(rx.await.unwrap_or_else(|_| self.status().state))
    }

    /// Log out, wipe stored credentials and return to `idle`. No-op when idle.
    pub async fn request_disconnect(&self) -> Result<(), ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Disconnect { reply }).await?;
        let _ = rx.await;
        Ok(())
    }

    /// Close the live connection without logging out and stop the task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Only available while awaiting pairing.
    pub fn pairing_artifact(&self) -> Option<String> {
        let snap = self.snapshot.borrow();
        match snap.status.state {
            SessionState::AwaitingPairing => snap.pairing_artifact.clone(),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<Arc<dyn ClientConnection>> {
        self.snapshot.borrow().connection()
    }

    /// Receiver that observes every snapshot change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn send(&self, cmd: Command) -> Result<(), ControllerError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ControllerError::Stopped)
    }
}

#[derive(Default)]
struct Session {
    state: SessionState,
    pairing_artifact: Option<String>,
    credentials: Option<Credentials>,
    retry_count: u32,
    auth_failures: u32,
    last_disconnect_reason: Option<DisconnectReason>,
    last_error: Option<String>,
    attempt: Option<AttemptId>,
    connection: Option<Arc<dyn ClientConnection>>,
}

struct Actor {
    client: Arc<dyn ProtocolClient>,
    store: Arc<dyn CredentialStore>,
    hub: Arc<EventHub>,
    policy: ReconnectPolicy,
    session: Session,
    events_tx: mpsc::UnboundedSender<AttemptEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
    retry_at: Option<Instant>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<AttemptEvent>,
    ) {
        info!(client = self.client.name(), "session controller started");
        loop {
            let retry_at = self.retry_at;
            let input = tokio::select! {
                biased;
                Some(ev) = events.recv() => Input::Client(ev),
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Input::Command(cmd),
                    None => Input::Command(Command::Shutdown { reply: oneshot::channel().0 }),
                },
                () = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => Input::RetryDue,
            };

            let stop = matches!(input, Input::Command(Command::Shutdown { .. }));
            let outcome = AssertUnwindSafe(self.handle(input)).catch_unwind().await;
            if let Err(panic) = outcome {
                self.recover(&panic_message(&panic));
            }
            if stop {
                break;
            }
        }
        info!("session controller stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Command(Command::Connect { reply }) => self.connect(reply).await,
            Input::Command(Command::Disconnect { reply }) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Input::Command(Command::Shutdown { reply }) => {
                self.shutdown().await;
                let _ = reply.send(());
            }
            Input::Client(ev) => self.client_event(ev).await,
            Input::RetryDue => {
                self.retry_at = None;
                if self.session.state == SessionState::Disconnected {
                    self.start_attempt(None).await;
                }
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    async fn connect(&mut self, reply: oneshot::Sender<SessionState>) {
        if self.session.state.is_active() {
            debug!(state = %self.session.state, "connect ignored, attempt already active");
            let _ = reply.send(self.session.state);
            return;
        }
        if self.retry_at.is_some() {
            info!("manual connect supersedes scheduled retry");
        }
        self.session.retry_count = 0;
        self.session.auth_failures = 0;
        self.start_attempt(Some(reply)).await;
    }

    async fn disconnect(&mut self) {
        if self.session.state == SessionState::Idle {
            debug!("disconnect ignored, already idle");
            return;
        }
        self.retry_at = None;
        self.session.attempt = None;

        if let Some(conn) = self.session.connection.take() {
            let outcome = tokio::time::timeout(
                LOGOUT_TIMEOUT,
                AssertUnwindSafe(conn.logout()).catch_unwind(),
            )
            .await;
            match outcome {
                Ok(Ok(Ok(()))) => info!("logged out"),
                Ok(Ok(Err(e))) => warn!(error = %e, "logout failed, clearing local session anyway"),
                Ok(Err(panic)) => {
                    error!(panic = %panic_message(&panic), "protocol client panicked during logout")
                }
                Err(_) => warn!(
                    timeout_secs = LOGOUT_TIMEOUT.as_secs(),
                    "logout timed out, clearing local session anyway"
                ),
            }
        }

        self.session.credentials = None;
        self.session.retry_count = 0;
        self.session.auth_failures = 0;
        self.session.last_error = None;
        self.wipe_store().await;
        self.transition(SessionState::Idle, None);
    }

    async fn shutdown(&mut self) {
        self.retry_at = None;
        self.session.attempt = None;
        if let Some(conn) = self.session.connection.take() {
            if tokio::time::timeout(LOGOUT_TIMEOUT, conn.close()).await.is_err() {
                warn!("connection close timed out during shutdown");
            }
        }
        self.sync_snapshot();
    }

    // ── Attempts ────────────────────────────────────────────────────────

    async fn start_attempt(&mut self, reply: Option<oneshot::Sender<SessionState>>) {
        let automatic = reply.is_none();
        self.retry_at = None;
        self.close_connection();
        let attempt = AttemptId::new();
        self.session.attempt = Some(attempt.clone());
        self.session.last_disconnect_reason = None;
        self.session.last_error = None;
        self.transition(SessionState::Connecting, None);
        if let Some(reply) = reply {
            let _ = reply.send(SessionState::Connecting);
        }

        let credentials = match self.session.credentials.clone() {
            Some(creds) => Some(creds),
            None => match self.store.load().await {
                Ok(loaded) => loaded,
                Err(e) => {
                    error!(attempt_id = %attempt, error = %e, "credential store unavailable");
                    self.fail(DisconnectReason::Unknown, format!("credential store: {e}"));
                    return;
                }
            },
        };
        let resuming = credentials.is_some();
        self.session.credentials.clone_from(&credentials);

        info!(
            attempt_id = %attempt,
            retry_count = self.session.retry_count,
            resuming,
            "starting connection attempt"
        );

        let sink = EventSink::new(attempt.clone(), self.events_tx.clone());
        let outcome = tokio::time::timeout(
            self.policy.connect_timeout,
            AssertUnwindSafe(self.client.connect(credentials, sink)).catch_unwind(),
        )
        .await;

        match outcome {
            Ok(Ok(Ok(conn))) => {
                self.session.connection = Some(conn);
                self.sync_snapshot();
            }
            Ok(Ok(Err(e))) => {
                warn!(attempt_id = %attempt, error = %e, kind = e.error_kind(), "client failed to initialize");
                self.attempt_failed(e.classify(), e.to_string(), automatic || resuming)
                    .await;
            }
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(attempt_id = %attempt, panic = %msg, "protocol client panicked during connect");
                self.fail(DisconnectReason::Unknown, format!("client crashed: {msg}"));
            }
            Err(_) => {
                warn!(
                    attempt_id = %attempt,
                    timeout_ms = self.policy.connect_timeout.as_millis() as u64,
                    "client did not initialize in time"
                );
                let msg = format!("connect timed out after {:?}", self.policy.connect_timeout);
                self.attempt_failed(DisconnectReason::Transient, msg, automatic || resuming)
                    .await;
            }
        }
    }

    /// A connect that never produced a connection. Reconnects and resumed
    /// sessions go through the retry policy; a fresh pairing attempt fails
    /// outright so the operator sees the error.
    async fn attempt_failed(&mut self, reason: DisconnectReason, detail: String, retry: bool) {
        if retry && reason.is_retryable() {
            self.disconnected(reason, detail).await;
        } else {
            self.fail(reason, detail);
        }
    }

    // ── Client events ───────────────────────────────────────────────────

    async fn client_event(&mut self, ev: AttemptEvent) {
        let current = self.session.attempt.as_ref() == Some(&ev.attempt);
        if !current || !self.session.state.is_active() {
            debug!(
                attempt_id = %ev.attempt,
                kind = ev.event.kind(),
                state = %self.session.state,
                "dropping event from inactive attempt"
            );
            return;
        }

        match ev.event {
            ClientEvent::PairingChallenge { artifact } => self.pairing_challenge(artifact),
            ClientEvent::Opened => self.opened().await,
            ClientEvent::Closed(signal) => self.closed(signal).await,
            ClientEvent::CredentialsUpdated(creds) => self.credentials_updated(creds).await,
            ClientEvent::MessageReceived {
                from,
                payload,
                timestamp,
            } => self.hub.publish(SessionEvent::MessageReceived {
                from,
                payload,
                timestamp,
            }),
            ClientEvent::PresenceUpdated { chat, presence } => {
                self.hub.publish(SessionEvent::PresenceUpdated { chat, presence })
            }
        }
    }

    fn pairing_challenge(&mut self, artifact: String) {
        if self.session.state == SessionState::Connected {
            warn!("pairing challenge while connected, ignoring");
            return;
        }
        self.session.pairing_artifact = Some(artifact.clone());
        if self.session.state == SessionState::AwaitingPairing {
            self.sync_snapshot();
        } else {
            self.transition(SessionState::AwaitingPairing, None);
        }
        debug!("pairing artifact refreshed");
        self.hub.publish(SessionEvent::PairingReady { artifact });
    }

    async fn opened(&mut self) {
        if self.session.state == SessionState::Connected {
            return;
        }
        if let Some(creds) = self.session.credentials.clone() {
            if let Err(e) = self.store.save(&creds).await {
                error!(error = %e, "failed to persist credentials on open");
                self.fail(DisconnectReason::Unknown, format!("credential store: {e}"));
                return;
            }
        }
        self.session.retry_count = 0;
        self.session.auth_failures = 0;
        self.transition(SessionState::Connected, None);
    }

    async fn credentials_updated(&mut self, creds: Credentials) {
        if let Err(e) = self.store.save(&creds).await {
            error!(error = %e, "failed to persist updated credentials");
            self.fail(DisconnectReason::Unknown, format!("credential store: {e}"));
            return;
        }
        debug!(bytes = creds.len(), "credentials updated");
        self.session.credentials = Some(creds);
    }

    async fn closed(&mut self, signal: CloseSignal) {
        let reason = signal.classify();
        let detail = signal.describe();
        // The remote side already closed it.
        self.session.connection = None;
        warn!(
            reason = %reason,
            status_code = ?signal.status_code,
            detail = %detail,
            state = %self.session.state,
            "connection closed"
        );
        self.disconnected(reason, detail).await;
    }

    async fn disconnected(&mut self, reason: DisconnectReason, detail: String) {
        match reason.retry_class() {
            RetryClass::Reset => {
                self.session.credentials = None;
                self.session.retry_count = 0;
                self.session.auth_failures = 0;
                self.session.attempt = None;
                self.session.last_error = Some(detail);
                self.wipe_store().await;
                self.transition(SessionState::Idle, Some(reason));
            }
            RetryClass::Terminal => self.fail(reason, detail),
            RetryClass::Limited => {
                self.session.auth_failures += 1;
                if self.session.auth_failures > self.policy.auth_retry_limit {
                    warn!(
                        auth_failures = self.session.auth_failures,
                        "auth retries exhausted"
                    );
                    if self.policy.wipe_on_auth_exhausted {
                        self.session.credentials = None;
                        self.wipe_store().await;
                    }
                    self.fail(reason, detail);
                } else {
                    self.schedule_retry(reason, detail);
                }
            }
            RetryClass::Standard | RetryClass::Throttled => self.schedule_retry(reason, detail),
        }
    }

    fn schedule_retry(&mut self, reason: DisconnectReason, detail: String) {
        self.session.last_error = Some(detail);
        if self.session.retry_count >= self.policy.max_retries {
            self.transition(SessionState::Disconnected, Some(reason));
            warn!(
                retry_count = self.session.retry_count,
                max_retries = self.policy.max_retries,
                "retry budget exhausted"
            );
            let msg = format!("gave up after {} retries", self.session.retry_count);
            self.fail(reason, msg);
            return;
        }

        self.session.retry_count += 1;
        let delay = self.policy.delay_for(self.session.retry_count, reason);
        self.transition(SessionState::Disconnected, Some(reason));
        self.retry_at = Some(Instant::now() + delay);
        info!(
            retry_count = self.session.retry_count,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "reconnect scheduled"
        );
    }

    // ── Transitions ─────────────────────────────────────────────────────

    fn fail(&mut self, reason: DisconnectReason, message: String) {
        self.retry_at = None;
        self.session.attempt = None;
        self.session.last_error = Some(message);
        self.close_connection();
        self.transition(SessionState::Failed, Some(reason));
    }

    /// Last line of defence: a panic anywhere in a handler parks the session.
    fn recover(&mut self, msg: &str) {
        error!(panic = %msg, state = %self.session.state, "controller handler panicked");
        self.fail(DisconnectReason::Unknown, format!("internal error: {msg}"));
    }

    fn transition(&mut self, next: SessionState, reason: Option<DisconnectReason>) {
        let prev = self.session.state;
        self.session.state = next;
        if next != SessionState::AwaitingPairing {
            self.session.pairing_artifact = None;
        }
        if matches!(next, SessionState::Idle | SessionState::Disconnected | SessionState::Failed) {
            self.close_connection();
        }
        if let Some(reason) = reason {
            self.session.last_disconnect_reason = Some(reason);
        }

        info!(
            from = %prev,
            to = %next,
            reason = reason.map(DisconnectReason::as_str),
            attempt_id = self.session.attempt.as_ref().map(AttemptId::as_str),
            retry_count = self.session.retry_count,
            "session state changed"
        );
        self.sync_snapshot();
        self.hub.publish(SessionEvent::state_changed(next, reason));
    }

    /// Drop the live connection, asking the client to close it.
    fn close_connection(&mut self) {
        if let Some(conn) = self.session.connection.take() {
            let _ = tokio::spawn(async move { conn.close().await });
        }
    }

    async fn wipe_store(&mut self) {
        if let Err(e) = self.store.wipe().await {
            error!(error = %e, "failed to wipe credential store");
            self.session.last_error = Some(format!("credential wipe failed: {e}"));
        }
    }

    fn sync_snapshot(&self) {
        let s = &self.session;
        let _ = self.snapshot_tx.send_replace(Snapshot {
            status: SessionStatus {
                state: s.state,
                has_pairing_artifact: s.pairing_artifact.is_some(),
                retry_count: s.retry_count,
                last_disconnect_reason: s.last_disconnect_reason,
                last_error: s.last_error.clone(),
                attempt_id: s.attempt.clone(),
            },
            pairing_artifact: s.pairing_artifact.clone(),
            connection: s.connection.clone(),
        });
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockConnect};
    use herald_core::ClientError;
    use herald_store::SqliteCredentialStore;

    fn setup(client: &MockClient) -> SessionController {
        SessionController::spawn(
            Arc::new(client.clone()),
            Arc::new(SqliteCredentialStore::in_memory().unwrap()),
            Arc::new(EventHub::new(64)),
            ReconnectPolicy {
                jitter_factor: 0.0,
                ..Default::default()
            },
        )
    }

    async fn wait_for(ctl: &SessionController, state: SessionState) -> SessionStatus {
        let mut rx = ctl.watch();
        let snap = rx
            .wait_for(|s| s.status.state == state)
            .await
            .unwrap()
            .clone();
        snap.status
    }

    #[tokio::test]
    async fn starts_idle() {
        let ctl = setup(&MockClient::new());
        assert_eq!(ctl.status().state, SessionState::Idle);
        assert!(ctl.pairing_artifact().is_none());
        assert!(ctl.connection().is_none());
    }

    #[tokio::test]
    async fn connect_reports_connecting() {
        let client = MockClient::new();
        let ctl = setup(&client);
        assert_eq!(ctl.request_connect().await.unwrap(), SessionState::Connecting);
        assert_eq!(client.connect_count(), 1);
    }

    #[tokio::test]
    async fn pairing_artifact_only_while_awaiting() {
        let client = MockClient::new();
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();
        client.emit(ClientEvent::PairingChallenge {
            artifact: "XYZ".into(),
        });
        let status = wait_for(&ctl, SessionState::AwaitingPairing).await;
        assert!(status.has_pairing_artifact);
        assert_eq!(ctl.pairing_artifact().as_deref(), Some("XYZ"));

        client.emit(ClientEvent::Opened);
        let status = wait_for(&ctl, SessionState::Connected).await;
        assert!(!status.has_pairing_artifact);
        assert!(ctl.pairing_artifact().is_none());
        assert!(ctl.connection().is_some());
    }

    #[tokio::test]
    async fn init_failure_goes_to_failed_with_classified_reason() {
        let client = MockClient::new();
        client.push_connect(MockConnect::Fail(ClientError::AuthRejected("corrupt".into())));
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();

        let status = wait_for(&ctl, SessionState::Failed).await;
        assert_eq!(status.last_disconnect_reason, Some(DisconnectReason::AuthRejected));
        assert!(status.last_error.unwrap().contains("corrupt"));
    }

    #[tokio::test]
    async fn client_panic_degrades_to_failed_unknown() {
        let client = MockClient::new();
        client.push_connect(MockConnect::Panic);
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();

        let status = wait_for(&ctl, SessionState::Failed).await;
        assert_eq!(status.last_disconnect_reason, Some(DisconnectReason::Unknown));
        assert!(ctl.is_running());

        // Manual reconnect still works afterwards.
        assert_eq!(ctl.request_connect().await.unwrap(), SessionState::Connecting);
        assert_eq!(client.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_fails_attempt() {
        let client = MockClient::new();
        client.push_connect(MockConnect::Hang);
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();

        let status = wait_for(&ctl, SessionState::Failed).await;
        assert_eq!(status.last_disconnect_reason, Some(DisconnectReason::Transient));
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let client = MockClient::new();
        let ctl = setup(&client);
        let mut sub = ctl.hub().subscribe();
        let _ = sub.events.recv().await;

        ctl.request_disconnect().await.unwrap();
        assert_eq!(ctl.status().state, SessionState::Idle);
        assert!(sub.events.try_recv().is_err(), "no transition broadcast");
        assert_eq!(client.logout_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_logs_out_and_returns_idle() {
        let client = MockClient::new();
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();
        client.emit(ClientEvent::Opened);
        wait_for(&ctl, SessionState::Connected).await;

        ctl.request_disconnect().await.unwrap();
        assert_eq!(ctl.status().state, SessionState::Idle);
        assert_eq!(client.logout_count(), 1);
    }

    #[tokio::test]
    async fn events_from_stale_attempt_are_dropped() {
        let client = MockClient::new();
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();
        let stale = client.sink().unwrap();
        ctl.request_disconnect().await.unwrap();

        // Client events are drained before the next command is taken.
        stale.emit(ClientEvent::Opened);
        ctl.request_connect().await.unwrap();
        stale.emit(ClientEvent::Opened);
        ctl.request_connect().await.unwrap();
        assert_eq!(ctl.status().state, SessionState::Connecting);
        assert_eq!(client.connect_count(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_without_logout() {
        let client = MockClient::new();
        let ctl = setup(&client);
        ctl.request_connect().await.unwrap();
        client.emit(ClientEvent::Opened);
        wait_for(&ctl, SessionState::Connected).await;

        ctl.shutdown().await;
        ctl.commands.closed().await;
        assert_eq!(client.logout_count(), 0);
        assert_eq!(client.close_count(), 1);
        assert!(matches!(ctl.request_connect().await, Err(ControllerError::Stopped)));
    }

    #[test]
    fn panic_message_extracts_payload() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&boxed), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&boxed), "unknown panic");
    }
}
