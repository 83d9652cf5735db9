//! Protocol client backed by a sidecar process.
//!
//! The messaging library runs in a child process and talks newline-delimited
//! JSON over stdio. Each `connect()` spawns a fresh child; the child is
//! killed when its connection is dropped.
//!
//! Outbound (one object per line):
//! `{"op":"connect","credentials":..}`, `{"op":"send","id":1,"to":..,"text":..}`,
//! `{"op":"logout"}`, `{"op":"close"}`.
//!
//! Inbound: `qr`, `open`, `close`, `creds`, `message`, `presence`, `sent`,
//! `send_error` events, tagged by the `event` field.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use herald_core::{
    ClientConnection, ClientError, ClientEvent, CloseSignal, Credentials, DeliveryId, EventSink,
    ProtocolClient,
};
use herald_settings::BridgeSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status reported when the sidecar goes away without saying why.
const CONNECTION_LOST: u16 = 428;

#[derive(Clone, Debug)]
pub struct SidecarConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl From<&BridgeSettings> for SidecarConfig {
    fn from(s: &BridgeSettings) -> Self {
        Self {
            command: s.command.clone(),
            args: s.args.clone(),
            working_dir: s.working_dir.as_ref().map(PathBuf::from),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Outbound<'a> {
    Connect { credentials: Option<&'a str> },
    Send { id: u64, to: &'a str, text: &'a str },
    Logout,
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Inbound {
    Qr {
        data: String,
    },
    Open,
    Close {
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    Creds {
        data: Value,
    },
    Message {
        from: String,
        text: String,
        /// Milliseconds since the epoch.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Presence {
        chat: String,
        #[serde(default)]
        data: Value,
    },
    Sent {
        id: u64,
        #[serde(rename = "messageId")]
        message_id: String,
    },
    SendError {
        id: u64,
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<DeliveryId, ClientError>>>>>;

pub struct SidecarClient {
    config: SidecarConfig,
}

impl SidecarClient {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProtocolClient for SidecarClient {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn connect(
        &self,
        credentials: Option<Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn ClientConnection>, ClientError> {
        let mut cmd = Command::new(&self.config.command);
        let _ = cmd
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            let _ = cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::Protocol(format!("spawn {}: {e}", self.config.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Protocol("sidecar stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Protocol("sidecar stdout unavailable".into()))?;

        info!(
            attempt_id = %sink.attempt(),
            pid = ?child.id(),
            command = %self.config.command,
            "sidecar started"
        );

        let conn = SidecarConnection::start(stdout, stdin, sink, Some(child));
        conn.write(&Outbound::Connect {
            credentials: credentials.as_ref().map(Credentials::expose),
        })
        .await?;
        Ok(Arc::new(conn))
    }
}

/// One live sidecar session: a writer for commands and a reader task that
/// turns sidecar output into client events.
pub struct SidecarConnection {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    _child: Option<Child>,
}

impl SidecarConnection {
    /// Wire a connection over any byte streams. `child`, if given, is kept
    /// alive (and killed) with the connection.
    pub fn start<R, W>(reader: R, writer: W, sink: EventSink, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(reader, sink, pending.clone()));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(0),
            reader,
            _child: child,
        }
    }

    async fn write(&self, msg: &Outbound<'_>) -> Result<(), ClientError> {
        let mut line =
            serde_json::to_vec(msg).map_err(|e| ClientError::Protocol(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| ClientError::Network(format!("sidecar write: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| ClientError::Network(format!("sidecar flush: {e}")))
    }
}

#[async_trait]
impl ClientConnection for SidecarConnection {
    async fn send_text(&self, target: &str, payload: &str) -> Result<DeliveryId, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        self.write(&Outbound::Send {
            id,
            to: target,
            text: payload,
        })
        .await?;

        rx.await.unwrap_or(Err(ClientError::Closed))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.write(&Outbound::Logout).await
    }

    async fn close(&self) {
        if let Err(e) = self.write(&Outbound::Close).await {
            debug!(error = %e, "sidecar already gone on close");
        }
    }
}

/// Frees a send's correlation slot however the send ends, including when the
/// caller gives up and drops the future.
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let _ = self.pending.lock().remove(&self.id);
    }
}

impl Drop for SidecarConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(reader: R, sink: EventSink, pending: Pending)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let exit_reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Inbound>(line) {
                    Ok(msg) => dispatch(msg, &sink, &pending),
                    Err(e) => warn!(error = %e, "unparseable sidecar line, skipping"),
                }
            }
            Ok(None) => break "sidecar exited".to_string(),
            Err(e) => break format!("sidecar read failed: {e}"),
        }
    };

    info!(attempt_id = %sink.attempt(), reason = %exit_reason, "sidecar stream ended");
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(ClientError::Closed));
    }
    let _ = sink.emit(ClientEvent::Closed(CloseSignal {
        status_code: Some(CONNECTION_LOST),
        message: Some(exit_reason),
    }));
}

fn dispatch(msg: Inbound, sink: &EventSink, pending: &Pending) {
    let event = match msg {
        Inbound::Qr { data } => ClientEvent::PairingChallenge { artifact: data },
        Inbound::Open => ClientEvent::Opened,
        Inbound::Close {
            status_code,
            message,
        } => ClientEvent::Closed(CloseSignal {
            status_code,
            message,
        }),
        Inbound::Creds { data } => {
            let material = match data {
                Value::String(s) => s,
                other => other.to_string(),
            };
            ClientEvent::CredentialsUpdated(Credentials::new(material))
        }
        Inbound::Message {
            from,
            text,
            timestamp,
        } => ClientEvent::MessageReceived {
            from,
            payload: text,
            timestamp: timestamp.and_then(from_millis).unwrap_or_else(Utc::now),
        },
        Inbound::Presence { chat, data } => ClientEvent::PresenceUpdated {
            chat,
            presence: data,
        },
        Inbound::Sent { id, message_id } => {
            resolve(pending, id, Ok(DeliveryId::from_raw(message_id)));
            return;
        }
        Inbound::SendError { id, code, message } => {
            resolve(pending, id, Err(send_error(code.as_deref(), message)));
            return;
        }
    };
    let _ = sink.emit(event);
}

fn resolve(pending: &Pending, id: u64, result: Result<DeliveryId, ClientError>) {
    match pending.lock().remove(&id) {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!(id, "send result for unknown or abandoned request"),
    }
}

fn send_error(code: Option<&str>, message: String) -> ClientError {
    match code {
        Some("invalid_target") => ClientError::InvalidTarget(message),
        Some("rate_limited") => ClientError::RateLimited,
        Some("not_authorized") => ClientError::AuthRejected(message),
        Some("closed") => ClientError::Closed,
        Some("network") => ClientError::Network(message),
        _ => ClientError::Protocol(message),
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{AttemptEvent, AttemptId, DisconnectReason};
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;

    struct Harness {
        conn: Arc<SidecarConnection>,
        events: mpsc::UnboundedReceiver<AttemptEvent>,
        bridge_out: WriteHalf<DuplexStream>,
        bridge_in: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    }

    fn harness() -> Harness {
        let (ours, theirs) = duplex(4096);
        let (our_read, our_write) = split(ours);
        let (their_read, their_write) = split(theirs);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = SidecarConnection::start(our_read, our_write, EventSink::new(AttemptId::new(), tx), None);
        Harness {
            conn: Arc::new(conn),
            events: rx,
            bridge_out: their_write,
            bridge_in: BufReader::new(their_read).lines(),
        }
    }

    async fn say(h: &mut Harness, line: &str) {
        h.bridge_out.write_all(line.as_bytes()).await.unwrap();
        h.bridge_out.write_all(b"\n").await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_events_are_translated() {
        let mut h = harness();
        say(&mut h, r#"{"event":"qr","data":"2@XYZ"}"#).await;
        say(&mut h, r#"{"event":"creds","data":{"me":{"id":"1555"}}}"#).await;
        say(&mut h, r#"{"event":"open"}"#).await;
        say(&mut h, r#"{"event":"message","from":"1555@s.whatsapp.net","text":"hi","timestamp":1700000000000}"#).await;

        match h.events.recv().await.unwrap().event {
            ClientEvent::PairingChallenge { artifact } => assert_eq!(artifact, "2@XYZ"),
            other => panic!("unexpected: {other:?}"),
        }
        match h.events.recv().await.unwrap().event {
            ClientEvent::CredentialsUpdated(c) => assert_eq!(c.expose(), r#"{"me":{"id":"1555"}}"#),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(h.events.recv().await.unwrap().event, ClientEvent::Opened));
        match h.events.recv().await.unwrap().event {
            ClientEvent::MessageReceived { from, payload, timestamp } => {
                assert_eq!(from, "1555@s.whatsapp.net");
                assert_eq!(payload, "hi");
                assert_eq!(timestamp.timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn presence_is_forwarded_opaque() {
        let mut h = harness();
        say(&mut h, r#"{"event":"presence","chat":"1555@s.whatsapp.net","data":{"lastKnownPresence":"available"}}"#).await;
        match h.events.recv().await.unwrap().event {
            ClientEvent::PresenceUpdated { chat, presence } => {
                assert_eq!(chat, "1555@s.whatsapp.net");
                assert_eq!(presence["lastKnownPresence"], "available");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_event_carries_status_code() {
        let mut h = harness();
        say(&mut h, r#"{"event":"close","statusCode":401,"message":"logged out"}"#).await;
        match h.events.recv().await.unwrap().event {
            ClientEvent::Closed(signal) => assert_eq!(signal.classify(), DisconnectReason::LoggedOut),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_lines_are_skipped() {
        let mut h = harness();
        say(&mut h, "not json").await;
        say(&mut h, r#"{"event":"mystery"}"#).await;
        say(&mut h, r#"{"event":"open"}"#).await;
        assert!(matches!(h.events.recv().await.unwrap().event, ClientEvent::Opened));
    }

    #[tokio::test]
    async fn send_is_correlated_by_id() {
        let mut h = harness();
        let conn = h.conn.clone();
        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.send_text("A@s.whatsapp.net", "one").await }
        });
        let req1: Value = serde_json::from_str(&h.bridge_in.next_line().await.unwrap().unwrap()).unwrap();
        let second = tokio::spawn(async move { conn.send_text("B@s.whatsapp.net", "two").await });
        let req2: Value = serde_json::from_str(&h.bridge_in.next_line().await.unwrap().unwrap()).unwrap();

        assert_eq!(req1["op"], "send");
        assert_eq!(req1["to"], "A@s.whatsapp.net");
        assert_eq!(req2["text"], "two");

        // Answer out of order.
        say(&mut h, &format!(r#"{{"event":"send_error","id":{},"code":"invalid_target","message":"no such user"}}"#, req2["id"])).await;
        say(&mut h, &format!(r#"{{"event":"sent","id":{},"messageId":"3EB0ABC"}}"#, req1["id"])).await;

        assert_eq!(first.await.unwrap().unwrap().as_str(), "3EB0ABC");
        assert!(matches!(second.await.unwrap(), Err(ClientError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn stream_end_fails_pending_and_reports_transient_close() {
        let h = harness();
        let conn = h.conn.clone();
        let mut events = h.events;
        let mut bridge_in = h.bridge_in;
        let send = tokio::spawn(async move { conn.send_text("A", "x").await });
        let _ = bridge_in.next_line().await.unwrap();
        drop(h.bridge_out);
        drop(bridge_in);

        assert!(matches!(send.await.unwrap(), Err(ClientError::Closed)));
        match events.recv().await.unwrap().event {
            ClientEvent::Closed(signal) => assert_eq!(signal.classify(), DisconnectReason::Transient),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn abandoned_send_releases_its_slot() {
        let mut h = harness();
        let conn = h.conn.clone();
        let send = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            conn.send_text("A", "x"),
        );
        assert!(send.await.is_err(), "sidecar never answered");
        assert!(h.conn.pending.lock().is_empty());

        // A late answer for the abandoned id is ignored.
        let req: Value = serde_json::from_str(&h.bridge_in.next_line().await.unwrap().unwrap()).unwrap();
        say(&mut h, &format!(r#"{{"event":"sent","id":{},"messageId":"late"}}"#, req["id"])).await;
        say(&mut h, r#"{"event":"open"}"#).await;
        assert!(matches!(h.events.recv().await.unwrap().event, ClientEvent::Opened));
        assert!(h.conn.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn logout_and_close_write_ops() {
        let mut h = harness();
        h.conn.logout().await.unwrap();
        h.conn.close().await;
        let a: Value = serde_json::from_str(&h.bridge_in.next_line().await.unwrap().unwrap()).unwrap();
        let b: Value = serde_json::from_str(&h.bridge_in.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(a["op"], "logout");
        assert_eq!(b["op"], "close");
    }

    #[test]
    fn send_error_codes_map_to_client_errors() {
        assert!(matches!(send_error(Some("rate_limited"), "x".into()), ClientError::RateLimited));
        assert!(matches!(send_error(Some("not_authorized"), "x".into()), ClientError::AuthRejected(_)));
        assert!(matches!(send_error(None, "x".into()), ClientError::Protocol(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_sidecar_receives_connect_and_reports_pairing() {
        let client = SidecarClient::new(SidecarConfig {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                r#"read line; case "$line" in *'"op":"connect"'*) echo '{"event":"qr","data":"XYZ"}';; esac; sleep 5"#.into(),
            ],
            working_dir: None,
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _conn = client
            .connect(None, EventSink::new(AttemptId::new(), tx))
            .await
            .unwrap();

        match rx.recv().await.unwrap().event {
            ClientEvent::PairingChallenge { artifact } => assert_eq!(artifact, "XYZ"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_fails_to_initialize() {
        let client = SidecarClient::new(SidecarConfig {
            command: "/nonexistent/herald-bridge".into(),
            args: vec![],
            working_dir: None,
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = client.connect(None, EventSink::new(AttemptId::new(), tx)).await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }
}
