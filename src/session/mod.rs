//! Per-agent session state
//!
//! A [`ClientSession`] owns the server side of one agent's WebSocket: the
//! write half behind a serialization mutex, the pending-request table the
//! correlation engine rendezvouses through, the health streak, and the
//! last capability announcement. Sessions are shared as `Arc` between the
//! registry, the read loop, the heartbeat task, and in-flight invokes.

mod correlation;
mod health;

pub use correlation::{
    invoke, RESULT_ENCODE_FAILED, RESULT_INTERNAL, RESULT_SEND_FAILED, RESULT_TIMEOUT,
};
pub use health::spawn_heartbeat;

use crate::error::{Error, Result};
use crate::protocol::{self, ResponseFrame};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Consecutive request timeouts after which a session is unhealthy.
pub const FAIL_THRESHOLD: u32 = 3;

/// Bound on any single socket write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Interval between heartbeat probes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Bound on a heartbeat probe write.
pub const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(5);

/// Two-level pending table: action name → correlation id → result slot.
type PendingTable = HashMap<String, HashMap<String, oneshot::Sender<String>>>;

/// The write half of the agent socket.
///
/// Taken out on close, so a send against a closing session fails cleanly.
enum WriteHalf {
    Socket(SplitSink<WebSocket, Message>),
    /// Accepts and discards frames; sessions in unit tests have no socket.
    #[cfg(test)]
    Discard,
}

/// Server-side state for one connected agent.
pub struct ClientSession {
    /// Group namespace this agent registered under.
    pub group: String,
    /// Agent id, unique within the group.
    pub id: String,
    /// Remote peer address, informational only.
    pub remote_addr: String,

    writer: Mutex<Option<WriteHalf>>,
    pending: StdMutex<PendingTable>,
    capabilities: RwLock<Vec<String>>,
    fail_count: AtomicU32,
    healthy: AtomicBool,
    last_heartbeat_at: AtomicI64,
    cancel: CancellationToken,
}

impl ClientSession {
    /// Create a session owning the write half of an upgraded socket.
    pub fn new(
        group: impl Into<String>,
        id: impl Into<String>,
        remote_addr: impl Into<String>,
        writer: SplitSink<WebSocket, Message>,
    ) -> Self {
        Self::build(group, id, remote_addr, WriteHalf::Socket(writer))
    }

    /// Session without a socket; frames are accepted and discarded.
    #[cfg(test)]
    pub(crate) fn detached(group: impl Into<String>, id: impl Into<String>) -> Self {
        Self::build(group, id, "127.0.0.1:0", WriteHalf::Discard)
    }

    fn build(
        group: impl Into<String>,
        id: impl Into<String>,
        remote_addr: impl Into<String>,
        writer: WriteHalf,
    ) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
            remote_addr: remote_addr.into(),
            writer: Mutex::new(Some(writer)),
            pending: StdMutex::new(HashMap::new()),
            capabilities: RwLock::new(Vec::new()),
            fail_count: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_heartbeat_at: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            cancel: CancellationToken::new(),
        }
    }

    // ------------------------------------------------------------------
    // Health streak
    // ------------------------------------------------------------------

    /// Whether the session is currently considered healthy.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Consecutive request timeouts since the last success.
    pub fn fail_count(&self) -> u32 {
        self.fail_count.load(Ordering::Relaxed)
    }

    /// A successful round trip clears the streak.
    pub fn record_success(&self) {
        self.fail_count.store(0, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
    }

    /// A request timeout extends the streak; at [`FAIL_THRESHOLD`] the
    /// session flips unhealthy. Returns the new streak length.
    pub fn record_timeout(&self) -> u32 {
        let fails = self.fail_count.fetch_add(1, Ordering::Relaxed) + 1;
        if fails >= FAIL_THRESHOLD {
            self.healthy.store(false, Ordering::Relaxed);
        }
        fails
    }

    /// Liveness signal only: does not touch the timeout streak.
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    /// Millisecond timestamp of the last heartbeat acknowledgement.
    pub fn last_heartbeat_at(&self) -> i64 {
        self.last_heartbeat_at.load(Ordering::Relaxed)
    }

    /// Record a heartbeat acknowledgement from the agent.
    pub fn record_pong(&self) {
        self.last_heartbeat_at
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    /// The agent's last capability announcement; empty until announced.
    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities.read().expect("capabilities lock").clone()
    }

    fn set_capabilities(&self, actions: Vec<String>) {
        *self.capabilities.write().expect("capabilities lock") = actions;
    }

    // ------------------------------------------------------------------
    // Socket writes (one writer at a time)
    // ------------------------------------------------------------------

    /// Send one text frame under the write-serialization mutex, bounded
    /// by [`WRITE_DEADLINE`].
    pub async fn send_frame(&self, text: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(WriteHalf::Socket(sink)) => {
                match timeout(WRITE_DEADLINE, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(Error::Transport(e.to_string())),
                    Err(_) => Err(Error::Transport("write deadline exceeded".to_string())),
                }
            }
            #[cfg(test)]
            Some(WriteHalf::Discard) => Ok(()),
            None => Err(Error::Transport("socket closed".to_string())),
        }
    }

    /// Send a heartbeat probe (Ping control frame) with a short deadline.
    pub async fn send_ping(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(WriteHalf::Socket(sink)) => {
                match timeout(HEARTBEAT_DEADLINE, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(Error::Transport(e.to_string())),
                    Err(_) => Err(Error::Transport("heartbeat deadline exceeded".to_string())),
                }
            }
            #[cfg(test)]
            Some(WriteHalf::Discard) => Ok(()),
            None => Err(Error::Transport("socket closed".to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Close the session: stop the read loop and heartbeat, send a Close
    /// frame best-effort, and retire the write half. Idempotent.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let taken = self.writer.lock().await.take();
        if let Some(WriteHalf::Socket(mut sink)) = taken {
            let _ = timeout(HEARTBEAT_DEADLINE, sink.send(Message::Close(None))).await;
            let _ = sink.close().await;
        }
    }

    /// Resolves once the session has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether close has been initiated.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ------------------------------------------------------------------
    // Pending-request table
    // ------------------------------------------------------------------

    /// Create a result slot under `(action, fresh-id)` and return the id
    /// with the receiving half. Retries generation if the id is already
    /// outstanding for this action.
    fn open_slot(&self, action: &str) -> (String, oneshot::Receiver<String>) {
        let mut pending = self.pending.lock().expect("pending lock");
        let slots = pending.entry(action.to_string()).or_default();
        loop {
            let message_id = uuid::Uuid::new_v4().to_string();
            if slots.contains_key(&message_id) {
                tracing::debug!(action, "correlation id already outstanding, regenerating");
                continue;
            }
            let (tx, rx) = oneshot::channel();
            slots.insert(message_id.clone(), tx);
            return (message_id, rx);
        }
    }

    /// Remove a slot if it is still outstanding. Called on every invoke
    /// exit path; a slot already consumed by delivery is a no-op.
    fn retire_slot(&self, action: &str, message_id: &str) {
        let mut pending = self.pending.lock().expect("pending lock");
        if let Some(slots) = pending.get_mut(action) {
            slots.remove(message_id);
        }
    }

    /// Route a reply into its pending slot. Unmatched replies (unknown,
    /// already timed out, or duplicate) are logged and dropped; delivery
    /// into a slot whose invoke just timed out is dropped the same way.
    pub fn deliver(&self, action: &str, message_id: &str, data: String) {
        let slot = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending
                .get_mut(action)
                .and_then(|slots| slots.remove(message_id))
        };
        match slot {
            Some(tx) => {
                if tx.send(data).is_err() {
                    tracing::debug!(
                        group = %self.group,
                        id = %self.id,
                        action,
                        message_id,
                        "slot already retired, reply dropped"
                    );
                }
            }
            None => {
                tracing::warn!(
                    group = %self.group,
                    id = %self.id,
                    action,
                    message_id,
                    "no pending slot for reply, dropping"
                );
            }
        }
    }

    /// Number of currently outstanding requests across all actions.
    pub fn outstanding(&self) -> usize {
        let pending = self.pending.lock().expect("pending lock");
        pending.values().map(|slots| slots.len()).sum()
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    /// Process one inbound text frame from the agent.
    ///
    /// Capability announcements replace the session's action list and
    /// never touch the pending table; anything else is treated as a
    /// correlated reply. Malformed frames are logged and skipped.
    pub fn handle_frame(&self, text: &str) {
        let frame: ResponseFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    group = %self.group,
                    id = %self.id,
                    error = %e,
                    "inbound frame is not a valid envelope, skipping"
                );
                return;
            }
        };

        if frame.is_capability_announcement() {
            match protocol::parse_capabilities(&frame.response_data) {
                Some(actions) => {
                    tracing::info!(
                        group = %self.group,
                        id = %self.id,
                        ?actions,
                        "agent announced capabilities"
                    );
                    self.set_capabilities(actions);
                }
                None => {
                    tracing::warn!(
                        group = %self.group,
                        id = %self.id,
                        "malformed capability announcement, keeping previous list"
                    );
                }
            }
            return;
        }

        self.deliver(&frame.action, &frame.message_id, frame.response_data);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("group", &self.group)
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("fail_count", &self.fail_count())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_streak_transitions() {
        let session = ClientSession::detached("g1", "a1");
        assert!(session.is_healthy());
        assert_eq!(session.fail_count(), 0);

        session.record_timeout();
        session.record_timeout();
        assert!(session.is_healthy());

        session.record_timeout();
        assert!(!session.is_healthy());
        assert_eq!(session.fail_count(), 3);

        // A single success clears the streak
        session.record_success();
        assert!(session.is_healthy());
        assert_eq!(session.fail_count(), 0);
    }

    #[tokio::test]
    async fn heartbeat_failure_does_not_touch_streak() {
        let session = ClientSession::detached("g1", "a1");
        session.record_timeout();
        session.mark_unhealthy();
        assert!(!session.is_healthy());
        assert_eq!(session.fail_count(), 1);
    }

    #[tokio::test]
    async fn capability_announcement_replaces_list() {
        let session = ClientSession::detached("g1", "a1");
        assert!(session.capabilities().is_empty());

        session.handle_frame(
            r#"{"action":"_registerActions","message_id":"","response_data":"[\"dom\",\"cookie\"]"}"#,
        );
        assert_eq!(session.capabilities(), vec!["dom", "cookie"]);

        session.handle_frame(
            r#"{"action":"_registerActions","message_id":"","response_data":"[\"dom\"]"}"#,
        );
        assert_eq!(session.capabilities(), vec!["dom"]);

        // A malformed announcement keeps the previous list
        session.handle_frame(
            r#"{"action":"_registerActions","message_id":"","response_data":"oops"}"#,
        );
        assert_eq!(session.capabilities(), vec!["dom"]);
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped() {
        let session = ClientSession::detached("g1", "a1");
        // Must not panic or create state
        session.handle_frame(
            r#"{"action":"x","message_id":"nope","response_data":"late"}"#,
        );
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn slot_roundtrip_and_retire() {
        let session = ClientSession::detached("g1", "a1");
        let (id, rx) = session.open_slot("fetch");
        assert_eq!(session.outstanding(), 1);

        session.deliver("fetch", &id, "value".to_string());
        assert_eq!(rx.await.unwrap(), "value");
        assert_eq!(session.outstanding(), 0);

        // Retiring an already-consumed slot is a no-op
        session.retire_slot("fetch", &id);
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn concurrent_slots_get_distinct_ids() {
        let session = ClientSession::detached("g1", "a1");
        let (id1, _rx1) = session.open_slot("fetch");
        let (id2, _rx2) = session.open_slot("fetch");
        assert_ne!(id1, id2);
        assert_eq!(session.outstanding(), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_later_sends() {
        let session = ClientSession::detached("g1", "a1");
        session.close().await;
        session.close().await;
        assert!(session.is_closed());
        assert!(session.send_frame("{}".to_string()).await.is_err());
        assert!(session.send_ping().await.is_err());
    }
}
