//! Request/response correlation engine
//!
//! [`invoke`] turns one logical call into a sent frame plus a bounded
//! wait for the matching reply. The result slot is inserted before the
//! frame is sent so a fast reply can never race ahead of slot creation,
//! and a drop guard retires the slot on every exit path, panics
//! included. All failures surface as literal result strings; nothing
//! escapes this boundary as an error.

use super::ClientSession;
use crate::protocol::RequestFrame;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result when the request envelope could not be encoded.
pub const RESULT_ENCODE_FAILED: &str = "request encoding failed";

/// Result when the socket write failed or timed out.
pub const RESULT_SEND_FAILED: &str = "rpc send failed";

/// Result when no reply arrived within the deadline.
pub const RESULT_TIMEOUT: &str = "rpc result timeout";

/// Result when the call failed for an unexpected internal reason.
pub const RESULT_INTERNAL: &str = "internal error";

/// Retires the slot when the invoke exits, however it exits.
struct SlotGuard<'a> {
    session: &'a ClientSession,
    action: &'a str,
    message_id: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.session.retire_slot(self.action, &self.message_id);
    }
}

/// Execute one action against an agent and wait for its reply.
///
/// Only the socket write is serialized against other calls on the same
/// session; the wait runs fully concurrently, so several invokes can be
/// outstanding on one session at once, each rendezvousing with its own
/// reply through its own slot.
pub async fn invoke(
    session: &ClientSession,
    action: &str,
    param: &str,
    call_timeout: Duration,
) -> String {
    let (message_id, rx) = session.open_slot(action);
    let guard = SlotGuard {
        session,
        action,
        message_id,
    };
    exchange(session, action, &guard.message_id, param, rx, call_timeout).await
}

async fn exchange(
    session: &ClientSession,
    action: &str,
    message_id: &str,
    param: &str,
    rx: oneshot::Receiver<String>,
    call_timeout: Duration,
) -> String {
    let frame = RequestFrame {
        action,
        message_id,
        param,
    };
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(
                group = %session.group,
                id = %session.id,
                action,
                error = %e,
                "failed to encode request envelope"
            );
            return RESULT_ENCODE_FAILED.to_string();
        }
    };

    if let Err(e) = session.send_frame(text).await {
        tracing::warn!(
            group = %session.group,
            id = %session.id,
            action,
            error = %e,
            "request write failed"
        );
        session.mark_unhealthy();
        return RESULT_SEND_FAILED.to_string();
    }

    match tokio::time::timeout(call_timeout, rx).await {
        Ok(Ok(value)) => {
            session.record_success();
            value
        }
        Ok(Err(_)) => {
            // The sending half vanished without resolving the slot.
            tracing::error!(
                group = %session.group,
                id = %session.id,
                action,
                message_id,
                "result slot dropped without a value"
            );
            RESULT_INTERNAL.to_string()
        }
        Err(_) => {
            let fails = session.record_timeout();
            tracing::warn!(
                group = %session.group,
                id = %session.id,
                action,
                message_id,
                fail_count = fails,
                "no reply within deadline"
            );
            RESULT_TIMEOUT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn reply_resolves_invoke_and_clears_streak() {
        let session = Arc::new(ClientSession::detached("g1", "a1"));
        session.record_timeout();

        let worker = {
            let session = session.clone();
            tokio::spawn(async move {
                invoke(&session, "fetch", "arg", Duration::from_secs(5)).await
            })
        };

        // Wait for the slot to appear, then answer it like the read loop would.
        while session.outstanding() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let message_id = {
            let pending = session.pending.lock().unwrap();
            pending["fetch"].keys().next().unwrap().clone()
        };
        session.deliver("fetch", &message_id, "payload".to_string());

        assert_eq!(worker.await.unwrap(), "payload");
        assert_eq!(session.fail_count(), 0);
        assert!(session.is_healthy());
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn timeout_returns_sentinel_and_extends_streak() {
        let session = ClientSession::detached("g1", "a1");
        let result = invoke(&session, "fetch", "", Duration::from_millis(50)).await;
        assert_eq!(result, RESULT_TIMEOUT);
        assert_eq!(session.fail_count(), 1);
        assert!(session.is_healthy());
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn three_timeouts_mark_unhealthy() {
        let session = ClientSession::detached("g1", "a1");
        for _ in 0..3 {
            let result = invoke(&session, "fetch", "", Duration::from_millis(20)).await;
            assert_eq!(result, RESULT_TIMEOUT);
        }
        assert_eq!(session.fail_count(), 3);
        assert!(!session.is_healthy());
    }

    #[tokio::test]
    async fn send_failure_on_closed_session() {
        let session = ClientSession::detached("g1", "a1");
        session.close().await;

        let result = invoke(&session, "fetch", "", Duration::from_secs(5)).await;
        assert_eq!(result, RESULT_SEND_FAILED);
        assert!(!session.is_healthy());
        // Streak untouched: a transport failure is not a timeout
        assert_eq!(session.fail_count(), 0);
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn concurrent_invokes_receive_their_own_replies() {
        let session = Arc::new(ClientSession::detached("g1", "a1"));

        let first = {
            let session = session.clone();
            tokio::spawn(
                async move { invoke(&session, "a1", "", Duration::from_secs(5)).await },
            )
        };
        let second = {
            let session = session.clone();
            tokio::spawn(
                async move { invoke(&session, "a2", "", Duration::from_secs(5)).await },
            )
        };

        while session.outstanding() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (id1, id2) = {
            let pending = session.pending.lock().unwrap();
            (
                pending["a1"].keys().next().unwrap().clone(),
                pending["a2"].keys().next().unwrap().clone(),
            )
        };

        // Deliver out of order; each call must still get its own value.
        session.deliver("a2", &id2, "second".to_string());
        session.deliver("a1", &id1, "first".to_string());

        assert_eq!(first.await.unwrap(), "first");
        assert_eq!(second.await.unwrap(), "second");
    }

    #[tokio::test]
    async fn late_reply_after_timeout_is_dropped() {
        let session = ClientSession::detached("g1", "a1");
        let result = invoke(&session, "fetch", "", Duration::from_millis(20)).await;
        assert_eq!(result, RESULT_TIMEOUT);

        // The slot is gone; a late reply must be dropped without effect.
        session.deliver("fetch", "stale-id", "late".to_string());
        assert_eq!(session.outstanding(), 0);
    }
}
