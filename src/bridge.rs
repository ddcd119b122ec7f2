//! Core facade consumed by the HTTP layer
//!
//! [`Bridge`] ties the registry, balancer, correlation engine, and
//! session lifecycle together behind the surface the HTTP handlers call:
//! select an agent, dispatch an action and block on its reply, list
//! what is connected, kick an agent, and accept a freshly upgraded
//! agent socket.

use crate::balancer;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::guard;
use crate::protocol::Handshake;
use crate::registry::ConnectionRegistry;
use crate::session::{invoke, spawn_heartbeat, ClientSession, RESULT_INTERNAL};
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-agent listing entry for the details endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub id: String,
    pub address: String,
    pub is_healthy: bool,
    pub fail_count: u32,
    pub capabilities: Vec<String>,
}

/// The reverse-RPC core: registry plus the operations the HTTP
/// collaborator drives.
pub struct Bridge {
    registry: ConnectionRegistry,
    default_timeout: Duration,
}

impl Bridge {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            default_timeout: config.default_timeout(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Resolve a session for the caller: direct lookup when an explicit
    /// id is given, otherwise a health-aware random pick from the group.
    pub fn select(&self, group: &str, explicit_id: Option<&str>) -> Result<Arc<ClientSession>> {
        balancer::select_session(&self.registry, group, explicit_id, None)
    }

    /// Dispatch an action with the configured default timeout.
    pub async fn dispatch(
        &self,
        session: Arc<ClientSession>,
        action: String,
        param: String,
    ) -> String {
        self.dispatch_with_timeout(session, action, param, self.default_timeout)
            .await
    }

    /// Dispatch an action as its own unit of work and wait for the
    /// result. Never fails past this boundary: panics and task failures
    /// collapse into a generic failure string, so one bad call cannot
    /// disturb its caller beyond a failed result.
    pub async fn dispatch_with_timeout(
        &self,
        session: Arc<ClientSession>,
        action: String,
        param: String,
        timeout: Duration,
    ) -> String {
        let handle = tokio::spawn(async move {
            guard::guarded("invoke dispatch", async {
                invoke(&session, &action, &param, timeout).await
            })
            .await
        });
        match handle.await {
            Ok(Some(result)) => result,
            Ok(None) => RESULT_INTERNAL.to_string(),
            Err(e) => {
                tracing::error!(error = %e, "invoke task failed");
                RESULT_INTERNAL.to_string()
            }
        }
    }

    /// Group → sorted agent ids.
    pub fn list_groups(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.group_index()
    }

    /// Group → per-agent details (address, health, capabilities).
    pub fn list_details(&self) -> BTreeMap<String, Vec<SessionDetail>> {
        let mut details: BTreeMap<String, Vec<SessionDetail>> = BTreeMap::new();
        for session in self.registry.scan_all() {
            details
                .entry(session.group.clone())
                .or_default()
                .push(SessionDetail {
                    id: session.id.clone(),
                    address: session.remote_addr.clone(),
                    is_healthy: session.is_healthy(),
                    fail_count: session.fail_count(),
                    capabilities: session.capabilities(),
                });
        }
        for group in details.values_mut() {
            group.sort_by(|a, b| a.id.cmp(&b.id));
        }
        details
    }

    /// Close an agent's socket; its read loop performs the teardown.
    /// Returns false when no such agent is connected, so kicking twice
    /// is safe.
    pub async fn kick(&self, group: &str, id: &str) -> bool {
        match self.registry.lookup(group, id) {
            Some(session) => {
                tracing::info!(group = %group, id = %id, "kicking agent");
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Drive one agent connection from handshake to teardown.
    ///
    /// Sends the `{"registerId": id}` acknowledgement, registers the
    /// session, starts its heartbeat, then runs the read loop until the
    /// socket errors, the agent leaves, or the session is kicked. The
    /// heartbeat task is joined before the session counts as destroyed.
    pub async fn accept(&self, group: String, id: String, socket: WebSocket, remote_addr: String) {
        let (mut sink, mut stream) = socket.split();

        let hello = match serde_json::to_string(&Handshake { register_id: &id }) {
            Ok(hello) => hello,
            Err(e) => {
                tracing::error!(group = %group, id = %id, error = %e, "failed to encode handshake");
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(hello)).await {
            tracing::warn!(group = %group, id = %id, error = %e, "failed to send handshake acknowledgement");
            return;
        }

        let session = Arc::new(ClientSession::new(
            group.clone(),
            id.clone(),
            remote_addr,
            sink,
        ));
        self.registry.register(session.clone());
        tracing::info!(group = %group, id = %id, addr = %session.remote_addr, "agent online");

        let heartbeat = spawn_heartbeat(session.clone());

        guard::guarded("session read loop", read_loop(&session, &mut stream)).await;

        session.close().await;
        self.registry.unregister_exact(&session);
        let _ = heartbeat.await;
        tracing::info!(group = %group, id = %id, "agent offline");
    }
}

/// Decode inbound frames until the socket closes or the session is
/// cancelled. Replies and capability announcements are routed by the
/// session itself; a malformed frame never faults the loop.
async fn read_loop(session: &ClientSession, stream: &mut SplitStream<WebSocket>) {
    loop {
        tokio::select! {
            _ = session.closed() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_frame(&text),
                Some(Ok(Message::Pong(_))) => session.record_pong(),
                Some(Ok(Message::Close(_))) => {
                    tracing::debug!(group = %session.group, id = %session.id, "agent sent close");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(
                        group = %session.group,
                        id = %session.id,
                        error = %e,
                        "socket read failed, closing session"
                    );
                    break;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RESULT_TIMEOUT;

    fn bridge() -> Bridge {
        Bridge::new(&BridgeConfig::default())
    }

    fn register_detached(bridge: &Bridge, group: &str, id: &str) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::detached(group, id));
        bridge.registry().register(session.clone());
        session
    }

    #[tokio::test]
    async fn listings_reflect_registered_sessions() {
        let bridge = bridge();
        register_detached(&bridge, "g1", "b");
        let a = register_detached(&bridge, "g1", "a");
        register_detached(&bridge, "g2", "c");
        a.handle_frame(
            r#"{"action":"_registerActions","message_id":"","response_data":"[\"dom\"]"}"#,
        );

        let groups = bridge.list_groups();
        assert_eq!(groups["g1"], vec!["a", "b"]);
        assert_eq!(groups["g2"], vec!["c"]);

        let details = bridge.list_details();
        let g1 = &details["g1"];
        assert_eq!(g1[0].id, "a");
        assert_eq!(g1[0].capabilities, vec!["dom"]);
        assert!(g1[0].is_healthy);
        assert_eq!(g1[0].fail_count, 0);
    }

    #[tokio::test]
    async fn dispatch_times_out_with_sentinel() {
        let bridge = bridge();
        let session = register_detached(&bridge, "g1", "a1");

        let result = bridge
            .dispatch_with_timeout(
                session.clone(),
                "fetch".to_string(),
                String::new(),
                Duration::from_millis(50),
            )
            .await;
        assert_eq!(result, RESULT_TIMEOUT);
        assert_eq!(session.fail_count(), 1);
    }

    #[tokio::test]
    async fn kick_unknown_agent_reports_not_found() {
        let bridge = bridge();
        assert!(!bridge.kick("g1", "missing").await);

        let session = register_detached(&bridge, "g1", "a1");
        assert!(bridge.kick("g1", "a1").await);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn select_prefers_explicit_id() {
        let bridge = bridge();
        register_detached(&bridge, "g1", "a1");
        register_detached(&bridge, "g1", "a2");

        let chosen = bridge.select("g1", Some("a2")).unwrap();
        assert_eq!(chosen.id, "a2");
        assert!(bridge.select("g1", Some("nope")).is_err());
        assert!(bridge.select("g1", None).is_ok());
    }
}
