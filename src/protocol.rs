//! Wire protocol for the agent socket
//!
//! Two JSON envelope shapes travel over the persistent WebSocket: a
//! server-to-agent request and an agent-to-server reply. Agents may also
//! send an unsolicited capability announcement using the reserved
//! `_registerActions` action with an empty message id. Heartbeats are
//! plain WebSocket Ping/Pong control frames and carry no JSON body.

use serde::{Deserialize, Serialize};

/// Reserved action name for the capability announcement.
pub const REGISTER_ACTIONS: &str = "_registerActions";

/// Built-in action every agent implements to evaluate a script.
pub const EXEC_JS_ACTION: &str = "_execjs";

/// Server-to-agent request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame<'a> {
    pub action: &'a str,
    pub message_id: &'a str,
    pub param: &'a str,
}

/// Agent-to-server reply envelope.
///
/// Also carries capability announcements (`action == "_registerActions"`,
/// empty `message_id`, `response_data` holding a JSON string array).
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub response_data: String,
}

impl ResponseFrame {
    /// Whether this frame is a capability announcement rather than a
    /// correlated reply.
    pub fn is_capability_announcement(&self) -> bool {
        self.action == REGISTER_ACTIONS && self.message_id.is_empty()
    }
}

/// Handshake acknowledgement sent to the agent immediately after the
/// protocol upgrade, confirming (or assigning) its id.
#[derive(Debug, Clone, Serialize)]
pub struct Handshake<'a> {
    #[serde(rename = "registerId")]
    pub register_id: &'a str,
}

/// Parse a capability announcement payload into an ordered action list.
///
/// Returns `None` when the payload is not a JSON string array; the
/// previous announcement is kept in that case.
pub fn parse_capabilities(data: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(data).ok()
}

/// Wrap a script expression so evaluation errors come back to the caller
/// as a string result instead of breaking the agent-side dispatcher.
pub fn eval_snippet(expr: &str) -> String {
    format!(
        "(function() {{ try {{ return {expr}; }} catch (err) {{ return String(err); }} }})()"
    )
}
