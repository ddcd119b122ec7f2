//! Agent WebSocket upgrade endpoint
//!
//! Agents connect with `GET /ws?group=<g>&clientId=<id>`. The group is
//! mandatory; an id is generated when the agent does not bring one. The
//! upgraded socket is handed to [`Bridge::accept`], which owns the whole
//! session lifecycle from handshake to teardown.

use crate::server::handler::api_error;
use crate::server::AppState;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub group: String,
    #[serde(default, rename = "clientId")]
    pub client_id: String,
}

pub async fn agent_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if query.group.is_empty() {
        tracing::warn!(addr = %addr, "agent connection rejected: missing group");
        return api_error(StatusCode::BAD_REQUEST, "group is required");
    }

    let group = query.group;
    let id = if query.client_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        query.client_id
    };

    let bridge = state.bridge.clone();
    ws.on_upgrade(move |socket| async move {
        bridge.accept(group, id, socket, addr.to_string()).await;
    })
    .into_response()
}
