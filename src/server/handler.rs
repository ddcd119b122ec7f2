//! Caller-facing HTTP handlers
//!
//! Request shape follows the original wire convention: `group` names the
//! agent pool, `clientId` optionally pins a specific agent, `action` and
//! `param` (or `code` for script execution) describe the call. Every
//! reply body is `{"status": ..., "group": ..., "clientId": ..., "data": ...}`.

use crate::error::Error;
use crate::protocol::{self, EXEC_JS_ACTION};
use crate::server::AppState;
use crate::session::ClientSession;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

/// Caller parameters, bound from query string or JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct CallParams {
    #[serde(default)]
    pub group: String,
    #[serde(default, rename = "clientId")]
    pub client_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub param: String,
    /// Script source for the execjs endpoint
    #[serde(default)]
    pub code: String,
}

pub(super) fn api_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": status.as_u16(),
            "data": message,
        })),
    )
        .into_response()
}

fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::Param(_) => StatusCode::BAD_REQUEST,
        Error::Lookup(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, &e.to_string())
}

fn api_data(session: &ClientSession, data: String) -> Response {
    Json(serde_json::json!({
        "status": 200,
        "group": session.group,
        "clientId": session.id,
        "data": data,
    }))
    .into_response()
}

/// Resolve the target session; caller mistakes surface before any
/// session is touched.
fn resolve(state: &AppState, params: &CallParams) -> Result<Arc<ClientSession>, Response> {
    if params.group.is_empty() {
        return Err(error_response(&Error::Param("group is required".to_string())));
    }
    let explicit_id = (!params.client_id.is_empty()).then_some(params.client_id.as_str());
    state
        .bridge
        .select(&params.group, explicit_id)
        .map_err(|e| error_response(&e))
}

// ---------------------------------------------------------------------
// Action dispatch
// ---------------------------------------------------------------------

pub async fn call_query(
    State(state): State<AppState>,
    Query(params): Query<CallParams>,
) -> Response {
    call(state, params).await
}

pub async fn call_json(State(state): State<AppState>, Json(params): Json<CallParams>) -> Response {
    call(state, params).await
}

async fn call(state: AppState, params: CallParams) -> Response {
    if params.action.is_empty() {
        return error_response(&Error::Param("action is required".to_string()));
    }
    let session = match resolve(&state, &params) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let data = state
        .bridge
        .dispatch(session.clone(), params.action, params.param)
        .await;
    api_data(&session, data)
}

// ---------------------------------------------------------------------
// Script execution
// ---------------------------------------------------------------------

pub async fn execjs_query(
    State(state): State<AppState>,
    Query(params): Query<CallParams>,
) -> Response {
    execjs(state, params).await
}

pub async fn execjs_json(
    State(state): State<AppState>,
    Json(params): Json<CallParams>,
) -> Response {
    execjs(state, params).await
}

async fn execjs(state: AppState, params: CallParams) -> Response {
    if params.code.is_empty() {
        return error_response(&Error::Param("code is required".to_string()));
    }
    let session = match resolve(&state, &params) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let data = state
        .bridge
        .dispatch(session.clone(), EXEC_JS_ACTION.to_string(), params.code)
        .await;
    api_data(&session, data)
}

/// Evaluate a fixed page expression through the script action.
async fn eval_page(state: AppState, params: CallParams, expr: &str) -> Response {
    let session = match resolve(&state, &params) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let data = state
        .bridge
        .dispatch(
            session.clone(),
            EXEC_JS_ACTION.to_string(),
            protocol::eval_snippet(expr),
        )
        .await;
    api_data(&session, data)
}

pub async fn get_cookies(
    State(state): State<AppState>,
    Query(params): Query<CallParams>,
) -> Response {
    eval_page(state, params, "document.cookie").await
}

pub async fn get_html(
    State(state): State<AppState>,
    Query(params): Query<CallParams>,
) -> Response {
    eval_page(state, params, "document.documentElement.outerHTML").await
}

// ---------------------------------------------------------------------
// Listing and administration
// ---------------------------------------------------------------------

pub async fn list_groups(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": 200,
        "data": state.bridge.list_groups(),
    }))
    .into_response()
}

pub async fn list_details(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": 200,
        "data": state.bridge.list_details(),
    }))
    .into_response()
}

/// Kick query: both parameters are required.
#[derive(Debug, Deserialize)]
pub struct KickParams {
    #[serde(default)]
    pub group: String,
    #[serde(default, rename = "clientId")]
    pub client_id: String,
}

pub async fn kick(State(state): State<AppState>, Query(params): Query<KickParams>) -> Response {
    if params.group.is_empty() || params.client_id.is_empty() {
        return error_response(&Error::Param("group and clientId are required".to_string()));
    }
    if state.bridge.kick(&params.group, &params.client_id).await {
        Json(serde_json::json!({"status": 200, "data": "agent kicked"})).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "agent not found")
    }
}

pub async fn healthz(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.bridge.registry().len(),
    }))
    .into_response()
}
