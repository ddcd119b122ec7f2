//! jsbridge: reverse-RPC bridge between HTTP callers and browser agents
//!
//! Browser-side agents hold a persistent WebSocket to this server. HTTP
//! callers ask the server to execute an action (run a script, fetch
//! cookies or HTML, or any custom action the agent registered) on a
//! chosen agent and receive the agent's asynchronous reply as if it were
//! a synchronous HTTP response.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP caller ──► server::handler ──► balancer ──► ClientSession
//!                                         │             │
//!                                     registry      correlation
//!                                                   (pending slots)
//!                                                       ▲
//!  browser agent ◄── persistent WebSocket ──► read loop ┘ + heartbeat
//! ```
//!
//! Each agent connection runs one read loop and one heartbeat task; each
//! inbound call runs as its own task, so a slow agent never blocks
//! unrelated calls. Replies arrive out of order and are routed to the
//! exact caller through per-(action, correlation-id) result slots.
//!
//! ## Modules
//!
//! - [`protocol`]: the JSON envelopes and capability-announcement convention
//! - [`registry`]: concurrent (group, id) → session map
//! - [`session`]: per-agent state, correlation engine, heartbeat
//! - [`balancer`]: health-aware random selection within a group
//! - [`bridge`]: the facade the HTTP layer drives
//! - [`server`]: axum routes for callers and the agent socket
//! - [`config`]: TOML process configuration

pub mod balancer;
pub mod bridge;
pub mod config;
pub mod error;
pub mod guard;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{Error, Result};
