//! Scoped fault boundary for independently scheduled units of work
//!
//! Every spawned unit (per-call invoke dispatch, per-session read loop,
//! per-session heartbeat) runs inside [`guarded`]: a panic inside one
//! unit is caught at the unit's boundary and logged, never escaping to
//! tear down the server or disturb another session.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Run a unit of work, converting a panic into a logged `None`.
pub async fn guarded<F>(unit: &str, fut: F) -> Option<F::Output>
where
    F: Future,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::error!(unit, panic = %panic_message(payload.as_ref()), "scheduled unit panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
