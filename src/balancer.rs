//! Group-scoped load balancer
//!
//! Picks a session for a group: an explicit agent id is a direct lookup
//! with no fallback; otherwise the group's sessions are partitioned into
//! healthy and unhealthy buckets and one is drawn uniformly at random,
//! preferring the healthy bucket but falling back to degraded agents
//! rather than failing the call outright when none are healthy.

use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::session::{ClientSession, FAIL_THRESHOLD};
use rand::Rng;
use std::sync::Arc;

/// Select a session for `group`, honoring an explicit id when given.
pub fn select_session(
    registry: &ConnectionRegistry,
    group: &str,
    explicit_id: Option<&str>,
    exclude_id: Option<&str>,
) -> Result<Arc<ClientSession>> {
    if let Some(id) = explicit_id.filter(|id| !id.is_empty()) {
        return registry.lookup(group, id).ok_or_else(|| {
            Error::Lookup(format!("no agent '{id}' in group '{group}'"))
        });
    }
    pick(registry, group, exclude_id, &mut rand::thread_rng())
}

/// Randomized health-aware pick; the RNG is injected so tests can seed it.
pub fn pick(
    registry: &ConnectionRegistry,
    group: &str,
    exclude_id: Option<&str>,
    rng: &mut impl Rng,
) -> Result<Arc<ClientSession>> {
    let (healthy, unhealthy) = partition(registry.scan_by_group(group), exclude_id);

    let candidates = if !healthy.is_empty() {
        healthy
    } else {
        unhealthy
    };
    if candidates.is_empty() {
        return Err(Error::Lookup(format!("no agent available in group '{group}'")));
    }
    let choice = rng.gen_range(0..candidates.len());
    Ok(candidates[choice].clone())
}

/// Split sessions into (healthy, unhealthy), dropping the excluded id.
fn partition(
    sessions: Vec<Arc<ClientSession>>,
    exclude_id: Option<&str>,
) -> (Vec<Arc<ClientSession>>, Vec<Arc<ClientSession>>) {
    let mut healthy = Vec::new();
    let mut unhealthy = Vec::new();
    for session in sessions {
        if exclude_id.is_some_and(|id| session.id == id) {
            continue;
        }
        if session.is_healthy() && session.fail_count() < FAIL_THRESHOLD {
            healthy.push(session);
        } else {
            unhealthy.push(session);
        }
    }
    (healthy, unhealthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn session(group: &str, id: &str) -> Arc<ClientSession> {
        Arc::new(ClientSession::detached(group, id))
    }

    fn degraded(group: &str, id: &str) -> Arc<ClientSession> {
        let s = session(group, id);
        for _ in 0..FAIL_THRESHOLD {
            s.record_timeout();
        }
        s
    }

    #[test]
    fn explicit_id_has_no_fallback() {
        let registry = ConnectionRegistry::new();
        registry.register(session("g1", "a1"));

        assert!(select_session(&registry, "g1", Some("a1"), None).is_ok());
        assert!(matches!(
            select_session(&registry, "g1", Some("missing"), None),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn healthy_always_preferred_over_unhealthy() {
        let registry = ConnectionRegistry::new();
        registry.register(session("g1", "good"));
        registry.register(degraded("g1", "bad"));

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let chosen = pick(&registry, "g1", None, &mut rng).unwrap();
            assert_eq!(chosen.id, "good");
        }
    }

    #[test]
    fn falls_back_to_unhealthy_when_no_healthy() {
        let registry = ConnectionRegistry::new();
        registry.register(degraded("g1", "bad"));

        let mut rng = StdRng::seed_from_u64(1);
        let chosen = pick(&registry, "g1", None, &mut rng).unwrap();
        assert_eq!(chosen.id, "bad");
    }

    #[test]
    fn never_crosses_groups() {
        let registry = ConnectionRegistry::new();
        registry.register(session("g1", "a1"));
        registry.register(session("g2", "b1"));

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let chosen = pick(&registry, "g1", None, &mut rng).unwrap();
            assert_eq!(chosen.group, "g1");
        }
    }

    #[test]
    fn exclusion_and_empty_group_fail() {
        let registry = ConnectionRegistry::new();
        registry.register(session("g1", "only"));

        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            pick(&registry, "g1", Some("only"), &mut rng),
            Err(Error::Lookup(_))
        ));
        assert!(matches!(
            pick(&registry, "empty", None, &mut rng),
            Err(Error::Lookup(_))
        ));
    }

    #[test]
    fn draw_covers_all_healthy_candidates() {
        let registry = ConnectionRegistry::new();
        registry.register(session("g1", "a"));
        registry.register(session("g1", "b"));

        let mut rng = StdRng::seed_from_u64(9);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(pick(&registry, "g1", None, &mut rng).unwrap().id.clone());
        }
        assert_eq!(seen.len(), 2);
    }
}
