// src/state/mod.rs
mod active_request;
mod backend;
mod table;

pub use active_request::ActiveRequest;
pub use backend::{Backend, BackendState, Health};
pub use table::{ActiveRequestGuard, RoutingTable};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn fresh_backend_is_unknown_and_not_routable() {
        let table = RoutingTable::new();
        let b = Backend::new("h1", 9001);
        table.add_backend(b.clone());

        assert!(table.current_state(&b).unwrap().health == Health::Unknown);
        assert!(!table.healthy(None));
        assert!(table.backend_for("1").is_none());
    }

    #[test]
    fn readd_preserves_existing_state() {
        let table = RoutingTable::new();
        let b = Backend::new("h1", 9001);
        table.set_backends(vec![b.clone()]);
        table.update_backend_state(&b, BackendState::healthy("3".into()));

        // re-adding via set_backends with the same list must not wipe health
        table.set_backends(vec![b.clone()]);
        let state = table.current_state(&b).unwrap();
        assert!(state.is_healthy());
        assert_eq!(state.version.as_deref(), Some("3"));
    }

    #[test]
    fn remove_then_readd_resets_to_unknown() {
        let table = RoutingTable::new();
        let b = Backend::new("h1", 9001);
        table.add_backend(b.clone());
        table.update_backend_state(&b, BackendState::healthy("3".into()));
        table.remove_backend(&b);
        table.add_backend(b.clone());

        let state = table.current_state(&b).unwrap();
        assert_eq!(state.health, Health::Unknown);
        assert!(state.version.is_none());
    }

    #[test]
    fn add_existing_backend_is_a_no_op() {
        let table = RoutingTable::new();
        let b = Backend::new("h1", 9001);
        table.add_backend(b.clone());
        table.update_backend_state(&b, BackendState::healthy("3".into()));
        table.add_backend(b.clone());

        let state = table.current_state(&b).unwrap();
        assert!(state.is_healthy());
    }

    #[test]
    fn available_versions_and_backend_for_agree() {
        let table = RoutingTable::new();
        let a = Backend::new("h1", 9001);
        let b = Backend::new("h2", 9002);
        table.set_backends(vec![a.clone(), b.clone()]);
        table.update_backend_state(&a, BackendState::healthy("1".into()));
        table.update_backend_state(&b, BackendState::healthy("2".into()));

        let versions = table.available_versions();
        assert!(versions.contains("1"));
        assert!(versions.contains("2"));
        for v in &versions {
            let backend = table.backend_for(v).expect("should find a backend");
            assert_eq!(table.current_state(&backend).unwrap().version.as_deref(), Some(v.as_str()));
        }
    }

    #[test]
    fn unhealthy_state_always_clears_version() {
        let table = RoutingTable::new();
        let a = Backend::new("h1", 9001);
        table.add_backend(a.clone());
        table.update_backend_state(&a, BackendState::healthy("1".into()));
        table.update_backend_state(&a, BackendState::unhealthy());

        let state = table.current_state(&a).unwrap();
        assert!(!state.is_healthy());
        assert!(state.version.is_none());
    }

    #[test]
    fn removed_backend_update_is_discarded() {
        let table = RoutingTable::new();
        let a = Backend::new("h1", 9001);
        table.add_backend(a.clone());
        table.remove_backend(&a);
        // simulate a probe result landing after removal
        table.update_backend_state(&a, BackendState::healthy("1".into()));
        assert!(table.current_state(&a).is_none());
    }

    #[test]
    fn active_request_guard_removes_on_drop() {
        let table = RoutingTable::new();
        let b = Backend::new("h1", 9001);
        {
            let _guard = table.track_request("client1".into(), "/x".into(), b.clone());
            assert_eq!(table.activity_snapshot().len(), 1);
        }
        assert_eq!(table.activity_snapshot().len(), 0);
    }

    #[test]
    fn weights_round_trip() {
        let table = RoutingTable::new();
        let mut weights = HashMap::new();
        weights.insert("1".to_string(), 1u64);
        weights.insert("2".to_string(), 9u64);
        table.set_weights(weights.clone());
        assert_eq!(table.weights(), weights);
    }

    #[test]
    fn all_backends_sorted_is_ordered_by_host_then_port() {
        let table = RoutingTable::new();
        table.set_backends(vec![
            Backend::new("b", 1),
            Backend::new("a", 2),
            Backend::new("a", 1),
        ]);
        let sorted = table.all_backends_sorted();
        let keys: Vec<(String, u16)> = sorted.into_iter().map(|(b, _)| (b.host, b.port)).collect();
        assert_eq!(
            keys,
            vec![("a".to_string(), 1), ("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }
}
