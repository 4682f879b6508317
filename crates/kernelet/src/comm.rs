//! Ephemeral bidirectional sub-channels ("comms").
//!
//! A comm is opened by either side of the connection, carries opaque
//! payloads while open, and is destroyed on close. The registry is the
//! single source of truth for which comm ids are live. Protocol violations
//! (duplicate open, traffic on unknown ids) are logged and swallowed, never
//! surfaced to the dispatcher.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

/// Receiving side of a comm, registered per target name.
///
/// Held as a trait object; one implementation per capability the kernel
/// exposes over comms.
pub trait CommTarget: Send + Sync {
    /// A peer opened a comm addressed to this target.
    fn opened(&self, _comm_id: &str, _data: &Value) {}

    /// Payload delivered on an open comm.
    fn receive(&self, comm_id: &str, data: &Value);

    /// The comm was closed by the peer.
    fn closed(&self, _comm_id: &str, _data: &Value) {}
}

/// A live comm: which target interprets its payloads.
#[derive(Clone)]
struct Comm {
    target_name: String,
    /// `None` when no target was registered for the name at open time;
    /// the comm is still tracked (and listed) but payloads are dropped.
    target: Option<Arc<dyn CommTarget>>,
}

/// Tracks live comms and the targets that payloads dispatch to.
///
/// Safe under concurrent Shell/Control access: comm lifecycle mutations can
/// race with `comm_info_request` enumeration.
#[derive(Default)]
pub struct CommRegistry {
    targets: DashMap<String, Arc<dyn CommTarget>>,
    comms: DashMap<String, Comm>,
}

impl CommRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler invoked for comms opened with `name`.
    pub fn register_target(&self, name: &str, target: Arc<dyn CommTarget>) {
        tracing::debug!(target_name = name, "registering comm target");
        self.targets.insert(name.to_string(), target);
    }

    pub fn unregister_target(&self, name: &str) -> Option<Arc<dyn CommTarget>> {
        self.targets.remove(name).map(|(_, target)| target)
    }

    /// Open a new comm. A duplicate id is a peer protocol violation:
    /// logged, original comm kept.
    pub fn open(&self, comm_id: &str, target_name: &str, data: &Value) {
        let target = self
            .targets
            .get(target_name)
            .map(|entry| Arc::clone(entry.value()));
        if target.is_none() {
            tracing::warn!(comm_id, target_name, "comm_open for unregistered target");
        }

        match self.comms.entry(comm_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(comm_id, target_name, "duplicate comm_open ignored");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(Comm {
                    target_name: target_name.to_string(),
                    target: target.clone(),
                });
            }
        }

        if let Some(target) = target {
            target.opened(comm_id, data);
        }
    }

    /// Close a comm. Closing an unknown id is a logged no-op.
    pub fn close(&self, comm_id: &str, data: &Value) {
        match self.comms.remove(comm_id) {
            Some((_, comm)) => {
                if let Some(target) = comm.target {
                    target.closed(comm_id, data);
                }
            }
            None => tracing::warn!(comm_id, "comm_close for unknown comm"),
        }
    }

    /// Deliver a payload on an open comm. Unknown ids are logged and the
    /// payload dropped.
    pub fn message(&self, comm_id: &str, data: &Value) {
        let target = match self.comms.get(comm_id) {
            Some(comm) => comm.target.clone(),
            None => {
                tracing::warn!(comm_id, "dropping comm_msg for unknown comm");
                return;
            }
        };

        match target {
            Some(target) => target.receive(comm_id, data),
            None => tracing::warn!(comm_id, "dropping comm_msg for comm without target"),
        }
    }

    /// All (comm_id, target_name) pairs, filtered by target name when the
    /// filter is non-empty.
    pub fn list(&self, filter: &str) -> Vec<(String, String)> {
        self.comms
            .iter()
            .filter(|entry| filter.is_empty() || entry.value().target_name == filter)
            .map(|entry| (entry.key().clone(), entry.value().target_name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every hook invocation as "(event) (comm_id) (payload)".
    #[derive(Default)]
    struct RecordingTarget {
        events: Mutex<Vec<String>>,
    }

    impl RecordingTarget {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl CommTarget for RecordingTarget {
        fn opened(&self, comm_id: &str, data: &Value) {
            self.events
                .lock()
                .unwrap()
                .push(format!("opened {comm_id} {data}"));
        }

        fn receive(&self, comm_id: &str, data: &Value) {
            self.events
                .lock()
                .unwrap()
                .push(format!("receive {comm_id} {data}"));
        }

        fn closed(&self, comm_id: &str, data: &Value) {
            self.events
                .lock()
                .unwrap()
                .push(format!("closed {comm_id} {data}"));
        }
    }

    fn registry_with_target(name: &str) -> (CommRegistry, Arc<RecordingTarget>) {
        let registry = CommRegistry::new();
        let target = Arc::new(RecordingTarget::default());
        registry.register_target(name, target.clone());
        (registry, target)
    }

    #[test]
    fn open_message_close_lifecycle() {
        let (registry, target) = registry_with_target("plot");

        registry.open("c1", "plot", &json!({"w": 640}));
        registry.message("c1", &json!("frame-1"));
        registry.close("c1", &json!({}));

        assert_eq!(
            target.events(),
            vec![
                r#"opened c1 {"w":640}"#,
                r#"receive c1 "frame-1""#,
                "closed c1 {}",
            ]
        );
    }

    #[test]
    fn message_after_close_is_dropped() {
        let (registry, target) = registry_with_target("plot");

        registry.open("c1", "plot", &json!({}));
        registry.close("c1", &json!({}));
        registry.message("c1", &json!("late"));

        assert!(!target.events().iter().any(|e| e.contains("late")));
        assert!(registry.list("").is_empty());
    }

    #[test]
    fn duplicate_open_keeps_original_comm() {
        let (registry, target) = registry_with_target("plot");
        let other = Arc::new(RecordingTarget::default());
        registry.register_target("table", other.clone());

        registry.open("c1", "plot", &json!({}));
        registry.open("c1", "table", &json!({}));

        assert_eq!(registry.list(""), vec![("c1".into(), "plot".into())]);
        assert!(other.events().is_empty());

        registry.message("c1", &json!("payload"));
        assert!(target.events().iter().any(|e| e.contains("payload")));
    }

    #[test]
    fn open_without_registered_target_is_tracked_but_inert() {
        let registry = CommRegistry::new();
        registry.open("c1", "unknown", &json!({}));

        assert_eq!(registry.list(""), vec![("c1".into(), "unknown".into())]);
        // No target: payload dropped, no panic.
        registry.message("c1", &json!("payload"));
    }

    #[test]
    fn message_on_unknown_comm_is_dropped() {
        let (registry, target) = registry_with_target("plot");
        registry.message("never-opened", &json!("payload"));
        assert!(target.events().is_empty());
    }

    #[test]
    fn close_unknown_comm_is_noop() {
        let (registry, target) = registry_with_target("plot");
        registry.close("never-opened", &json!({}));
        assert!(target.events().is_empty());
    }

    #[test]
    fn list_filters_by_target_name() {
        let (registry, _plot) = registry_with_target("plot");
        registry.register_target("table", Arc::new(RecordingTarget::default()));

        registry.open("c1", "plot", &json!({}));
        registry.open("c2", "table", &json!({}));
        registry.open("c3", "plot", &json!({}));

        let mut all = registry.list("");
        all.sort();
        assert_eq!(all.len(), 3);

        let mut plots = registry.list("plot");
        plots.sort();
        assert_eq!(
            plots,
            vec![
                ("c1".to_string(), "plot".to_string()),
                ("c3".to_string(), "plot".to_string()),
            ]
        );

        assert_eq!(registry.list("table").len(), 1);
        assert!(registry.list("nothing-matches").is_empty());
    }

    #[test]
    fn unregister_target_stops_new_opens_resolving() {
        let (registry, target) = registry_with_target("plot");
        registry.unregister_target("plot");

        registry.open("c1", "plot", &json!({}));
        registry.message("c1", &json!("payload"));

        assert!(target.events().is_empty());
    }
}
