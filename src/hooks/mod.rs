//! Per-request feature hooks.
//!
//! Hooks customize the feature snapshot sent to one agent. They run
//! synchronously, in registration order, on the request's private copy; the
//! canonical document is never reachable from here.

use std::sync::{Arc, RwLock};

use tracing::debug;
use uuid::Uuid;

use crate::llsd::LlsdMap;

/// Identifier of an agent (avatar session owner).
pub type AgentId = Uuid;

/// Observer invoked for every simulator features request.
pub trait FeatureRequestHook: Send + Sync {
    /// Inspect or edit the snapshot about to be returned to `agent`.
    fn on_request(&self, agent: &AgentId, features: &mut LlsdMap);
}

/// Adapts a closure into a [`FeatureRequestHook`].
pub struct FnHook<F> {
    func: F,
}

impl<F> FnHook<F>
where
    F: Fn(&AgentId, &mut LlsdMap) + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> FeatureRequestHook for FnHook<F>
where
    F: Fn(&AgentId, &mut LlsdMap) + Send + Sync,
{
    fn on_request(&self, agent: &AgentId, features: &mut LlsdMap) {
        (self.func)(agent, features)
    }
}

struct Hook {
    name: String,
    callback: Arc<dyn FeatureRequestHook>,
}

/// Ordered, named list of request hooks.
pub struct HookManager {
    hooks: RwLock<Vec<Hook>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Append a hook. Names need not be unique; [`unregister`](Self::unregister)
    /// removes every hook with the given name.
    pub fn register(&self, name: impl Into<String>, hook: Arc<dyn FeatureRequestHook>) {
        let name = name.into();
        debug!(hook = %name, "registering simulator features hook");
        self.hooks
            .write()
            .expect("hook list lock poisoned")
            .push(Hook {
                name,
                callback: hook,
            });
    }

    pub fn register_fn<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&AgentId, &mut LlsdMap) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnHook::new(func)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut hooks = self.hooks.write().expect("hook list lock poisoned");
        let len = hooks.len();
        hooks.retain(|h| h.name != name);
        hooks.len() < len
    }

    /// Run every hook on `features`.
    ///
    /// The list is copied out before any hook runs, so hooks may register or
    /// unregister hooks themselves; such changes apply from the next request.
    pub fn trigger(&self, agent: &AgentId, features: &mut LlsdMap) {
        let callbacks: Vec<Arc<dyn FeatureRequestHook>> = {
            let hooks = self.hooks.read().expect("hook list lock poisoned");
            hooks.iter().map(|h| h.callback.clone()).collect()
        };
        for cb in callbacks {
            cb.on_request(agent, features);
        }
    }

    pub fn count(&self) -> usize {
        self.hooks.read().expect("hook list lock poisoned").len()
    }

    pub fn names(&self) -> Vec<String> {
        self.hooks
            .read()
            .expect("hook list lock poisoned")
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.hooks.write().expect("hook list lock poisoned").clear();
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llsd::LlsdValue;

    #[test]
    fn test_no_hooks_leaves_snapshot_untouched() {
        let hooks = HookManager::new();
        let mut features = LlsdMap::new();
        features.insert("MeshUploadEnabled".into(), true.into());
        let before = features.clone();
        hooks.trigger(&Uuid::nil(), &mut features);
        assert_eq!(features, before);
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let hooks = HookManager::new();
        hooks.register_fn("first", |_, f| {
            f.insert("Trail".into(), "a".into());
        });
        hooks.register_fn("second", |_, f| {
            let prev = f
                .get("Trail")
                .and_then(LlsdValue::as_str)
                .unwrap_or_default()
                .to_string();
            f.insert("Trail".into(), format!("{}b", prev).into());
        });

        let mut features = LlsdMap::new();
        hooks.trigger(&Uuid::new_v4(), &mut features);
        assert_eq!(features["Trail"].as_str(), Some("ab"));
        assert_eq!(hooks.names(), vec!["first", "second"]);
    }

    #[test]
    fn test_hooks_receive_the_agent() {
        let hooks = HookManager::new();
        let vip = Uuid::new_v4();
        hooks.register_fn("vip", move |agent, f| {
            if *agent == vip {
                f.insert("VipOnly".into(), true.into());
            }
        });

        let mut for_vip = LlsdMap::new();
        hooks.trigger(&vip, &mut for_vip);
        let mut for_other = LlsdMap::new();
        hooks.trigger(&Uuid::new_v4(), &mut for_other);

        assert!(for_vip.contains_key("VipOnly"));
        assert!(!for_other.contains_key("VipOnly"));
    }

    #[test]
    fn test_unregister_by_name() {
        let hooks = HookManager::new();
        hooks.register_fn("greeter", |_, f| {
            f.insert("Greeting".into(), "hi".into());
        });
        assert_eq!(hooks.count(), 1);
        assert!(hooks.unregister("greeter"));
        assert!(!hooks.unregister("greeter"));

        let mut features = LlsdMap::new();
        hooks.trigger(&Uuid::nil(), &mut features);
        assert!(features.is_empty());
    }

    #[test]
    fn test_hook_may_register_hooks_without_deadlock() {
        let hooks = Arc::new(HookManager::new());
        let inner = Arc::clone(&hooks);
        hooks.register_fn("spawner", move |_, _| {
            inner.register_fn("late", |_, f| {
                f.insert("Late".into(), true.into());
            });
        });

        let mut first = LlsdMap::new();
        hooks.trigger(&Uuid::nil(), &mut first);
        assert!(!first.contains_key("Late"));
        assert_eq!(hooks.count(), 2);

        hooks.unregister("spawner");
        let mut second = LlsdMap::new();
        hooks.trigger(&Uuid::nil(), &mut second);
        assert!(second.contains_key("Late"));
    }
}
