//! The simulator features module.
//!
//! [`SimulatorFeatures`] owns a region's [`FeatureRegistry`], seeds it with
//! the built-in defaults and configured extras, merges the grid's extra
//! features once at load, and hands every arriving agent a
//! `SimulatorFeatures` capability that returns the document as LLSD XML.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::caps::{self, CapsRegistrar, CapsResponse};
use crate::config::{FeaturesConfig, EXTRAS_KEY};
use crate::grid::{fetch_grid_extra_features, FetchPolicy, GridFeatureSource, GridFetchOutcome};
use crate::hooks::{AgentId, FeatureRequestHook, HookManager};
use crate::llsd::{xml, LlsdMap, LlsdValue};
use crate::registry::FeatureRegistry;
use crate::Result;

/// Capability name viewers look up in their seed capability response.
pub const CAPABILITY_NAME: &str = "SimulatorFeatures";

/// Built-in feature flags every region advertises.
pub fn default_features() -> LlsdMap {
    let mut features = LlsdMap::new();
    features.insert("MeshRezEnabled".into(), true.into());
    features.insert("MeshUploadEnabled".into(), true.into());
    features.insert("MeshXferEnabled".into(), true.into());
    features.insert("PhysicsMaterialsEnabled".into(), true.into());

    let mut shape_types = LlsdMap::new();
    shape_types.insert("convex".into(), true.into());
    shape_types.insert("none".into(), true.into());
    shape_types.insert("prim".into(), true.into());
    features.insert("PhysicsShapeTypes".into(), shape_types.into());
    features
}

/// Defaults, then configured top-level features, then configured extras
/// merged into any extras map the configured features already carry.
fn seed_document(config: &FeaturesConfig) -> LlsdMap {
    let mut features = default_features();
    for (key, value) in &config.features {
        features.insert(key.clone(), value.clone());
    }

    let extras = config.extras();
    if !extras.is_empty() {
        let slot = features
            .entry(EXTRAS_KEY.to_string())
            .or_insert_with(LlsdValue::map);
        if slot.as_map().is_none() {
            *slot = LlsdValue::map();
        }
        if let Some(map) = slot.as_map_mut() {
            map.extend(extras);
        }
    }
    features
}

pub struct SimulatorFeatures {
    registry: Arc<FeatureRegistry>,
    hooks: Arc<HookManager>,
    config: FeaturesConfig,
    export_supported: AtomicBool,
    grid_fetched: AtomicBool,
}

impl SimulatorFeatures {
    pub fn new(config: FeaturesConfig) -> Result<Self> {
        let registry = FeatureRegistry::with_features(seed_document(&config))?;
        info!(features = registry.len(), "simulator features seeded");
        Ok(Self {
            registry: Arc::new(registry),
            hooks: Arc::new(HookManager::new()),
            export_supported: AtomicBool::new(config.export_supported),
            grid_fetched: AtomicBool::new(false),
            config,
        })
    }

    /// Wrap an already populated registry. No defaults are applied and the
    /// configuration is the default one.
    pub fn with_registry(registry: Arc<FeatureRegistry>) -> Self {
        Self {
            registry,
            hooks: Arc::new(HookManager::new()),
            config: FeaturesConfig::default(),
            export_supported: AtomicBool::new(false),
            grid_fetched: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    pub fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    pub fn config(&self) -> &FeaturesConfig {
        &self.config
    }

    pub fn add_feature(&self, name: impl Into<String>, value: impl Into<LlsdValue>) -> Result<()> {
        self.registry.set(name, value)
    }

    pub fn remove_feature(&self, name: &str) -> bool {
        self.registry.remove(name)
    }

    pub fn try_get_feature(&self, name: &str) -> Option<LlsdValue> {
        self.registry.try_get(name)
    }

    /// Deep copy of the current feature document.
    pub fn features(&self) -> LlsdMap {
        self.registry.snapshot()
    }

    /// Whether object export is allowed, from configuration or the grid.
    pub fn export_supported(&self) -> bool {
        self.export_supported.load(Ordering::Acquire)
    }

    pub fn on_request(&self, name: impl Into<String>, hook: Arc<dyn FeatureRequestHook>) {
        self.hooks.register(name, hook);
    }

    pub fn on_request_fn<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&AgentId, &mut LlsdMap) + Send + Sync + 'static,
    {
        self.hooks.register_fn(name, func);
    }

    /// The document as `agent` would receive it: a fresh snapshot after
    /// every request hook has had its turn.
    pub fn features_for_agent(&self, agent: &AgentId) -> LlsdMap {
        features_for_agent(&self.registry, &self.hooks, agent)
    }

    /// Serve one simulator features request for `agent`.
    pub fn handle_request(&self, agent: &AgentId) -> CapsResponse {
        respond(&self.registry, &self.hooks, agent)
    }

    /// Give `agent` its own `SimulatorFeatures` capability. Returns the path.
    pub fn register_caps(&self, agent: AgentId, registrar: &dyn CapsRegistrar) -> Result<String> {
        let registry = Arc::clone(&self.registry);
        let hooks = Arc::clone(&self.hooks);
        caps::issue(registrar, CAPABILITY_NAME, agent, move || {
            respond(&registry, &hooks, &agent)
        })
    }

    /// Tear down the capabilities of a departing agent.
    pub fn deregister_caps(&self, agent: &AgentId, registrar: &dyn CapsRegistrar) -> usize {
        registrar.deregister_agent(agent)
    }

    /// Merge the grid's extra features into the document.
    ///
    /// Runs at most once successfully per module. Failures are logged and
    /// leave the document as it was; a later call may try again.
    pub async fn load_grid_extra_features(
        &self,
        source: &dyn GridFeatureSource,
        policy: &FetchPolicy,
    ) -> Option<GridFetchOutcome> {
        if self.grid_fetched.swap(true, Ordering::AcqRel) {
            debug!("grid extra features already loaded");
            return None;
        }

        match fetch_grid_extra_features(source, &self.registry, policy).await {
            Ok(outcome) => {
                if let Some(flag) = outcome.export_supported {
                    self.export_supported.store(flag, Ordering::Release);
                }
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "failed to load grid extra features");
                self.grid_fetched.store(false, Ordering::Release);
                None
            }
        }
    }
}

fn features_for_agent(registry: &FeatureRegistry, hooks: &HookManager, agent: &AgentId) -> LlsdMap {
    let mut snapshot = registry.snapshot();
    hooks.trigger(agent, &mut snapshot);
    snapshot
}

fn respond(registry: &FeatureRegistry, hooks: &HookManager, agent: &AgentId) -> CapsResponse {
    debug!(%agent, "simulator features request");
    let features = features_for_agent(registry, hooks, agent);
    CapsResponse::ok_text(xml::map_to_string(&features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::CapsTable;
    use crate::grid::StaticGridFeatureSource;
    use uuid::Uuid;

    #[test]
    fn test_defaults_without_config() {
        let module = SimulatorFeatures::new(FeaturesConfig::default()).unwrap();
        let features = module.features();
        assert_eq!(features["MeshRezEnabled"], LlsdValue::Boolean(true));
        assert_eq!(features["PhysicsMaterialsEnabled"], LlsdValue::Boolean(true));
        let shapes = features["PhysicsShapeTypes"].as_map().unwrap();
        assert_eq!(shapes.len(), 3);
        assert!(!features.contains_key(EXTRAS_KEY));
        assert!(!module.export_supported());
    }

    #[test]
    fn test_config_extras_and_features_are_seeded() {
        let config = FeaturesConfig {
            search_server_uri: "http://search.example/".into(),
            export_supported: true,
            grid_name: "Test Grid".into(),
            features: [("MaxAgentGroups".to_string(), LlsdValue::Integer(60))]
                .into_iter()
                .collect(),
            ..FeaturesConfig::default()
        };
        let module = SimulatorFeatures::new(config).unwrap();

        let extras = module.try_get_feature(EXTRAS_KEY).unwrap();
        let extras = extras.as_map().unwrap();
        assert_eq!(extras["search-server-url"].as_str(), Some("http://search.example/"));
        assert_eq!(extras["ExportSupported"], LlsdValue::Boolean(true));
        assert_eq!(extras["GridName"].as_str(), Some("Test Grid"));
        assert_eq!(
            module.try_get_feature("MaxAgentGroups"),
            Some(LlsdValue::Integer(60))
        );
        assert!(module.export_supported());
    }

    #[test]
    fn test_request_response_is_llsd_text() {
        let module = SimulatorFeatures::new(FeaturesConfig::default()).unwrap();
        let resp = module.handle_request(&Uuid::new_v4());
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "text/plain");
        assert!(!resp.keep_alive);

        let decoded = xml::from_str(&resp.body).unwrap();
        assert_eq!(decoded, LlsdValue::Map(module.features()));
    }

    #[test]
    fn test_hooks_do_not_touch_the_registry() {
        let module = SimulatorFeatures::new(FeaturesConfig::default()).unwrap();
        module.on_request_fn("strip-mesh", |_, f| {
            f.shift_remove("MeshUploadEnabled");
            f.insert("Greeting".into(), "hi".into());
        });

        let agent = Uuid::new_v4();
        let seen = module.features_for_agent(&agent);
        assert!(!seen.contains_key("MeshUploadEnabled"));
        assert!(seen.contains_key("Greeting"));

        let canonical = module.features();
        assert!(canonical.contains_key("MeshUploadEnabled"));
        assert!(!canonical.contains_key("Greeting"));
        assert_eq!(module.registry().version(), 0);
    }

    #[test]
    fn test_register_caps_and_dispatch() {
        let module = SimulatorFeatures::new(FeaturesConfig::default()).unwrap();
        let table = CapsTable::new();
        let agent = Uuid::new_v4();
        let path = module.register_caps(agent, &table).unwrap();

        assert_eq!(
            table.capability_path(&agent, CAPABILITY_NAME),
            Some(path.clone())
        );
        let resp = table.dispatch("GET", &path);
        assert_eq!(resp.status, 200);

        // Later writes show up on the same capability.
        module.add_feature("LateFeature", true).unwrap();
        let body = xml::from_str(&table.dispatch("GET", &path).body).unwrap();
        assert!(body.as_map().unwrap().contains_key("LateFeature"));

        assert_eq!(module.deregister_caps(&agent, &table), 1);
        assert_eq!(table.dispatch("GET", &path).status, 404);
    }

    #[tokio::test]
    async fn test_grid_export_flag_is_mirrored_once() {
        let module = SimulatorFeatures::new(FeaturesConfig::default()).unwrap();
        let source: StaticGridFeatureSource =
            [("ExportSupported", "true"), ("GridName", "Remote")].into_iter().collect();

        let outcome = module
            .load_grid_extra_features(&source, &FetchPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome.export_supported, Some(true));
        assert!(module.export_supported());

        let extras = module.try_get_feature(EXTRAS_KEY).unwrap();
        assert_eq!(extras.as_map().unwrap()["GridName"].as_str(), Some("Remote"));

        // A second load is a no-op.
        assert!(module
            .load_grid_extra_features(&source, &FetchPolicy::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unparseable_grid_export_flag_keeps_config_value() {
        let config = FeaturesConfig {
            export_supported: true,
            ..FeaturesConfig::default()
        };
        let module = SimulatorFeatures::new(config).unwrap();
        let source: StaticGridFeatureSource =
            [("ExportSupported", "sometimes")].into_iter().collect();
        module
            .load_grid_extra_features(&source, &FetchPolicy::default())
            .await
            .unwrap();
        assert!(module.export_supported());
    }
}
