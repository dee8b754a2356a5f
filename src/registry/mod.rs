//! Feature registry: the canonical simulator feature document.
//!
//! The document is published copy-on-write through an [`ArcSwap`]. Readers
//! load the current version without blocking anyone; writers clone it,
//! apply their change to the private copy and publish the result with a
//! compare-and-swap, retrying when another writer got there first. A
//! published document is never mutated again, so every reader sees some
//! complete prefix of the writes and never a half-applied one.

use std::ops::Deref;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::error::Error;
use crate::llsd::{LlsdMap, LlsdValue};
use crate::Result;

/// Upper bound on compare-and-swap retries for a single write. Writers are
/// rare, so exhausting it means something is republishing in a tight loop.
const MAX_PUBLISH_ATTEMPTS: usize = 10_000;

/// One immutable published version of the feature document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDocument {
    version: u64,
    features: LlsdMap,
}

impl FeatureDocument {
    /// Number of writes published before this version.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn features(&self) -> &LlsdMap {
        &self.features
    }
}

impl Deref for FeatureDocument {
    type Target = LlsdMap;

    fn deref(&self) -> &LlsdMap {
        &self.features
    }
}

/// Thread-safe owner of the canonical feature map.
#[derive(Debug)]
pub struct FeatureRegistry {
    doc: ArcSwap<FeatureDocument>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self {
            doc: ArcSwap::from_pointee(FeatureDocument::default()),
        }
    }

    /// Create a registry whose first version is `features`.
    ///
    /// Fails if any value cannot be represented on the wire.
    pub fn with_features(features: LlsdMap) -> Result<Self> {
        for (key, value) in &features {
            check_value(key, value)?;
        }
        Ok(Self {
            doc: ArcSwap::from_pointee(FeatureDocument {
                version: 0,
                features,
            }),
        })
    }

    /// Insert or overwrite a feature.
    pub fn set(&self, key: impl Into<String>, value: impl Into<LlsdValue>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        check_value(&key, &value)?;
        self.modify(|features| {
            features.insert(key.clone(), value.clone());
            true
        });
        Ok(())
    }

    /// Remove a feature, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.modify(|features| features.shift_remove(key).is_some())
    }

    /// Copy of the current value of `key`.
    pub fn try_get(&self, key: &str) -> Option<LlsdValue> {
        self.doc.load().features.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.doc.load().features.contains_key(key)
    }

    /// Independent deep copy of the whole document.
    pub fn snapshot(&self) -> LlsdMap {
        self.doc.load().features.clone()
    }

    /// The currently published version, shared and immutable.
    pub fn current(&self) -> Arc<FeatureDocument> {
        self.doc.load_full()
    }

    pub fn version(&self) -> u64 {
        self.doc.load().version
    }

    pub fn len(&self) -> usize {
        self.doc.load().features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.doc.load().features.keys().cloned().collect()
    }

    /// Merge `entries` into the map stored under `key` as one write.
    ///
    /// Existing entries of the sub-map are kept unless `entries` names the
    /// same key. A missing or non-map value at `key` is replaced by a map.
    pub fn merge_submap(&self, key: &str, entries: LlsdMap) -> Result<()> {
        for (k, v) in &entries {
            check_value(&format!("{}.{}", key, k), v)?;
        }
        let merged = entries.len();
        self.modify(|features| {
            let slot = features
                .entry(key.to_string())
                .or_insert_with(LlsdValue::map);
            if slot.as_map().is_none() {
                *slot = LlsdValue::map();
            }
            if let Some(sub) = slot.as_map_mut() {
                for (k, v) in &entries {
                    sub.insert(k.clone(), v.clone());
                }
            }
            true
        });
        debug!(key, merged, "merged feature sub-map");
        Ok(())
    }

    /// Apply several changes as a single published write.
    ///
    /// `apply` works on a private copy and may run more than once if another
    /// writer publishes concurrently, so it must not have side effects. Values
    /// it inserts are validated before publication.
    pub fn update<F>(&self, mut apply: F) -> Result<()>
    where
        F: FnMut(&mut LlsdMap),
    {
        let mut invalid = None;
        self.modify(|features| {
            apply(features);
            invalid = features
                .iter()
                .find_map(|(k, v)| v.validate().err().map(|reason| (k.clone(), reason)));
            invalid.is_none()
        });
        match invalid {
            Some((key, reason)) => Err(Error::InvalidValue { key, reason }),
            None => Ok(()),
        }
    }

    /// Publish the result of `apply` on a copy of the current document.
    ///
    /// `apply` returns whether it changed anything; nothing is published
    /// otherwise. Returns whether a new version was published.
    fn modify<F>(&self, mut apply: F) -> bool
    where
        F: FnMut(&mut LlsdMap) -> bool,
    {
        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let cur = self.doc.load_full();
            let mut features = cur.features.clone();
            if !apply(&mut features) {
                return false;
            }
            let next = Arc::new(FeatureDocument {
                version: cur.version + 1,
                features,
            });
            let prev = self.doc.compare_and_swap(&cur, next);
            if Arc::ptr_eq(&prev, &cur) {
                return true;
            }
        }
        panic!(
            "feature registry: write lost {} consecutive publish races",
            MAX_PUBLISH_ATTEMPTS
        );
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_value(key: &str, value: &LlsdValue) -> Result<()> {
    value.validate().map_err(|reason| Error::InvalidValue {
        key: key.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_registry() -> FeatureRegistry {
        let registry = FeatureRegistry::new();
        registry.set("MeshUploadEnabled", true).unwrap();
        registry
    }

    #[test]
    fn test_set_and_try_get() {
        let registry = mesh_registry();
        assert_eq!(
            registry.try_get("MeshUploadEnabled"),
            Some(LlsdValue::Boolean(true))
        );
        assert_eq!(registry.try_get("MeshRezEnabled"), None);

        registry.set("MeshUploadEnabled", false).unwrap();
        assert_eq!(
            registry.try_get("MeshUploadEnabled"),
            Some(LlsdValue::Boolean(false))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = mesh_registry();
        assert!(registry.remove("MeshUploadEnabled"));
        assert!(!registry.remove("MeshUploadEnabled"));
        assert!(registry.snapshot().get("MeshUploadEnabled").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_remove_does_not_publish() {
        let registry = mesh_registry();
        let before = registry.version();
        assert!(!registry.remove("NotThere"));
        assert_eq!(registry.version(), before);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let registry = mesh_registry();
        let mut snap = registry.snapshot();
        snap.insert("Greeting".into(), "hi".into());
        snap.insert("MeshUploadEnabled".into(), false.into());

        let again = registry.snapshot();
        assert_eq!(again.len(), 1);
        assert_eq!(again["MeshUploadEnabled"], LlsdValue::Boolean(true));
    }

    #[test]
    fn test_snapshot_does_not_see_later_writes() {
        let registry = mesh_registry();
        let snap = registry.snapshot();
        let view = registry.current();
        registry.set("Later", 1).unwrap();
        registry.remove("MeshUploadEnabled");

        assert!(snap.contains_key("MeshUploadEnabled"));
        assert!(!snap.contains_key("Later"));
        assert!(view.contains_key("MeshUploadEnabled"));
        assert!(!view.contains_key("Later"));
        assert_eq!(registry.keys(), vec!["Later".to_string()]);
    }

    #[test]
    fn test_set_rejects_non_finite_reals() {
        let registry = FeatureRegistry::new();
        let err = registry.set("Gravity", f64::NAN).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "Gravity"));
        assert!(registry.is_empty());
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn test_merge_submap_overwrites_same_keys() {
        let registry = FeatureRegistry::new();
        let mut config = LlsdMap::new();
        config.insert("A".into(), "1".into());
        config.insert("B".into(), "2".into());
        registry.merge_submap("OpenSimExtras", config).unwrap();

        let mut fetched = LlsdMap::new();
        fetched.insert("B".into(), "3".into());
        fetched.insert("C".into(), "4".into());
        registry.merge_submap("OpenSimExtras", fetched).unwrap();

        let extras = registry.try_get("OpenSimExtras").unwrap();
        let expected: LlsdValue = [("A", "1"), ("B", "3"), ("C", "4")].into_iter().collect();
        assert_eq!(extras, expected);
    }

    #[test]
    fn test_merge_submap_replaces_non_map_value() {
        let registry = FeatureRegistry::new();
        registry.set("OpenSimExtras", "oops").unwrap();
        let mut entries = LlsdMap::new();
        entries.insert("GridName".into(), "Test Grid".into());
        registry.merge_submap("OpenSimExtras", entries).unwrap();

        let extras = registry.try_get("OpenSimExtras").unwrap();
        assert_eq!(extras.as_map().unwrap().len(), 1);
    }

    #[test]
    fn test_update_is_a_single_version() {
        let registry = FeatureRegistry::new();
        registry
            .update(|features| {
                features.insert("MeshRezEnabled".into(), true.into());
                features.insert("MeshXferEnabled".into(), true.into());
            })
            .unwrap();
        assert_eq!(registry.version(), 1);
        assert_eq!(registry.len(), 2);

        let err = registry
            .update(|features| {
                features.insert("Bad".into(), f64::INFINITY.into());
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
        assert!(!registry.contains("Bad"));
        assert_eq!(registry.version(), 1);
    }

    #[test]
    fn test_with_features_validates() {
        let mut seed = LlsdMap::new();
        seed.insert("Ok".into(), 1.into());
        assert!(FeatureRegistry::with_features(seed.clone()).is_ok());
        seed.insert("Bad".into(), f64::NAN.into());
        assert!(FeatureRegistry::with_features(seed).is_err());
    }
}
