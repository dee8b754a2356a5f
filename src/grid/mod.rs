//! Extra features advertised by the grid.
//!
//! At region load the grid service is asked once for a flat key/value set of
//! extra capabilities. Every value is turned into an LLSD string and merged
//! into the `OpenSimExtras` sub-map, overriding configured values of the same
//! name. The remote call and the translation happen before the registry is
//! touched; the merge itself is a single write.

mod http;

pub use http::HttpGridFeatureSource;

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::{extras_keys, EXTRAS_KEY};
use crate::llsd::{parse_bool_text, LlsdMap, LlsdValue};
use crate::registry::FeatureRegistry;
use crate::Result;

/// Raw extra features as returned by the grid, in the order it sent them.
pub type ExtraFeatures = IndexMap<String, serde_json::Value>;

/// Something that can report the grid's extra features.
#[async_trait]
pub trait GridFeatureSource: Send + Sync {
    async fn extra_features(&self) -> Result<ExtraFeatures>;
}

/// Fixed set of extra features, for standalone regions and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticGridFeatureSource {
    features: ExtraFeatures,
}

impl StaticGridFeatureSource {
    pub fn new(features: ExtraFeatures) -> Self {
        Self { features }
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for StaticGridFeatureSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[async_trait]
impl GridFeatureSource for StaticGridFeatureSource {
    async fn extra_features(&self) -> Result<ExtraFeatures> {
        Ok(self.features.clone())
    }
}

/// Retry behaviour for the one-shot fetch.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchPolicy {
    /// A single attempt, no retries.
    fn default() -> Self {
        Self {
            max_retries: 0,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl FetchPolicy {
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Exponential backoff: `min_delay * 2^attempt`, capped at `max_delay`.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.min_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << attempt.min(32)).min(cap);
        Duration::from_millis(delay)
    }
}

/// What a successful fetch did to the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridFetchOutcome {
    /// Keys merged into the extras sub-map.
    pub merged: usize,
    /// Keys dropped because their values could not be rendered as text.
    pub skipped: Vec<String>,
    /// Parsed `ExportSupported` flag, if the grid sent a parseable one.
    pub export_supported: Option<bool>,
    pub attempts: u32,
}

/// Fetch the grid's extra features and merge them into `registry`.
///
/// On error the registry is left untouched.
pub async fn fetch_grid_extra_features(
    source: &dyn GridFeatureSource,
    registry: &FeatureRegistry,
    policy: &FetchPolicy,
) -> Result<GridFetchOutcome> {
    let (raw, attempts) = fetch_with_retry(source, policy).await?;
    let (entries, mut outcome) = translate(raw);
    outcome.attempts = attempts;

    if entries.is_empty() {
        debug!("grid advertised no extra features");
        return Ok(outcome);
    }
    registry.merge_submap(EXTRAS_KEY, entries)?;

    info!(
        merged = outcome.merged,
        skipped = outcome.skipped.len(),
        attempts,
        "merged grid extra features"
    );
    Ok(outcome)
}

async fn fetch_with_retry(
    source: &dyn GridFeatureSource,
    policy: &FetchPolicy,
) -> Result<(ExtraFeatures, u32)> {
    let mut attempt = 0u32;
    loop {
        match source.extra_features().await {
            Ok(features) => return Ok((features, attempt + 1)),
            Err(e) if attempt < policy.max_retries && e.is_transient() => {
                let delay = policy.backoff(attempt);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    retry_in_ms = delay.as_millis() as u64,
                    "grid extra features fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Turn raw grid values into LLSD strings. Null and structured values have
/// no sensible text form and are skipped.
fn translate(raw: ExtraFeatures) -> (LlsdMap, GridFetchOutcome) {
    let mut entries = LlsdMap::with_capacity(raw.len());
    let mut outcome = GridFetchOutcome::default();

    for (key, value) in raw {
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                debug!(
                    key = %key,
                    kind = json_kind(&other),
                    "skipping unstringifiable extra feature"
                );
                outcome.skipped.push(key);
                continue;
            }
        };

        if key == extras_keys::EXPORT_SUPPORTED {
            match parse_bool_text(&text) {
                Some(flag) => outcome.export_supported = Some(flag),
                None => warn!(value = %text, "ignoring unparseable ExportSupported from grid"),
            }
        }
        entries.insert(key, LlsdValue::String(text));
    }

    outcome.merged = entries.len();
    (entries, outcome)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
