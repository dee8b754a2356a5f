//! Configuration for the simulator features module.
//!
//! Settings come from a sectioned document (`section -> key -> value`), read
//! from YAML. Several values may live in more than one section; for those the
//! last listed section that defines the key wins. Key and section lookups
//! ignore ASCII case.

use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;
use url::Url;

use crate::error::{Error, ErrorContext};
use crate::llsd::{LlsdMap, LlsdValue};
use crate::Result;

pub const FEATURES_SECTION: &str = "SimulatorFeatures";
pub const GRID_SERVICE_SECTION: &str = "GridService";

/// Top-level key of the sub-map holding grid and viewer extras.
pub const EXTRAS_KEY: &str = "OpenSimExtras";

/// Keys written into the `OpenSimExtras` sub-map.
pub mod extras_keys {
    pub const SEARCH_SERVER_URL: &str = "search-server-url";
    pub const DESTINATION_GUIDE_URL: &str = "destination-guide-url";
    pub const EXPORT_SUPPORTED: &str = "ExportSupported";
    pub const GRID_URL: &str = "GridURL";
    pub const GRID_NAME: &str = "GridName";
}

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Raw sectioned configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    sections: HashMap<String, HashMap<String, Value>>,
}

impl ConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        // An empty section (`Hypergrid:` with nothing under it) parses as null.
        let raw: HashMap<String, Option<HashMap<String, Value>>> = serde_yaml::from_str(text)?;
        let sections: HashMap<String, HashMap<String, Value>> = raw
            .into_iter()
            .map(|(name, keys)| (name, keys.unwrap_or_default()))
            .collect();

        // Lookups ignore case, so names differing only in case would be ambiguous.
        if let Some((first, second)) = find_case_duplicate(sections.keys()) {
            return Err(case_duplicate_error(first, second, "section names"));
        }
        for (name, keys) in &sections {
            if let Some((first, second)) = find_case_duplicate(keys.keys()) {
                return Err(case_duplicate_error(first, second, name));
            }
        }
        Ok(Self { sections })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Set a value, creating the section if needed. An existing section or
    /// key that matches ignoring case is reused.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<Value>) -> &mut Self {
        let section = existing_name(self.sections.keys(), section);
        let keys = self.sections.entry(section).or_default();
        let key = existing_name(keys.keys(), key);
        keys.insert(key, value.into());
        self
    }

    fn section(&self, name: &str) -> Option<&HashMap<String, Value>> {
        self.sections
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.section(section)?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Scalar value rendered as text. Null and collections count as absent.
    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        match self.get(section, key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        let parsed = match self.get(section, key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => crate::llsd::parse_bool_text(s),
            Some(_) => None,
        };
        parsed.map(Some).ok_or_else(|| {
            Error::configuration_with_context(
                "expected a boolean",
                ErrorContext::new()
                    .with_field_path(format!("{}.{}", section, key))
                    .with_source("config"),
            )
        })
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>> {
        let Some(text) = self.get_string(section, key) else {
            return Ok(None);
        };
        text.trim().parse::<u64>().map(Some).map_err(|e| {
            Error::configuration_with_context(
                "expected a non-negative integer",
                ErrorContext::new()
                    .with_field_path(format!("{}.{}", section, key))
                    .with_details(e.to_string())
                    .with_source("config"),
            )
        })
    }

    /// Look `key` up in each of `sections` in order; the last hit wins.
    pub fn get_from_sections(&self, key: &str, sections: &[&str]) -> Option<String> {
        sections
            .iter()
            .filter_map(|s| self.get_string(s, key))
            .last()
    }
}

/// Resolved settings for the features module. Every field is optional in
/// the source; absent strings are empty and absent flags are false.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturesConfig {
    pub search_server_uri: String,
    pub destination_guide_uri: String,
    pub export_supported: bool,
    pub grid_url: String,
    pub grid_name: String,
    /// Extra top-level features applied after the built-in defaults.
    pub features: LlsdMap,
    /// Base URI of the grid service to ask for extra features.
    pub grid_service_uri: Option<String>,
    pub fetch_retries: u32,
    pub fetch_timeout_secs: u64,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            search_server_uri: String::new(),
            destination_guide_uri: String::new(),
            export_supported: false,
            grid_url: String::new(),
            grid_name: String::new(),
            features: LlsdMap::new(),
            grid_service_uri: None,
            fetch_retries: 0,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl FeaturesConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::from_source(&ConfigSource::from_yaml_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_source(&ConfigSource::from_path(path)?)
    }

    pub fn from_source(source: &ConfigSource) -> Result<Self> {
        let mut config = Self::default();

        // Grid-facing settings are only honoured when the module has its own section.
        if source.has_section(FEATURES_SECTION) {
            let s = FEATURES_SECTION;
            config.search_server_uri = source.get_string(s, "SearchServerURI").unwrap_or_default();
            config.destination_guide_uri =
                source.get_string(s, "DestinationGuideURI").unwrap_or_default();
            config.export_supported = source.get_bool(s, "ExportSupported")?.unwrap_or(false);
            config.grid_url = source
                .get_from_sections("GatekeeperURI", &["Startup", "Hypergrid", FEATURES_SECTION])
                .unwrap_or_default();
            config.grid_name = source
                .get_string(s, "GridName")
                .filter(|n| !n.is_empty())
                .or_else(|| source.get_from_sections("gridname", &["GridInfo", FEATURES_SECTION]))
                .unwrap_or_default();

            if let Some(value) = source.get(s, "Features") {
                config.features = parse_feature_map(value)?;
            }
        }

        let g = GRID_SERVICE_SECTION;
        config.grid_service_uri = source
            .get_string(g, "GridServerURI")
            .filter(|u| !u.trim().is_empty());
        if let Some(retries) = source.get_u64(g, "ExtraFeaturesRetries")? {
            config.fetch_retries = u32::try_from(retries).unwrap_or(u32::MAX);
        }
        if let Some(timeout) = source.get_u64(g, "ExtraFeaturesTimeoutSecs")? {
            config.fetch_timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (`SIM_FEATURES_GRID_URI`,
    /// `SIM_FEATURES_FETCH_TIMEOUT_SECS`).
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("SIM_FEATURES_GRID_URI").filter(|u| !u.trim().is_empty()) {
            self.grid_service_uri = Some(uri);
        }
        if let Some(secs) = lookup("SIM_FEATURES_FETCH_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            self.fetch_timeout_secs = secs;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(Error::configuration_with_context(
                "grid fetch timeout must be at least one second",
                ErrorContext::new()
                    .with_field_path(format!("{}.ExtraFeaturesTimeoutSecs", GRID_SERVICE_SECTION))
                    .with_source("config"),
            ));
        }
        if let Some(uri) = &self.grid_service_uri {
            Url::parse(uri).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid grid service URI '{}'", uri),
                    ErrorContext::new()
                        .with_field_path(format!("{}.GridServerURI", GRID_SERVICE_SECTION))
                        .with_details(e.to_string())
                        .with_source("config"),
                )
            })?;
        }
        for (key, value) in &self.features {
            value.validate().map_err(|reason| Error::InvalidValue {
                key: key.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// The `OpenSimExtras` entries contributed by configuration. Only
    /// settings that are present (non-empty, or true) are included.
    pub fn extras(&self) -> LlsdMap {
        let mut extras = LlsdMap::new();
        if !self.search_server_uri.is_empty() {
            extras.insert(
                extras_keys::SEARCH_SERVER_URL.into(),
                self.search_server_uri.clone().into(),
            );
        }
        if !self.destination_guide_uri.is_empty() {
            extras.insert(
                extras_keys::DESTINATION_GUIDE_URL.into(),
                self.destination_guide_uri.clone().into(),
            );
        }
        if self.export_supported {
            extras.insert(extras_keys::EXPORT_SUPPORTED.into(), true.into());
        }
        if !self.grid_url.is_empty() {
            extras.insert(extras_keys::GRID_URL.into(), self.grid_url.clone().into());
        }
        if !self.grid_name.is_empty() {
            extras.insert(extras_keys::GRID_NAME.into(), self.grid_name.clone().into());
        }
        extras
    }
}

fn existing_name<'a>(mut names: impl Iterator<Item = &'a String>, name: &str) -> String {
    names
        .find(|n| n.eq_ignore_ascii_case(name))
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

fn find_case_duplicate<'a>(
    names: impl Iterator<Item = &'a String>,
) -> Option<(&'a str, &'a str)> {
    let mut seen: HashMap<String, &'a str> = HashMap::new();
    for name in names {
        if let Some(first) = seen.insert(name.to_ascii_lowercase(), name) {
            return Some((first, name));
        }
    }
    None
}

fn case_duplicate_error(first: &str, second: &str, scope: &str) -> Error {
    Error::configuration_with_context(
        format!("'{}' and '{}' differ only in case", first, second),
        ErrorContext::new()
            .with_field_path(scope)
            .with_source("config"),
    )
}

fn parse_feature_map(value: &Value) -> Result<LlsdMap> {
    let parsed: LlsdValue = serde_yaml::from_value(value.clone())?;
    match parsed {
        LlsdValue::Map(map) => Ok(map),
        LlsdValue::Undef => Ok(LlsdMap::new()),
        other => Err(Error::configuration_with_context(
            "expected a map of feature values",
            ErrorContext::new()
                .with_field_path(format!("{}.Features", FEATURES_SECTION))
                .with_details(format!("found {}", other.kind()))
                .with_source("config"),
        )),
    }
}
