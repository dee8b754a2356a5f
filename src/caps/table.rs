//! In-process capability table.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use super::{CapsHandler, CapsRegistrar, CapsResponse};
use crate::error::Error;
use crate::hooks::AgentId;
use crate::Result;

#[derive(Default)]
struct Tables {
    by_path: HashMap<String, CapsHandler>,
    by_agent: HashMap<AgentId, Vec<String>>,
}

/// Thread-safe path → handler table, with per-agent bookkeeping so a whole
/// session can be torn down at once.
#[derive(Default)]
pub struct CapsTable {
    inner: RwLock<Tables>,
}

impl CapsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a request. Unknown paths are `404`, a known path with a
    /// different method is `405`. The handler runs outside the table lock.
    pub fn dispatch(&self, method: &str, path: &str) -> CapsResponse {
        let path = normalize(path);
        let handler = {
            let tables = self.inner.read().expect("caps table lock poisoned");
            match tables.by_path.get(path) {
                Some(h) => h.clone(),
                None => {
                    debug!(path, "no capability registered at path");
                    return CapsResponse::not_found();
                }
            }
        };
        if !handler.method().eq_ignore_ascii_case(method) {
            return CapsResponse::method_not_allowed();
        }
        handler.handle()
    }

    /// Path of the capability `name` registered for `agent`, if any.
    pub fn capability_path(&self, agent: &AgentId, name: &str) -> Option<String> {
        let tables = self.inner.read().expect("caps table lock poisoned");
        tables.by_agent.get(agent)?.iter().find_map(|p| {
            tables
                .by_path
                .get(p)
                .filter(|h| h.name() == name)
                .map(|_| p.clone())
        })
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("caps table lock poisoned")
            .by_path
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CapsRegistrar for CapsTable {
    fn register_handler(&self, handler: CapsHandler) -> Result<()> {
        let mut tables = self.inner.write().expect("caps table lock poisoned");
        let Tables { by_path, by_agent } = &mut *tables;

        if by_path.contains_key(handler.path()) {
            return Err(Error::DuplicateCapability {
                path: handler.path().to_string(),
            });
        }

        let paths = by_agent.entry(*handler.agent()).or_default();
        // One handler per capability name per agent.
        paths.retain(|p| {
            let same_name = by_path
                .get(p)
                .map_or(false, |existing| existing.name() == handler.name());
            if same_name {
                by_path.remove(p);
            }
            !same_name
        });

        paths.push(handler.path().to_string());
        by_path.insert(handler.path().to_string(), handler);
        Ok(())
    }

    fn deregister_agent(&self, agent: &AgentId) -> usize {
        let mut tables = self.inner.write().expect("caps table lock poisoned");
        let Some(paths) = tables.by_agent.remove(agent) else {
            return 0;
        };
        for p in &paths {
            tables.by_path.remove(p);
        }
        debug!(%agent, removed = paths.len(), "deregistered agent capabilities");
        paths.len()
    }
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
