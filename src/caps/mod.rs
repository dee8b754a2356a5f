//! Capability endpoints.
//!
//! A capability is an unguessable per-agent URL path (`/CAPS/<token>`) bound
//! to a request handler. The transport that actually serves these paths sits
//! behind [`CapsRegistrar`]; [`CapsTable`] is the in-process implementation
//! and [`server`] exposes it over HTTP.

#[cfg(feature = "server")]
pub mod server;
mod table;

pub use table::CapsTable;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::hooks::AgentId;
use crate::Result;

pub const CAPS_PREFIX: &str = "/CAPS/";

/// Times a freshly minted token is re-rolled after colliding with a
/// registered path before giving up.
const MAX_TOKEN_ATTEMPTS: usize = 4;

/// Response produced by a capability handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsResponse {
    pub status: u16,
    pub content_type: String,
    pub keep_alive: bool,
    pub body: String,
}

impl CapsResponse {
    /// `200 text/plain`, connection closed after the response.
    pub fn ok_text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain".to_string(),
            keep_alive: false,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain".to_string(),
            keep_alive: false,
            body: "Not Found".to_string(),
        }
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: 405,
            content_type: "text/plain".to_string(),
            keep_alive: false,
            body: "Method Not Allowed".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type CapsCallback = Arc<dyn Fn() -> CapsResponse + Send + Sync>;

/// A request handler bound to one agent and one capability path.
#[derive(Clone)]
pub struct CapsHandler {
    name: String,
    method: String,
    path: String,
    agent: AgentId,
    callback: CapsCallback,
}

impl CapsHandler {
    pub fn new<F>(
        name: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        agent: AgentId,
        callback: F,
    ) -> Self
    where
        F: Fn() -> CapsResponse + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            method: method.into(),
            path: path.into(),
            agent,
            callback: Arc::new(callback),
        }
    }

    /// Capability name, e.g. `SimulatorFeatures`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn handle(&self) -> CapsResponse {
        (self.callback)()
    }
}

impl fmt::Debug for CapsHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapsHandler")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("agent", &self.agent)
            .finish()
    }
}

/// The transport-side table that turns capability paths into reachable
/// endpoints.
pub trait CapsRegistrar: Send + Sync {
    /// Register `handler` at its path. A handler with the same name for the
    /// same agent is replaced. Fails with [`Error::DuplicateCapability`] if
    /// the path is already taken.
    fn register_handler(&self, handler: CapsHandler) -> Result<()>;

    /// Drop every handler registered for `agent`; returns how many.
    fn deregister_agent(&self, agent: &AgentId) -> usize;
}

/// Fresh unguessable capability path.
pub fn new_capability_path() -> String {
    format!("{}{}", CAPS_PREFIX, Uuid::new_v4())
}

/// Mint a token for `agent` and register a `GET` handler under it.
///
/// Tokens are random v4 UUIDs; a collision with an existing path is
/// astronomically unlikely but is detected by the registrar and re-rolled.
/// Returns the registered path.
pub fn issue<F>(
    registrar: &dyn CapsRegistrar,
    name: &str,
    agent: AgentId,
    callback: F,
) -> Result<String>
where
    F: Fn() -> CapsResponse + Send + Sync + 'static,
{
    let callback: CapsCallback = Arc::new(callback);
    let mut last_err = None;
    for _ in 0..MAX_TOKEN_ATTEMPTS {
        let path = new_capability_path();
        let cb = Arc::clone(&callback);
        let handler = CapsHandler {
            name: name.to_string(),
            method: "GET".to_string(),
            path: path.clone(),
            agent,
            callback: cb,
        };
        match registrar.register_handler(handler) {
            Ok(()) => {
                debug!(%agent, capability = name, %path, "registered capability");
                return Ok(path);
            }
            Err(e @ Error::DuplicateCapability { .. }) => {
                warn!(%agent, capability = name, "capability token collision, re-rolling");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::DuplicateCapability {
        path: CAPS_PREFIX.to_string(),
    }))
}
