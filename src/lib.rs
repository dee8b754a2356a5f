//! # sim-features
//!
//! Concurrent simulator feature registry for region servers.
//!
//! ## Overview
//!
//! A region advertises which optional behaviours it supports (mesh upload,
//! physics shape types, search and destination guide URLs, …) through a
//! structured LLSD document. Viewers fetch it from a per-agent capability
//! URL. This crate owns that document and everything around it:
//!
//! - **Registry**: lock-free copy-on-write document; readers never see a
//!   half-applied write and snapshots never change after they are taken
//! - **Hooks**: per-request callbacks that customise one agent's copy
//! - **Capabilities**: unguessable `/CAPS/<token>` endpoints bound to agents
//! - **Grid fetch**: one-shot merge of the grid's extra features
//! - **LLSD**: the value model and its XML wire encoding
//!
//! ## Quick Start
//!
//! ```rust
//! use sim_features::caps::CapsTable;
//! use sim_features::{FeaturesConfig, SimulatorFeatures};
//! use uuid::Uuid;
//!
//! let module = SimulatorFeatures::new(FeaturesConfig::default())?;
//! module.on_request_fn("greeter", |_agent, features| {
//!     features.insert("Greeting".into(), "hi".into());
//! });
//!
//! let table = CapsTable::new();
//! let agent = Uuid::new_v4();
//! let path = module.register_caps(agent, &table)?;
//!
//! let response = table.dispatch("GET", &path);
//! assert_eq!(response.status, 200);
//! assert!(response.body.contains("<key>Greeting</key>"));
//! # Ok::<(), sim_features::Error>(())
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`llsd`] | LLSD value tree and XML encoding |
//! | [`registry`] | The canonical feature document |
//! | [`hooks`] | Per-request feature hooks |
//! | [`caps`] | Capability endpoints and the in-process table |
//! | [`grid`] | Grid extra features fetch and merge |
//! | [`config`] | Module configuration |
//! | [`features`] | The module facade tying it together |

pub mod caps;
pub mod config;
pub mod features;
pub mod grid;
pub mod hooks;
pub mod llsd;
pub mod registry;

pub use caps::{CapsRegistrar, CapsResponse, CapsTable};
pub use config::FeaturesConfig;
pub use features::SimulatorFeatures;
pub use hooks::{AgentId, FeatureRequestHook, HookManager};
pub use llsd::{LlsdMap, LlsdValue};
pub use registry::FeatureRegistry;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
