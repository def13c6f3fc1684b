//! Argus - Connector-Driven Monitoring Engine
//!
//! This crate turns declarative YAML connectors into live telemetry for one
//! monitored host. It can be used as a library by other Rust projects, or run
//! as a standalone binary with the `argus` executable.
//!
//! # Architecture
//!
//! - **Config**: host identity, cadence and raw protocol sections
//! - **Connectors**: validated YAML documents describing detection criteria
//!   and acquisition jobs per monitor type
//! - **Extensions**: pluggable protocol executors (HTTP, OS commands) behind
//!   a capability registry
//! - **Strategies**: detection, discovery and collect cycles over the
//!   connectors that matched the host
//! - **Telemetry**: the in-memory monitor and metric store the strategies
//!   fill, exportable as a JSON snapshot
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use argus::config::EngineConfig;
//! use argus::connector::ConnectorStore;
//! use argus::extension::ExtensionRegistry;
//! use argus::strategy::{Engine, build_store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load("argus.yaml")?;
//!     let registry = Arc::new(ExtensionRegistry::builtin());
//!     let store = build_store(&config, &registry)?;
//!     let connectors = ConnectorStore::load_from_dir(&config.connector_dir)?;
//!
//!     let mut engine = Engine::new(store, registry, &connectors);
//!     engine.detect_and_discover().await;
//!     engine.collect().await;
//!
//!     println!("{}", serde_json::to_string_pretty(&engine.snapshot().await)?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connector;
pub mod extension;
pub mod strategy;
pub mod telemetry;
