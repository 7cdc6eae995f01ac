//! ---
//! ring_section: "01-core-runtime"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Shared primitives and utilities for the netring runtime."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
//! Core shared primitives for the netring workspace.
//! This crate exposes configuration loading, logging bootstrap, error kinds,
//! and time utilities consumed by both the registry and the member agent.

pub mod config;
pub mod error;
pub mod logging;
pub mod ratelimit;
pub mod time;

pub use config::{
    ChecksConfig, ExpectedMembersConfig, IntervalsConfig, LoggingConfig, MemberConfig,
    RegistryConfig, RegistryEndpoint, ServerConfig, StoreConfig,
};
pub use error::RingError;
pub use logging::{init_tracing, LogFormat};
pub use ratelimit::LogGate;
