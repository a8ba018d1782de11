//! ---
//! ordset_section: "01-core-functionality"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Shared primitives and utilities for the core runtime."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
//! Core shared primitives for the ordset workspace.
//! This crate exposes configuration loading and logging bootstrap consumed by the
//! controller crates and the daemon.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ControllerConfig, LoggingConfig, MetricsConfig, QueueConfig, RetryConfig,
    SimulationConfig,
};
pub use logging::{init_tracing, LogFormat};
