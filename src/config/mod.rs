//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (GITLAB_MEMWD_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig handed to main, which builds hosts and monitors
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - The environment is read only here; core types take explicit values

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, ConfigError};
pub use schema::{DatabaseAddress, HandlerKind, LoadBalancingConfig, ObservabilityConfig, ServiceConfig, WatchdogConfig};
