//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (fix-up, then semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → RoutingEngine::apply_config
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → sent over a channel to the daemon
//!     → engine reloads pool, rules and settings
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - An invalid reload never replaces the running configuration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::RouterConfig;
