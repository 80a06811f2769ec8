//! Hierarchical TOML configuration.
//!
//! See [`loader`] for the merge order and [`schema`] for the settings.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{ConfigLoader, USER_CONFIG_DIR, USER_CONFIG_FILE};
pub use schema::{Config, ConsentSettings, InterceptSettings, LoopbackSettings, SessionSettings};
