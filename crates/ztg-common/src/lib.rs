//! ZTG shared types
//!
//! Configuration sections for every ZTG component plus the recoverable
//! configuration error type.

pub mod config;
pub mod error;

pub use config::{DpiConfig, GatewayConfig, KeyStoreConfig, PolicyConfig, ZtgConfig};
pub use error::ConfigError;
