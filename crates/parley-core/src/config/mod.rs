//! Configuration module
//!
//! A single YAML document describes the primary provider, the retry policy,
//! the turn limit, and the fallback chain. See [`ParleyConfig`].

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::LlmError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ParleyConfig, LlmError> {
    ConfigLoader::from_file(path).await
}
