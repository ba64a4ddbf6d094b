//! Runtime abstraction for process-level lookups.
//!
//! Configuration resolution and the CLI read the environment and local files
//! through this trait so tests can substitute a `MockRuntime`.
//!
//! # Structure
//!
//! - `env` - Environment variables
//! - `fs` - Reading request bodies from disk

mod env;
mod fs;

use anyhow::Result;
use std::env as std_env;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
pub trait Runtime: Send + Sync {
    // Environment
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError>;

    // File System
    fn read_to_string(&self, path: &Path) -> Result<String>;
}

pub struct RealRuntime;

impl Runtime for RealRuntime {
    fn env_var(&self, key: &str) -> Result<String, std_env::VarError> {
        self.env_var_impl(key)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.read_to_string_impl(path)
    }
}

/// Looks up an environment variable, treating blank values as unset.
pub fn env_nonempty(runtime: &dyn Runtime, key: &str) -> Option<String> {
    runtime
        .env_var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
