//! # Runtime Configuration Module
//!
//! Environment-variable knobs that tune runtime behavior without touching
//! [`ServerConfig`](crate::config::ServerConfig).
//!
//! ## Environment Variables
//!
//! ### `BRRTR_STACK_SIZE`
//!
//! Stack size for background-task coroutines. Accepts decimal (`16384`) or hexadecimal
//! (`0x4000`). Default: `0x4000` (16 KB).
//!
//! Stack size affects:
//! - **Memory usage**: total = stack_size × concurrent background tasks
//! - **Stack overflows**: too small panics inside the task (which is caught and logged)
//!
//! ### `BRRTR_SCHEMA_FORMATS`
//!
//! Whether JSON Schema `format` keywords (`email`, `date-time`, ...) are enforced when schemas
//! are compiled. `on`/`true`/`1` or `off`/`false`/`0`. Default: on.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use brrtdispatch::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use std::env;

/// Default coroutine stack size (16 KB).
pub const DEFAULT_STACK_SIZE: usize = 0x4000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for background coroutines in bytes
    pub stack_size: usize,
    /// Enforce JSON Schema `format` keywords
    pub validate_formats: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            validate_formats: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let stack_size = lookup("BRRTR_STACK_SIZE")
            .and_then(|val| parse_size(&val))
            .unwrap_or(DEFAULT_STACK_SIZE);
        let validate_formats = lookup("BRRTR_SCHEMA_FORMATS")
            .and_then(|val| parse_flag(&val))
            .unwrap_or(true);
        RuntimeConfig {
            stack_size,
            validate_formats,
        }
    }
}

fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
