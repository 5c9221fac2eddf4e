//! Typed environment variable lookups
//!
//! Unset or empty variables fall back to the caller's default. A variable that
//! is set but cannot be parsed is an error rather than a silent fallback, so a
//! typo in `IMDB_CHUNK_SIZE` does not quietly load with the default.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read `key` and parse it, returning `None` when unset or empty
pub fn var_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CommonError::InvalidVar {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(CommonError::InvalidVar {
            key: key.to_string(),
            value: String::new(),
            reason: "not valid unicode".to_string(),
        }),
    }
}

/// Read `key` and parse it, falling back to `default` when unset or empty
pub fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(var_opt(key)?.unwrap_or(default))
}

/// Read a boolean flag; accepts `true/false`, `1/0`, `yes/no`, `on/off`
pub fn var_flag(key: &str, default: bool) -> Result<bool> {
    let Some(raw) = var_opt::<String>(key)? else {
        return Ok(default);
    };

    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CommonError::InvalidVar {
            key: key.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}
