#![forbid(unsafe_code)]

//! Runtime configuration for the backend.
//!
//! Values are resolved from three layers: explicit overrides (CLI flags),
//! process environment variables, and a `.env` file next to the binary.
//! Overrides win over the environment, the environment wins over the file.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Remote deployment the proxy endpoint relays to when `VERCEL_API_URL` is
/// not set.
pub const DEFAULT_PROXY_TARGET: &str = "https://youtube-stats-backend.vercel.app";

/// Origins allowed by default: local dev servers plus the production
/// deployment and its preview deployments (single `*` wildcard per pattern).
const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "https://youtube-stats.vercel.app",
    "https://youtube-stats-*.vercel.app",
];

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub host: String,
    /// A missing key is surfaced per request as a configuration error, so the
    /// server still starts without one.
    pub api_key: Option<String>,
    pub proxy_target: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_config() -> Result<RuntimeConfig> {
    resolve_config(RuntimeOverrides::default())
}

pub fn resolve_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_config_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeConfig {
    build_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let api_key =
        lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup).filter(|key| !key.is_empty());
    let proxy_target = lookup_value("VERCEL_API_URL", file_vars, &env_lookup)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_PROXY_TARGET.to_string());
    let allowed_origins = lookup_value("ALLOWED_ORIGINS", file_vars, &env_lookup)
        .map(|value| parse_origin_list(&value))
        .filter(|origins| !origins.is_empty())
        .unwrap_or_else(|| {
            DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect()
        });

    RuntimeConfig {
        port,
        host,
        api_key,
        proxy_target,
        allowed_origins,
    }
}

fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

/// Matches a request origin against the allow-list. A pattern may contain a
/// single `*` which matches any (possibly empty) substring, e.g.
/// `https://youtube-stats-*.vercel.app` for preview deployments.
pub fn origin_allowed(origin: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.split_once('*') {
        None => pattern == origin,
        Some((prefix, suffix)) => {
            origin.len() >= prefix.len() + suffix.len()
                && origin.starts_with(prefix)
                && origin.ends_with(suffix)
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
