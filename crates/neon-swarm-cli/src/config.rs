use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use neon_swarm_core::api::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_MODEL_BASE_URL};
use neon_swarm_core::control_plane::DEFAULT_BASE_URL;
use neon_swarm_core::driver::DEFAULT_MAX_ITERATIONS;
use neon_swarm_core::mask_secret;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default)]
    pub neon: NeonConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct NeonConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_neon_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for NeonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeonConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for NeonConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_neon_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_neon_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_model_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_model_base_url() -> String {
    DEFAULT_MODEL_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_uri: Option<String>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field(
                "connection_uri",
                &self
                    .connection_uri
                    .as_deref()
                    .map(neon_swarm_core::database::redact_uri),
            )
            .finish()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".neon-swarm")
}

impl SwarmConfig {
    /// Load from `custom_path` or `~/.neon-swarm/config.toml`. Without a
    /// file at the default location, configuration comes from the
    /// environment alone.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        if custom_path.is_none() && !path.exists() {
            debug!("No config at {}; using environment", path.display());
            let mut config = Self::default();
            config.apply_env_fallback(env_lookup);
            return Ok(config);
        }

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `neon-swarm init` first.",
                path.display()
            )
        })?;

        let mut config = Self::parse(&content, env_lookup)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.warn_hardcoded(&content);
        config.apply_env_fallback(env_lookup);
        Ok(config)
    }

    fn parse(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let expanded = expand_env_vars(content, lookup);
        Ok(toml::from_str(&expanded)?)
    }

    /// Fill settings left empty by the file from the environment
    fn apply_env_fallback(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.neon.api_key.is_empty()
            && let Some(key) = lookup("NEON_API_KEY")
        {
            self.neon.api_key = key;
        }
        if self.model.api_key.is_empty()
            && let Some(key) = lookup("ANTHROPIC_API_KEY")
        {
            self.model.api_key = key;
        }
        if self.database.connection_uri.as_deref().is_none_or(str::is_empty) {
            self.database.connection_uri = lookup("DATABASE_URL").filter(|u| !u.is_empty());
        }
        if let Some(base_url) = lookup("NEON_API_BASE_URL").filter(|u| !u.is_empty())
            && self.neon.base_url == DEFAULT_BASE_URL
        {
            self.neon.base_url = base_url;
        }
    }

    fn warn_hardcoded(&self, raw: &str) {
        for (name, var) in [("neon.api_key", "NEON_API_KEY"), ("model.api_key", "ANTHROPIC_API_KEY")] {
            let value = raw_value(raw, name);
            if let Some(value) = value
                && !value.is_empty()
                && !value.contains("${")
            {
                warn!(
                    "{} is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                    name, var
                );
            }
        }
        if let Some(uri) = raw_value(raw, "database.connection_uri")
            && uri.contains('@')
            && !uri.contains("${")
        {
            warn!(
                "database.connection_uri embeds credentials. For security, use connection_uri = \"${{DATABASE_URL}}\""
            );
        }
    }

    /// Copy with every secret masked, for display
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        shown.neon.api_key = mask_secret(&self.neon.api_key);
        shown.model.api_key = mask_secret(&self.model.api_key);
        shown.database.connection_uri = self
            .database
            .connection_uri
            .as_deref()
            .map(neon_swarm_core::database::redact_uri);
        shown
    }
}

/// Value of `section.key` in the unexpanded file, if it is a string
fn raw_value(raw: &str, dotted: &str) -> Option<String> {
    let (section, key) = dotted.split_once('.')?;
    let table: toml::Table = toml::from_str(raw).ok()?;
    table
        .get(section)?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

/// Refuse files readable by group or other; they may hold secrets
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(anyhow::anyhow!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "NEON_API_KEY",
    "ANTHROPIC_API_KEY",
    "DATABASE_URL",
    "NEON_API_BASE_URL",
];

fn expand_env_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len;
    }
    result
}
