use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "TICKETFLOW_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Prefix of per-key overrides; `__` separates nesting levels, so
/// `TICKETFLOW_SCHEDULER__ENABLED=false` sets `scheduler.enabled`.
const ENV_PREFIX: &str = "TICKETFLOW_";

/// Configuration file the daemon reads: `$TICKETFLOW_CONFIG` or `config.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from file with environment variable overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    extract(Figment::new().merge(Toml::file(path)).merge(overrides()))
}

/// Load configuration from a TOML string, without environment overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    extract(Figment::new().merge(Toml::string(toml_str)))
}

fn overrides() -> Env {
    // The path variable shares the prefix but is not a config key.
    Env::prefixed(ENV_PREFIX)
        .ignore(&["CONFIG"])
        .split("__")
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}
