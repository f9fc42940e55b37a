//! Config file discovery, layering, and environment variable overlay.

use crate::{ConfigError, VaultConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only existing files
/// are returned.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/assetvault/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("assetvault/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("assetvault.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file into a raw TOML table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in the overlay replaces the base value.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a typed config. Missing keys take defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<VaultConfig, ConfigError> {
    let mut config = toml::Value::Table(table)
        .try_into::<VaultConfig>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
    expand_config_paths(&mut config);
    Ok(config)
}

fn expand_config_paths(config: &mut VaultConfig) {
    let paths = &mut config.paths;
    paths.state_dir = expand_path(&paths.state_dir.to_string_lossy());
    paths.cas_dir = paths.cas_dir.take().map(|p| expand_path(&p.to_string_lossy()));
    paths.records_db = paths
        .records_db
        .take()
        .map(|p| expand_path(&p.to_string_lossy()));
}

/// Apply `ASSETVAULT_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut VaultConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit set of variables.
pub fn apply_overrides_from(
    config: &mut VaultConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let applied = match key.as_str() {
            "ASSETVAULT_STATE_DIR" => {
                config.paths.state_dir = expand_path(&value);
                true
            }
            "ASSETVAULT_CAS_DIR" => {
                config.paths.cas_dir = Some(expand_path(&value));
                true
            }
            "ASSETVAULT_RECORDS_DB" => {
                config.paths.records_db = Some(expand_path(&value));
                true
            }
            "ASSETVAULT_RETENTION_SECS" => parse_into(&value, &mut config.gc.retention_secs),
            "ASSETVAULT_PURGE_INTERVAL_SECS" => parse_into(&value, &mut config.gc.interval_secs),
            "ASSETVAULT_FULL_BLOB_SCAN" => {
                config.gc.full_blob_scan = value == "1" || value.eq_ignore_ascii_case("true");
                true
            }
            "ASSETVAULT_IDLE_TIMEOUT_MS" => {
                parse_into(&value, &mut config.queue.idle_timeout_ms)
            }
            "ASSETVAULT_LOG_LEVEL" | "RUST_LOG" => {
                config.telemetry.log_level = value;
                true
            }
            _ => false,
        };
        if applied {
            sources.env_overrides.push(key);
        }
    }
}

fn parse_into(value: &str, slot: &mut u64) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

/// Expand `~/` and a leading `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(slash) => (&stripped[..slash], Some(&stripped[slash + 1..])),
            None => (stripped, None),
        };
        if let Ok(var_value) = env::var(var_name) {
            let base = PathBuf::from(var_value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }

    PathBuf::from(path)
}
