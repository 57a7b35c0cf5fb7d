use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the per-cache config, next to the database.
pub const CONFIG_FILE: &str = "roomline.toml";

/// Environment variable overriding the default cache directory.
pub const CACHE_DIR_ENV: &str = "ROOMLINE_CACHE_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Preferred CLI output mode (`pretty`, `text` or `json`).
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Take the advisory `<db>.lock` file lock on open.
    #[serde(default = "default_true")]
    pub process_lock: bool,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_size: default_pool_size(),
            process_lock: default_true(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Upper bound on chunks kept per room; `None` keeps everything.
    #[serde(default)]
    pub max_chunks_per_room: Option<usize>,
    /// Prune the room after every ingested batch.
    #[serde(default)]
    pub prune_on_ingest: bool,
}

fn parse_config_file(path: &Path) -> Result<CacheConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<CacheConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load `<cache_dir>/roomline.toml`, if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_cache_config(cache_dir: &Path) -> Result<Option<CacheConfig>> {
    let path = cache_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    parse_config_file(&path).map(Some)
}

/// Load `<user config dir>/roomline/config.toml`, if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<Option<CacheConfig>> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(None);
    };

    let path = config_dir.join("roomline/config.toml");
    if !path.exists() {
        return Ok(None);
    }
    parse_config_file(&path).map(Some)
}

/// Effective config for a cache: the cache's own file, else the user file,
/// else defaults.
///
/// # Errors
///
/// Returns an error if a present config file cannot be read or parsed.
pub fn resolve_config(cache_dir: &Path) -> Result<CacheConfig> {
    if let Some(config) = load_cache_config(cache_dir)? {
        return Ok(config);
    }
    Ok(load_user_config()?.unwrap_or_default())
}

/// Cache directory: explicit flag, then `ROOMLINE_CACHE_DIR`, then the
/// platform cache dir.
///
/// # Errors
///
/// Returns an error if no candidate is available.
pub fn resolve_cache_dir(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env::var_os(CACHE_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
        .map(|dir| dir.join("roomline"))
        .context("no cache directory: pass --cache or set ROOMLINE_CACHE_DIR")
}

const fn default_true() -> bool {
    true
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_pool_size() -> usize {
    4
}

const fn default_lock_timeout_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_config_is_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(load_cache_config(dir.path()).expect("load").is_none());
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: CacheConfig = toml::from_str("").expect("parse empty");
        assert_eq!(cfg.storage.busy_timeout_ms, 5_000);
        assert_eq!(cfg.storage.pool_size, 4);
        assert!(cfg.storage.process_lock);
        assert_eq!(cfg.retention.max_chunks_per_room, None);
        assert!(!cfg.retention.prune_on_ingest);
    }

    #[test]
    fn cache_config_parses_sections() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
output = "json"

[storage]
busy_timeout_ms = 250
process_lock = false

[retention]
max_chunks_per_room = 8
prune_on_ingest = true
"#,
        )
        .expect("write config");

        let cfg = resolve_config(dir.path()).expect("resolve");
        assert_eq!(cfg.storage.busy_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.storage.pool_size, 4);
        assert!(!cfg.storage.process_lock);
        assert_eq!(cfg.retention.max_chunks_per_room, Some(8));
        assert!(cfg.retention.prune_on_ingest);
        assert_eq!(cfg.output.as_deref(), Some("json"));
    }

    #[test]
    fn broken_config_reports_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join(CONFIG_FILE), "[storage\n").expect("write config");

        let err = load_cache_config(dir.path()).expect_err("must fail");
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let dir = resolve_cache_dir(Some(Path::new("/tmp/rl-cache"))).expect("resolve");
        assert_eq!(dir, PathBuf::from("/tmp/rl-cache"));
    }
}
