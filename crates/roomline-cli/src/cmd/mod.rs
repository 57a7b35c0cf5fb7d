//! Subcommand handlers. Each module exposes an `*Args` struct and a
//! `run_*` entry point called from `main`.

pub mod chunks;
pub mod delete_chunk;
pub mod events;
pub mod ingest;
pub mod merge;
pub mod prune;
pub mod receipts;
pub mod show;
pub mod state_at;
pub mod summary;

use crate::output::{CliError, OutputMode, render_error};
use anyhow::Context as _;
use roomline_core::config::{self, CacheConfig};
use roomline_core::TimelineStore;
use std::path::{Path, PathBuf};

/// Resolved cache location and its effective config.
#[derive(Debug, Clone)]
pub struct CacheContext {
    pub cache_dir: PathBuf,
    pub config: CacheConfig,
}

impl CacheContext {
    /// Resolve the cache directory from `--cache`, the environment or the
    /// platform default, then load its config.
    pub fn resolve(cache_flag: Option<&Path>) -> anyhow::Result<Self> {
        let cache_dir = config::resolve_cache_dir(cache_flag)?;
        let config = config::resolve_config(&cache_dir)
            .with_context(|| format!("load config for {}", cache_dir.display()))?;
        Ok(Self { cache_dir, config })
    }

    /// Open the store for writing, rendering the failure in `output` mode.
    pub fn open_writable(&self, output: OutputMode) -> anyhow::Result<TimelineStore> {
        self.open_or_render(output, false)
    }

    /// Open the store read-only, rendering the failure in `output` mode.
    pub fn open_read_only(&self, output: OutputMode) -> anyhow::Result<TimelineStore> {
        self.open_or_render(output, true)
    }

    fn open_or_render(&self, output: OutputMode, read_only: bool) -> anyhow::Result<TimelineStore> {
        let opened = if read_only {
            TimelineStore::open_read_only(&self.cache_dir, self.config.clone())
        } else {
            TimelineStore::open(&self.cache_dir, self.config.clone())
        };
        match opened {
            Ok(store) => Ok(store),
            Err(err) => {
                render_error(
                    output,
                    &CliError::with_details(
                        format!("cannot open cache {}: {err:#}", self.cache_dir.display()),
                        "pass --cache <dir> or ingest a batch first with `rl ingest`",
                        "cache_unavailable",
                    ),
                )?;
                Err(err)
            }
        }
    }
}
