//! `rl prune`: evict a room's oldest chunks.

use crate::cmd::CacheContext;
use crate::output::{CliError, OutputMode, fail_with, render, render_error};
use clap::Args;
use roomline_core::config::CONFIG_FILE;
use roomline_core::timeline::ChunkId;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Room id.
    pub room: String,

    /// Chunks to keep, the live chunk included. Defaults to
    /// `retention.max_chunks_per_room`.
    #[arg(long)]
    pub max: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PruneResult {
    pub room_id: String,
    pub max_chunks: usize,
    pub pruned: Vec<ChunkId>,
}

/// Execute `rl prune <room>`.
///
/// # Errors
///
/// Returns an error if no limit is configured or given, or the prune fails.
pub fn run_prune(args: &PruneArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let Some(max_chunks) = args.max.or(ctx.config.retention.max_chunks_per_room) else {
        render_error(
            output,
            &CliError::with_details(
                "no chunk limit given",
                format!("pass --max or set retention.max_chunks_per_room in {CONFIG_FILE}"),
                "missing_limit",
            ),
        )?;
        anyhow::bail!("no chunk limit given");
    };

    let store = ctx.open_writable(output)?;
    let pruned = store
        .prune(&args.room, max_chunks)
        .map_err(|err| fail_with(output, err))?;

    let result = PruneResult {
        room_id: args.room.clone(),
        max_chunks,
        pruned,
    };
    render(output, &result, |r, w| {
        if r.pruned.is_empty() {
            return writeln!(w, "nothing to prune in {} (limit {})", r.room_id, r.max_chunks);
        }
        let ids: Vec<String> = r.pruned.iter().map(ToString::to_string).collect();
        writeln!(w, "✓ pruned {} chunk(s) from {}: {}", ids.len(), r.room_id, ids.join(", "))
    })
}
