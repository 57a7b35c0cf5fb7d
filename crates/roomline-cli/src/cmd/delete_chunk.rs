//! `rl delete-chunk`: cascade-delete one chunk.

use crate::cmd::CacheContext;
use crate::output::{OutputMode, fail_with, render};
use clap::Args;
use roomline_core::timeline::ChunkId;
use roomline_core::timeline::chunk::DeleteReport;
use tracing::info;

#[derive(Args, Debug)]
pub struct DeleteChunkArgs {
    /// Room the chunk belongs to.
    pub room: String,

    /// Chunk id as listed by `rl chunks`.
    pub chunk: ChunkId,
}

/// Execute `rl delete-chunk <room> <chunk>`.
///
/// The chunk's linked events, out-of-band state events and the receipt
/// summaries of event ids found only in this chunk go in one transaction.
/// Read receipts themselves are kept.
///
/// # Errors
///
/// Returns an error if the chunk is missing, belongs to another room, or the
/// delete fails (in which case nothing is removed).
pub fn run_delete_chunk(
    args: &DeleteChunkArgs,
    output: OutputMode,
    ctx: &CacheContext,
) -> anyhow::Result<()> {
    let store = ctx.open_writable(output)?;
    let report: DeleteReport = store
        .delete_chunk(&args.room, args.chunk)
        .map_err(|err| fail_with(output, err))?;
    info!(room_id = %args.room, chunk_id = %args.chunk, "chunk deleted from cli");

    render(output, &report, |r, w| {
        writeln!(
            w,
            "✓ deleted chunk {}: {} events, {} state events, {} receipt summaries",
            args.chunk, r.timeline_events, r.state_events, r.receipt_summaries
        )
    })
}
