//! `rl merge`: fold one chunk into another once pagination closes the gap.

use crate::cmd::CacheContext;
use crate::output::{
    CliError, OutputMode, fail_with, or_dash, pretty_kv, pretty_section, render_error, render_mode,
};
use clap::Args;
use roomline_core::event::PaginationDirection;
use roomline_core::timeline::ChunkId;
use roomline_core::timeline::chunk::MergeReport;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Room both chunks belong to.
    pub room: String,

    /// Chunk that receives the events.
    pub target: ChunkId,

    /// Chunk that is emptied and deleted.
    pub source: ChunkId,

    /// Side of `target` the source's events are attached to: `backwards`
    /// prepends older history, `forwards` appends newer events.
    #[arg(long)]
    pub direction: PaginationDirection,
}

fn write_text(report: &MergeReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "moved_events={} moved_state={} dropped_state={}",
        report.moved_events, report.moved_state_events, report.dropped_state_events
    )
}

fn write_pretty(report: &MergeReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Merged into chunk {}", or_dash(report.target)))?;
    pretty_kv(w, "events", report.moved_events.to_string())?;
    pretty_kv(w, "state moved", report.moved_state_events.to_string())?;
    pretty_kv(w, "state dropped", report.dropped_state_events.to_string())
}

/// Execute `rl merge <room> <target> <source> --direction <dir>`.
///
/// # Errors
///
/// Returns an error if either chunk is missing or foreign, the chunks are
/// the same, or the merge fails (in which case neither chunk changes).
pub fn run_merge(args: &MergeArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    if args.target == args.source {
        render_error(
            output,
            &CliError::with_details(
                format!("cannot merge chunk {} into itself", args.target),
                "pass two different chunk ids",
                "invalid_input",
            ),
        )?;
        anyhow::bail!("cannot merge chunk {} into itself", args.target);
    }

    let store = ctx.open_writable(output)?;
    let report = store
        .merge(&args.room, args.target, args.source, args.direction)
        .map_err(|err| fail_with(output, err))?;
    render_mode(output, &report, write_text, write_pretty)
}
