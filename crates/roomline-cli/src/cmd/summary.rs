//! `rl summary`: room overview.

use crate::cmd::CacheContext;
use crate::cmd::events::event_line;
use crate::output::{OutputMode, fail_with, or_dash, pretty_kv, pretty_section, render_mode};
use clap::Args;
use roomline_core::db::query::{RoomSummary, room_summary};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// Room id.
    pub room: String,
}

fn write_text(summary: &RoomSummary, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}  chunks={} events={} state={} receipts={} live={}",
        summary.room_id,
        summary.chunk_count,
        summary.event_count,
        summary.state_event_count,
        summary.receipt_count,
        or_dash(summary.live_chunk),
    )?;
    if let Some(latest) = &summary.latest_event {
        writeln!(w, "{}", event_line(latest))?;
    }
    Ok(())
}

fn write_pretty(summary: &RoomSummary, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &summary.room_id)?;
    pretty_kv(w, "chunks", summary.chunk_count.to_string())?;
    pretty_kv(w, "events", summary.event_count.to_string())?;
    pretty_kv(w, "state events", summary.state_event_count.to_string())?;
    pretty_kv(w, "receipts", summary.receipt_count.to_string())?;
    pretty_kv(w, "live chunk", or_dash(summary.live_chunk))?;
    if let Some(latest) = &summary.latest_event {
        pretty_kv(w, "latest", event_line(latest).trim_start())?;
    }
    Ok(())
}

/// Execute `rl summary <room>`.
///
/// # Errors
///
/// Returns an error if the cache cannot be opened or queried.
pub fn run_summary(args: &SummaryArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let store = ctx.open_read_only(output)?;
    let summary = store
        .read(|conn| room_summary(conn, &args.room))
        .map_err(|err| fail_with(output, err))?;
    render_mode(output, &summary, write_text, write_pretty)
}
