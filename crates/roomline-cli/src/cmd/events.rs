//! `rl events`: a chunk's linked events in display order.

use crate::cmd::CacheContext;
use crate::output::{
    CliError, OutputMode, fail_with, millis_to_local, or_dash, pretty_kv, pretty_section,
    render_error, render_mode,
};
use clap::Args;
use roomline_core::ErrorCode;
use roomline_core::db::query::{StateEntry, TimelineEvent, chunk_events, chunk_state_events};
use roomline_core::timeline::ChunkId;
use roomline_core::timeline::chunk::find_chunk;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Chunk id as listed by `rl chunks`.
    pub chunk: ChunkId,

    /// Also list the chunk's out-of-band state events.
    #[arg(long)]
    pub state: bool,
}

#[derive(Debug, Serialize)]
pub struct ChunkListing {
    pub chunk_id: ChunkId,
    pub room_id: String,
    pub events: Vec<TimelineEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_events: Option<Vec<StateEntry>>,
}

/// One-line rendering shared by `events` and `summary`.
pub fn event_line(event: &TimelineEvent) -> String {
    let id = event.event.event_id.as_deref().unwrap_or("-");
    let mut line = format!(
        "{:>5}  s{:<4} {}  {}  {}",
        event.display_index, event.state_index, id, event.event.event_type, event.event.sender_id
    );
    if let Some(name) = &event.sender.display_name {
        line.push_str(&format!(" ({name})"));
    }
    if !event.receipts.is_empty() {
        line.push_str(&format!("  read by {}", event.receipts.len()));
    }
    line
}

fn write_text(listing: &ChunkListing, w: &mut dyn Write) -> io::Result<()> {
    for event in &listing.events {
        writeln!(w, "{}", event_line(event))?;
    }
    for entry in listing.state_events.iter().flatten() {
        writeln!(
            w,
            "state  {}  {}  {}",
            entry.event.event_id.as_deref().unwrap_or("-"),
            entry.event.event_type,
            entry.event.state_key.as_deref().unwrap_or(""),
        )?;
    }
    Ok(())
}

fn write_pretty(listing: &ChunkListing, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(
        w,
        &format!("Chunk {} in {} ({} events)", listing.chunk_id, listing.room_id, listing.events.len()),
    )?;
    for event in &listing.events {
        let when = event
            .event
            .origin_server_ts
            .map_or_else(|| "-".to_string(), millis_to_local);
        writeln!(w, "{}  {when}", event_line(event))?;
    }
    if let Some(state) = &listing.state_events {
        writeln!(w)?;
        pretty_section(w, "Out-of-band state")?;
        for entry in state {
            pretty_kv(
                w,
                &entry.event.event_type,
                format!(
                    "{} key={:?} display={}",
                    entry.event.event_id.as_deref().unwrap_or("-"),
                    entry.event.state_key.as_deref().unwrap_or(""),
                    or_dash(entry.display_index),
                ),
            )?;
        }
    }
    Ok(())
}

/// Execute `rl events <chunk>`.
///
/// # Errors
///
/// Returns an error if the chunk does not exist or the cache cannot be read.
pub fn run_events(args: &EventsArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let store = ctx.open_read_only(output)?;
    let listing = store
        .read(|conn| {
            let Some(chunk) = find_chunk(conn, args.chunk)? else {
                return Ok(None);
            };
            let events = chunk_events(conn, chunk.chunk_id)?;
            let state_events = if args.state {
                Some(chunk_state_events(conn, chunk.chunk_id)?)
            } else {
                None
            };
            Ok(Some(ChunkListing {
                chunk_id: chunk.chunk_id,
                room_id: chunk.room_id,
                events,
                state_events,
            }))
        })
        .map_err(|err| fail_with(output, err))?;

    let Some(listing) = listing else {
        render_error(
            output,
            &CliError::with_details(
                format!("chunk {} not found", args.chunk),
                "use `rl chunks <room>` to see available chunks",
                ErrorCode::ChunkNotFound.code(),
            ),
        )?;
        anyhow::bail!("chunk {} not found", args.chunk);
    };
    render_mode(output, &listing, write_text, write_pretty)
}
