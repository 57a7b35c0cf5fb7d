//! `rl chunks`: list a room's chunks and their counters.

use crate::cmd::CacheContext;
use crate::output::{OutputMode, fail_with, or_dash, pretty_kv, pretty_section, render_mode};
use clap::Args;
use roomline_core::timeline::Chunk;
use roomline_core::timeline::chunk::list_chunks;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ChunksArgs {
    /// Room id, e.g. `!abc:example.org`.
    pub room: String,
}

/// Display index range covered by `chunk`, lowest first.
fn display_range(chunk: &Chunk) -> Option<(i64, i64)> {
    let low = chunk.cursor.backwards.display_index;
    let high = chunk.cursor.forwards.display_index;
    match (low, high) {
        (None, None) => None,
        (Some(low), Some(high)) => Some((low, high)),
        (Some(low), None) => Some((low, -1)),
        (None, Some(high)) => Some((1, high)),
    }
}

fn flags(chunk: &Chunk) -> String {
    let mut flags = Vec::new();
    if chunk.is_last_forward {
        flags.push("live");
    }
    if chunk.is_last_backward {
        flags.push("oldest");
    }
    flags.join(",")
}

fn write_text(chunks: &Vec<Chunk>, w: &mut dyn Write) -> io::Result<()> {
    for chunk in chunks {
        let range = display_range(chunk)
            .map_or_else(|| "empty".to_string(), |(low, high)| format!("{low}..{high}"));
        writeln!(
            w,
            "{}  {}  prev={} next={}  {}",
            chunk.chunk_id,
            range,
            or_dash(chunk.prev_token.as_deref()),
            or_dash(chunk.next_token.as_deref()),
            flags(chunk),
        )?;
    }
    Ok(())
}

fn write_pretty(chunks: &Vec<Chunk>, w: &mut dyn Write) -> io::Result<()> {
    if chunks.is_empty() {
        return writeln!(w, "No chunks cached for this room.");
    }
    for chunk in chunks {
        pretty_section(w, &format!("Chunk {}", chunk.chunk_id))?;
        let flags = flags(chunk);
        if !flags.is_empty() {
            pretty_kv(w, "flags", flags)?;
        }
        pretty_kv(w, "prev token", or_dash(chunk.prev_token.as_deref()))?;
        pretty_kv(w, "next token", or_dash(chunk.next_token.as_deref()))?;
        for (label, slot) in [
            ("forwards", &chunk.cursor.forwards),
            ("backwards", &chunk.cursor.backwards),
        ] {
            pretty_kv(
                w,
                label,
                format!(
                    "display {} / state {}",
                    or_dash(slot.display_index),
                    or_dash(slot.state_index)
                ),
            )?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Execute `rl chunks <room>`.
///
/// # Errors
///
/// Returns an error if the cache cannot be opened or queried.
pub fn run_chunks(args: &ChunksArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let store = ctx.open_read_only(output)?;
    let chunks = store
        .read(|conn| list_chunks(conn, &args.room))
        .map_err(|err| fail_with(output, err))?;
    render_mode(output, &chunks, write_text, write_pretty)
}
