//! `rl state-at`: room state in effect just before an event.

use crate::cmd::CacheContext;
use crate::output::{OutputMode, fail_with, or_dash, pretty_kv, pretty_section, render_mode};
use clap::Args;
use roomline_core::db::query::{StateEntry, state_at_event};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct StateAtArgs {
    /// Room id.
    pub room: String,

    /// Event whose preceding state is resolved.
    pub event: String,

    /// State event type, e.g. `m.room.member`.
    pub event_type: String,

    /// State key; empty for room-wide state.
    #[arg(default_value = "")]
    pub state_key: String,
}

#[derive(Debug, Serialize)]
pub struct StateAtResult {
    pub event_id: String,
    pub event_type: String,
    pub state_key: String,
    pub state: Option<StateEntry>,
}

fn write_text(result: &StateAtResult, w: &mut dyn Write) -> io::Result<()> {
    match &result.state {
        Some(entry) => writeln!(
            w,
            "{}  chunk={}  display={}  state={}  unlinked={}",
            entry.event.event_id.as_deref().unwrap_or("-"),
            entry.chunk_id,
            or_dash(entry.display_index),
            entry.state_index,
            entry.is_unlinked,
        ),
        None => writeln!(w, "-"),
    }
}

fn write_pretty(result: &StateAtResult, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(
        w,
        &format!(
            "{} {:?} before {}",
            result.event_type, result.state_key, result.event_id
        ),
    )?;
    let Some(entry) = &result.state else {
        return writeln!(w, "No cached state for this key.");
    };
    pretty_kv(w, "event", entry.event.event_id.as_deref().unwrap_or("-"))?;
    pretty_kv(w, "sender", &entry.event.sender_id)?;
    pretty_kv(
        w,
        "source",
        if entry.is_unlinked {
            "out-of-band state"
        } else {
            "timeline"
        },
    )?;
    pretty_kv(w, "display index", or_dash(entry.display_index))?;
    if let Some(content) = &entry.event.content {
        pretty_kv(w, "content", content.to_string())?;
    }
    Ok(())
}

/// Execute `rl state-at <room> <event> <type> [state_key]`.
///
/// # Errors
///
/// Returns an error if the cache cannot be opened or queried.
pub fn run_state_at(args: &StateAtArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let store = ctx.open_read_only(output)?;
    let state = store
        .read(|conn| {
            state_at_event(
                conn,
                &args.room,
                &args.event,
                &args.event_type,
                &args.state_key,
            )
        })
        .map_err(|err| fail_with(output, err))?;

    let result = StateAtResult {
        event_id: args.event.clone(),
        event_type: args.event_type.clone(),
        state_key: args.state_key.clone(),
        state,
    };
    render_mode(output, &result, write_text, write_pretty)
}
