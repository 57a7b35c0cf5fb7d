//! `rl show`: everything cached about one event.

use crate::cmd::CacheContext;
use crate::output::{
    CliError, OutputMode, fail_with, millis_to_local, pretty_kv, pretty_section, render_error,
    render_mode,
};
use clap::Args;
use roomline_core::ErrorCode;
use roomline_core::db::query::{TimelineEvent, timeline_event};
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Room id.
    pub room: String,

    /// Event id, e.g. `$abc`.
    pub event: String,
}

fn write_text(event: &TimelineEvent, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}  chunk={}  display={}  state={}  {}  {}  {}",
        event.event.event_id.as_deref().unwrap_or("-"),
        event.chunk_id,
        event.display_index,
        event.state_index,
        event.event.event_type,
        event.event.sender_id,
        event.send_state,
    )?;
    for receipt in &event.receipts {
        writeln!(w, "receipt  {}  {}", receipt.user_id, receipt.origin_server_ts)?;
    }
    if let Some(summary) = &event.annotations {
        for reaction in &summary.reactions {
            writeln!(w, "reaction  {}  {}", reaction.key, reaction.count)?;
        }
    }
    Ok(())
}

fn write_pretty(event: &TimelineEvent, w: &mut dyn Write) -> io::Result<()> {
    let id = event.event.event_id.as_deref().unwrap_or("-");
    pretty_section(w, &format!("{id} in {}", event.room_id))?;
    pretty_kv(w, "type", &event.event.event_type)?;
    if let Some(state_key) = &event.event.state_key {
        pretty_kv(w, "state key", format!("{state_key:?}"))?;
    }
    let sender = match &event.sender.display_name {
        Some(name) if event.sender.is_unique_display_name => format!("{name} ({})", event.event.sender_id),
        Some(name) => format!("{name} [ambiguous] ({})", event.event.sender_id),
        None => event.event.sender_id.clone(),
    };
    pretty_kv(w, "sender", sender)?;
    if let Some(avatar) = &event.sender.avatar_url {
        pretty_kv(w, "avatar", avatar)?;
    }
    pretty_kv(
        w,
        "sent",
        event
            .event
            .origin_server_ts
            .map_or_else(|| "-".to_string(), millis_to_local),
    )?;
    pretty_kv(w, "chunk", event.chunk_id.to_string())?;
    pretty_kv(w, "display index", event.display_index.to_string())?;
    pretty_kv(w, "state index", event.state_index.to_string())?;
    pretty_kv(w, "send state", event.send_state.as_str())?;

    if !event.receipts.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Read by")?;
        for receipt in &event.receipts {
            pretty_kv(w, &receipt.user_id, millis_to_local(receipt.origin_server_ts))?;
        }
    }

    if let Some(summary) = &event.annotations {
        writeln!(w)?;
        pretty_section(w, "Reactions")?;
        for reaction in &summary.reactions {
            pretty_kv(w, &reaction.key, reaction.count.to_string())?;
        }
    }

    if let Some(content) = &event.event.content {
        writeln!(w)?;
        pretty_section(w, "Content")?;
        let body = serde_json::to_string_pretty(content).map_err(io::Error::other)?;
        writeln!(w, "{body}")?;
    }
    Ok(())
}

/// Execute `rl show <room> <event>`.
///
/// # Errors
///
/// Returns an error if the event is not cached or the cache cannot be read.
pub fn run_show(args: &ShowArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let store = ctx.open_read_only(output)?;
    let event = store
        .read(|conn| timeline_event(conn, &args.room, &args.event))
        .map_err(|err| fail_with(output, err))?;

    let Some(event) = event else {
        render_error(
            output,
            &CliError::with_details(
                format!("event '{}' not found in {}", args.event, args.room),
                "the event may be out-of-band state or in a deleted chunk",
                ErrorCode::EventNotFound.code(),
            ),
        )?;
        anyhow::bail!("event '{}' not found", args.event);
    };
    render_mode(output, &event, write_text, write_pretty)
}
