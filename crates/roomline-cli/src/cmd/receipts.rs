//! `rl receipts`: read markers of a room.

use crate::cmd::CacheContext;
use crate::output::{OutputMode, fail_with, millis_to_local, or_dash, pretty_kv, pretty_section, render_mode};
use clap::Args;
use roomline_core::timeline::receipts::{ReadReceipt, read_marker, receipts_for_event, room_receipts};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
pub struct ReceiptsArgs {
    /// Room id.
    pub room: String,

    /// Only this user's read marker.
    #[arg(long)]
    pub user: Option<String>,

    /// Only receipts attached to this event.
    #[arg(long, conflicts_with = "user")]
    pub event: Option<String>,

    /// Record an explicit receipt for `--user` on this event.
    #[arg(long, requires_all = ["user", "ts"])]
    pub mark: Option<String>,

    /// Server timestamp (ms) of the explicit receipt.
    #[arg(long, requires = "mark")]
    pub ts: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReceiptListing {
    pub room_id: String,
    /// Set when `--mark` was given: whether the receipt moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved: Option<bool>,
    pub receipts: Vec<ReadReceipt>,
}

fn write_text(listing: &ReceiptListing, w: &mut dyn Write) -> io::Result<()> {
    if let Some(moved) = listing.moved {
        writeln!(w, "moved={moved}")?;
    }
    for receipt in &listing.receipts {
        writeln!(
            w,
            "{}  {}  {}",
            receipt.user_id,
            or_dash(receipt.event_id.as_deref()),
            receipt.origin_server_ts
        )?;
    }
    Ok(())
}

fn write_pretty(listing: &ReceiptListing, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Read receipts in {}", listing.room_id))?;
    match listing.moved {
        Some(true) => writeln!(w, "✓ receipt moved")?,
        Some(false) => writeln!(w, "receipt unchanged (not newer than the recorded one)")?,
        None => {}
    }
    if listing.receipts.is_empty() {
        return writeln!(w, "No receipts.");
    }
    for receipt in &listing.receipts {
        pretty_kv(
            w,
            &receipt.user_id,
            format!(
                "{} at {}",
                or_dash(receipt.event_id.as_deref()),
                millis_to_local(receipt.origin_server_ts)
            ),
        )?;
    }
    Ok(())
}

/// Execute `rl receipts <room>`.
///
/// # Errors
///
/// Returns an error if the cache cannot be opened, read or written.
pub fn run_receipts(args: &ReceiptsArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let (store, moved) = match (&args.mark, &args.user, args.ts) {
        (Some(event_id), Some(user_id), Some(ts)) => {
            let store = ctx.open_writable(output)?;
            let moved = store
                .record_receipt(&args.room, user_id, event_id, ts)
                .map_err(|err| fail_with(output, err))?;
            (store, Some(moved))
        }
        _ => (ctx.open_read_only(output)?, None),
    };

    let receipts = store
        .read(|conn| {
            if let Some(user_id) = &args.user {
                return Ok(read_marker(conn, &args.room, user_id)?.into_iter().collect());
            }
            if let Some(event_id) = &args.event {
                return receipts_for_event(conn, &args.room, event_id);
            }
            room_receipts(conn, &args.room)
        })
        .map_err(|err| fail_with(output, err))?;

    let listing = ReceiptListing {
        room_id: args.room.clone(),
        moved,
        receipts,
    };
    render_mode(output, &listing, write_text, write_pretty)
}
