//! `rl ingest`: feed sync or pagination responses into the cache.
//!
//! Two input shapes are accepted:
//!
//! - without `--room`: one or more JSON `PaginationBatch` objects
//!   (concatenated or newline-delimited);
//! - with `--room`: raw room events, either a JSON array or NDJSON, that
//!   form a single batch described by the flags.

use crate::cmd::CacheContext;
use crate::output::{
    CliError, OutputMode, fail_with, or_dash, pretty_kv, pretty_section, render_error, render_mode,
};
use anyhow::Context as _;
use clap::Args;
use roomline_core::event::{Event, PaginationDirection};
use roomline_core::timeline::{ChunkId, ChunkTarget, IngestReport, NewChunk, PaginationBatch};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Input file, or `-` for stdin.
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// Treat the input as raw events of this room.
    #[arg(long)]
    pub room: Option<String>,

    /// Append to an existing chunk instead of opening a new one.
    #[arg(long, requires = "room", conflicts_with = "new_chunk")]
    pub chunk: Option<ChunkId>,

    /// Open a new chunk for the events (the default with `--room`).
    #[arg(long, requires = "room")]
    pub new_chunk: bool,

    /// Direction the events were paginated in. Batches carry their own.
    #[arg(long, default_value = "forwards")]
    pub direction: PaginationDirection,

    /// State index the chunk's counters start from.
    #[arg(long, allow_hyphen_values = true, requires = "room")]
    pub state_index_offset: Option<i64>,

    /// Mark the new chunk as the live edge of the room.
    #[arg(long, requires = "room", conflicts_with = "chunk")]
    pub live: bool,

    /// Mark the new chunk as holding the start of the room's history.
    #[arg(long, requires = "room", conflicts_with = "chunk")]
    pub oldest: bool,

    #[arg(long, requires = "room", conflicts_with = "chunk")]
    pub prev_token: Option<String>,

    #[arg(long, requires = "room", conflicts_with = "chunk")]
    pub next_token: Option<String>,

    /// File with out-of-band state events for the chunk.
    #[arg(long, requires = "room")]
    pub state_events: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub room_id: String,
    pub direction: PaginationDirection,
    #[serde(flatten)]
    pub report: IngestReport,
    /// Input records that were not valid events.
    pub skipped: usize,
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("read events from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Every top-level JSON value in `text`, with arrays flattened one level.
fn json_values(text: &str) -> anyhow::Result<Vec<Value>> {
    let mut values = Vec::new();
    for (n, value) in serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .enumerate()
    {
        match value.with_context(|| format!("input value {} is not valid JSON", n + 1))? {
            Value::Array(items) => values.extend(items),
            other => values.push(other),
        }
    }
    Ok(values)
}

/// Decode raw events, skipping records that are not room events.
fn parse_events(text: &str) -> anyhow::Result<(Vec<Event>, usize)> {
    let mut events = Vec::new();
    let mut skipped = 0;
    for (index, value) in json_values(text)?.into_iter().enumerate() {
        match serde_json::from_value::<Event>(value) {
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(index, error = %err, "skipping malformed event");
                skipped += 1;
            }
        }
    }
    Ok((events, skipped))
}

fn parse_batches(text: &str) -> anyhow::Result<Vec<PaginationBatch>> {
    json_values(text)?
        .into_iter()
        .enumerate()
        .map(|(n, value)| {
            serde_json::from_value(value)
                .with_context(|| format!("batch {} is not a pagination batch", n + 1))
        })
        .collect()
}

fn batch_from_flags(
    args: &IngestArgs,
    room_id: &str,
    events: Vec<Event>,
    state_events: Vec<Event>,
) -> PaginationBatch {
    let target = args.chunk.map_or_else(
        || {
            ChunkTarget::New(NewChunk {
                prev_token: args.prev_token.clone(),
                next_token: args.next_token.clone(),
                is_last_forward: args.live,
                is_last_backward: args.oldest,
            })
        },
        ChunkTarget::Existing,
    );
    PaginationBatch {
        room_id: room_id.to_string(),
        target,
        direction: args.direction,
        events,
        state_events,
        state_index_offset: args.state_index_offset,
    }
}

/// Build the batches described by `args` and the input text.
fn plan(args: &IngestArgs, text: &str) -> anyhow::Result<(Vec<PaginationBatch>, usize)> {
    let Some(room_id) = args.room.as_deref() else {
        return Ok((parse_batches(text)?, 0));
    };

    let (events, mut skipped) = parse_events(text)?;
    let state_events = match &args.state_events {
        Some(path) => {
            let (state, bad) = parse_events(&read_input(path)?)?;
            skipped += bad;
            state
        }
        None => Vec::new(),
    };
    Ok((vec![batch_from_flags(args, room_id, events, state_events)], skipped))
}

fn write_text(summaries: &Vec<IngestSummary>, w: &mut dyn Write) -> io::Result<()> {
    for s in summaries {
        writeln!(
            w,
            "{}  chunk={}  {}  inserted={} duplicates={} missing_ids={} state={} pruned={} skipped={}",
            s.room_id,
            or_dash(s.report.chunk_id),
            s.direction,
            s.report.inserted,
            s.report.duplicates,
            s.report.missing_ids,
            s.report.state_inserted,
            s.report.pruned.len(),
            s.skipped,
        )?;
    }
    Ok(())
}

fn write_pretty(summaries: &Vec<IngestSummary>, w: &mut dyn Write) -> io::Result<()> {
    for s in summaries {
        pretty_section(w, &format!("Ingested into {}", s.room_id))?;
        if let Some(chunk_id) = s.report.chunk_id {
            pretty_kv(w, "chunk", chunk_id.to_string())?;
        }
        pretty_kv(w, "direction", s.direction.as_str())?;
        pretty_kv(w, "inserted", s.report.inserted.to_string())?;
        pretty_kv(w, "duplicates", s.report.duplicates.to_string())?;
        pretty_kv(w, "missing ids", s.report.missing_ids.to_string())?;
        pretty_kv(w, "state events", s.report.state_inserted.to_string())?;
        if !s.report.pruned.is_empty() {
            let pruned: Vec<String> = s.report.pruned.iter().map(ToString::to_string).collect();
            pretty_kv(w, "pruned", pruned.join(", "))?;
        }
        if s.skipped > 0 {
            pretty_kv(w, "skipped", s.skipped.to_string())?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Execute `rl ingest`.
///
/// Batches are applied in input order. The first failing batch stops the
/// command; events committed before the failure stay in the cache.
///
/// # Errors
///
/// Returns an error if the input cannot be read or parsed, the cache cannot
/// be opened, or a batch fails.
pub fn run_ingest(args: &IngestArgs, output: OutputMode, ctx: &CacheContext) -> anyhow::Result<()> {
    let text = read_input(&args.input)?;
    let (batches, skipped) = match plan(args, &text) {
        Ok(planned) => planned,
        Err(err) => {
            render_error(
                output,
                &CliError::with_details(
                    format!("{err:#}"),
                    "pass a JSON pagination batch, or raw events with --room",
                    "invalid_input",
                ),
            )?;
            return Err(err);
        }
    };

    if batches.is_empty() {
        render_error(output, &CliError::new("input holds no pagination batches"))?;
        anyhow::bail!("input holds no pagination batches");
    }

    let store = ctx.open_writable(output)?;
    let mut summaries = Vec::with_capacity(batches.len());
    for batch in &batches {
        let report = store.ingest(batch).map_err(|err| fail_with(output, err))?;
        summaries.push(IngestSummary {
            room_id: batch.room_id.clone(),
            direction: batch.direction,
            report,
            skipped: 0,
        });
    }
    if let Some(first) = summaries.first_mut() {
        first.skipped = skipped;
    }

    render_mode(output, &summaries, write_text, write_pretty)
}
