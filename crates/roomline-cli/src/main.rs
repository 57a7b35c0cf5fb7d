#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::CacheContext;
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "rl: inspect and feed a chat room timeline cache",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Cache directory (defaults to $ROOMLINE_CACHE_DIR, then the platform
    /// cache dir).
    #[arg(long, global = true, value_name = "DIR")]
    cache: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output (alias for `--format json`).
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Write",
        about = "Ingest a pagination batch or raw events",
        long_about = "Insert events into the cache. Without --room the input holds JSON pagination batches; with --room it holds raw events (JSON array or NDJSON) for one batch.",
        after_help = "EXAMPLES:\n    # Apply batches exported by a sync client\n    rl ingest batches.json\n\n    # Prepend history to chunk 3\n    rl ingest page.ndjson --room '!abc:example.org' --chunk 3 --direction backwards\n\n    # Open the live chunk from stdin\n    cat sync.ndjson | rl ingest --room '!abc:example.org' --live"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        next_help_heading = "Read",
        about = "List a room's chunks",
        long_about = "List every chunk of a room with its tokens, edge flags and counters.",
        after_help = "EXAMPLES:\n    # List chunks\n    rl chunks '!abc:example.org'\n\n    # Emit machine-readable output\n    rl chunks '!abc:example.org' --json"
    )]
    Chunks(cmd::chunks::ChunksArgs),

    #[command(
        next_help_heading = "Read",
        about = "List a chunk's events",
        long_about = "List the linked events of a chunk in display order.",
        after_help = "EXAMPLES:\n    # Events of chunk 3\n    rl events 3\n\n    # Include out-of-band state\n    rl events 3 --state"
    )]
    Events(cmd::events::EventsArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show one event",
        long_about = "Show an event with its indices, sender snapshot, receipts and reactions.",
        after_help = "EXAMPLES:\n    # Show an event\n    rl show '!abc:example.org' '$event1'"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Read",
        about = "List read receipts",
        long_about = "List the read markers of a room, one user's marker, or the receipts attached to an event. With --mark, record an explicit receipt first.",
        after_help = "EXAMPLES:\n    # All markers in a room\n    rl receipts '!abc:example.org'\n\n    # One user's marker\n    rl receipts '!abc:example.org' --user '@alice:example.org'\n\n    # Apply an explicit receipt from sync\n    rl receipts '!abc:example.org' --user '@alice:example.org' --mark '$event9' --ts 1700000000000"
    )]
    Receipts(cmd::receipts::ReceiptsArgs),

    #[command(
        next_help_heading = "Read",
        about = "Summarize a room",
        long_about = "Show chunk, event, state and receipt counts and the latest live event.",
        after_help = "EXAMPLES:\n    # Room overview\n    rl summary '!abc:example.org'"
    )]
    Summary(cmd::summary::SummaryArgs),

    #[command(
        next_help_heading = "Read",
        about = "Resolve state before an event",
        long_about = "Resolve the state event of a type and state key in effect just before an event.",
        after_help = "EXAMPLES:\n    # Room name when $event1 was sent\n    rl state-at '!abc:example.org' '$event1' m.room.name\n\n    # Alice's membership\n    rl state-at '!abc:example.org' '$event1' m.room.member '@alice:example.org'"
    )]
    StateAt(cmd::state_at::StateAtArgs),

    #[command(
        next_help_heading = "Write",
        about = "Cascade-delete a chunk",
        long_about = "Delete a chunk with its events, out-of-band state and the receipt summaries only it referenced. All or nothing.",
        after_help = "EXAMPLES:\n    # Drop chunk 3\n    rl delete-chunk '!abc:example.org' 3"
    )]
    DeleteChunk(cmd::delete_chunk::DeleteChunkArgs),

    #[command(
        next_help_heading = "Write",
        about = "Merge two chunks",
        long_about = "Move the events of the source chunk into the target chunk and delete the source.",
        after_help = "EXAMPLES:\n    # Prepend chunk 4's history to the live chunk 1\n    rl merge '!abc:example.org' 1 4 --direction backwards"
    )]
    Merge(cmd::merge::MergeArgs),

    #[command(
        next_help_heading = "Write",
        about = "Evict old chunks",
        long_about = "Delete the oldest non-live chunks of a room beyond a limit.",
        after_help = "EXAMPLES:\n    # Keep at most 5 chunks\n    rl prune '!abc:example.org' --max 5"
    )]
    Prune(cmd::prune::PruneArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ROOMLINE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "roomline=debug,info"
        } else {
            "roomline=info,warn"
        })
    });

    let format = env::var("ROOMLINE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let ctx = CacheContext::resolve(cli.cache.as_deref())?;
    let output = output::resolve_output_mode(cli.format, cli.json, ctx.config.output.as_deref());
    debug!(cache_dir = %ctx.cache_dir.display(), ?output, "resolved cache");

    match cli.command {
        Commands::Ingest(ref args) => cmd::ingest::run_ingest(args, output, &ctx),
        Commands::Chunks(ref args) => cmd::chunks::run_chunks(args, output, &ctx),
        Commands::Events(ref args) => cmd::events::run_events(args, output, &ctx),
        Commands::Show(ref args) => cmd::show::run_show(args, output, &ctx),
        Commands::Receipts(ref args) => cmd::receipts::run_receipts(args, output, &ctx),
        Commands::Summary(ref args) => cmd::summary::run_summary(args, output, &ctx),
        Commands::StateAt(ref args) => cmd::state_at::run_state_at(args, output, &ctx),
        Commands::DeleteChunk(ref args) => {
            cmd::delete_chunk::run_delete_chunk(args, output, &ctx)
        }
        Commands::Merge(ref args) => cmd::merge::run_merge(args, output, &ctx),
        Commands::Prune(ref args) => cmd::prune::run_prune(args, output, &ctx),
    }
}
