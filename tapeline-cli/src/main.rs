//! Tapeline CLI: gap checks, bar store inspection, and replay runs.
//!
//! Commands:
//! - `gap`: report the minutes skipped between two market timestamps
//! - `bins latest|list|missing|show`: inspect the configured bar store
//! - `replay`: replay stored minutes through a simulated book
//!
//! Times are RFC 3339 (`2024-03-01T14:30:00Z`) or bin keys (`202403011430`).

mod logging;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tapeline_core::sim::SimBook;
use tapeline_core::{ExecutionManager, Order, OrderSide};
use tapeline_replay::{
    bin_key, parse_bin_key, DataLoader, ExecutionProcessor, GapDetector, ReplayEntry,
    ReplayManager, ReplayModeState, TapelineConfig,
};
use tracing::{info, warn};

use crate::logging::{init_logging, LogFormat};

#[derive(Parser)]
#[command(
    name = "tapeline",
    about = "Tapeline: minute-bar execution simulator with gap replay"
)]
struct Cli {
    /// TOML config file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the minutes skipped between two market timestamps.
    Gap {
        /// Last processed timestamp.
        last: String,

        /// Incoming timestamp.
        incoming: String,

        /// Print JSON instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Inspect the configured bar store.
    Bins {
        #[command(subcommand)]
        action: BinsAction,
    },
    /// Replay stored minutes through a simulated book.
    Replay {
        /// Last minute already processed; replay starts one minute later.
        #[arg(long)]
        from: String,

        /// Live minute the replay catches up to.
        #[arg(long)]
        to: String,

        /// Instrument to simulate.
        #[arg(long, default_value = "SPY")]
        symbol: String,

        /// Schedule an order of this size at `--from`.
        #[arg(long)]
        quantity: Option<Decimal>,

        #[arg(long, value_enum, default_value_t = Side::Buy)]
        side: Side,

        /// Participation rate for the scheduled order.
        #[arg(long, default_value = "0.1")]
        participation: Decimal,

        /// Starting cash in `--currency`.
        #[arg(long, default_value = "1000000")]
        cash: Decimal,

        #[arg(long, default_value = "USD")]
        currency: String,

        /// Stop the replay if it has not completed after this long.
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,

        /// Print the final report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BinsAction {
    /// Most recent stored minute.
    Latest,
    /// Stored minutes in a range.
    List {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Minutes in a range with no stored data.
    Missing {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Print one stored minute as JSON.
    Show { minute: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Side {
    Buy,
    Sell,
}

impl From<Side> for OrderSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => OrderSide::Buy,
            Side::Sell => OrderSide::Sell,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(
        LogFormat::from_env(),
        if cli.verbose { "debug" } else { "info" },
    )?;

    let config = match &cli.config {
        Some(path) => TapelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TapelineConfig::default(),
    };

    match cli.command {
        Commands::Gap {
            last,
            incoming,
            json,
        } => run_gap(&last, &incoming, json),
        Commands::Bins { action } => run_bins(&config, action),
        Commands::Replay {
            from,
            to,
            symbol,
            quantity,
            side,
            participation,
            cash,
            currency,
            timeout_secs,
            json,
        } => run_replay(
            &config,
            ReplayArgs {
                from: parse_time(&from)?,
                to: parse_time(&to)?,
                symbol,
                quantity,
                side: side.into(),
                participation,
                cash,
                currency,
                timeout: Duration::from_secs(timeout_secs),
                json,
            },
        ),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    parse_bin_key(raw).with_context(|| format!("'{raw}' is neither RFC 3339 nor a bin key"))
}

fn run_gap(last: &str, incoming: &str, json: bool) -> Result<()> {
    let last = parse_time(last)?;
    let incoming = parse_time(incoming)?;
    let detector = GapDetector::new();
    let gap = detector.detect_gap(last, incoming);
    let missing = detector.missing_minutes(last, incoming);

    if json {
        let value = serde_json::json!({
            "last": last,
            "incoming": incoming,
            "gap": gap.map(|(start, end)| serde_json::json!({ "start": start, "end": end })),
            "missing_minutes": missing,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match gap {
        Some((start, end)) => {
            println!("Gap:     {} .. {}", bin_key(start), bin_key(end));
            println!("Missing: {missing} minute(s)");
        }
        None => println!("No gap"),
    }
    Ok(())
}

fn run_bins(config: &TapelineConfig, action: BinsAction) -> Result<()> {
    let loader = DataLoader::from_config(&config.data)?;

    match action {
        BinsAction::Latest => match loader.latest_bin()? {
            Some(t) => println!("{} ({t})", bin_key(t)),
            None => println!("Store is empty ({})", loader.store_name()),
        },
        BinsAction::List { start, end } => {
            let bins = loader.list_bins(parse_time(&start)?, parse_time(&end)?)?;
            for t in &bins {
                println!("{}", bin_key(*t));
            }
            println!("{} stored minute(s)", bins.len());
        }
        BinsAction::Missing { start, end } => {
            let missing = loader.find_missing_bins(parse_time(&start)?, parse_time(&end)?)?;
            for t in &missing {
                println!("{}", bin_key(*t));
            }
            println!("{} missing minute(s)", missing.len());
        }
        BinsAction::Show { minute } => {
            let bin = loader.load_bin(parse_time(&minute)?)?;
            if bin.is_empty() {
                bail!("no data stored for {}", bin_key(bin.timestamp));
            }
            println!("{}", serde_json::to_string_pretty(&bin)?);
        }
    }
    Ok(())
}

struct ReplayArgs {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    symbol: String,
    quantity: Option<Decimal>,
    side: OrderSide,
    participation: Decimal,
    cash: Decimal,
    currency: String,
    timeout: Duration,
    json: bool,
}

fn run_replay(config: &TapelineConfig, args: ReplayArgs) -> Result<()> {
    let manager = ReplayManager::from_config(config)?;

    let book = SimBook::new(0).with_cash(&args.currency, args.cash);
    let exec = Arc::new(ExecutionManager::new(
        args.symbol.as_str(),
        config.execution.clone(),
        book.collaborators(),
    ));
    let processor = Arc::new(ExecutionProcessor::new());
    processor.add_book_with_volume_feed(Arc::clone(&exec), Arc::clone(&book.volume));
    manager.add_processor(processor);

    if let Some(quantity) = args.quantity {
        let order = Order::new(
            1u64,
            args.symbol.as_str(),
            args.side,
            quantity,
            args.participation,
            args.from,
        )?
        .with_currency(args.currency.as_str())
        .into_handle();
        exec.schedule_execution(&order, args.from)?;
    }

    let (done_tx, done_rx) = mpsc::channel();
    manager.on_replay_complete(move |progress| {
        let _ = done_tx.send(progress.clone());
    });
    manager.on_replay_progress(|progress| {
        info!(
            minute = %bin_key(progress.current_time),
            completed = progress.completed_minutes,
            total = progress.total_minutes,
            pct = format!("{:.1}", progress.progress_percentage()),
            "replay progress"
        );
    });

    manager.record_snap_time(args.from);
    match manager.enter_replay_mode(args.from, args.to)? {
        ReplayEntry::AlreadyCurrent => {
            println!("Nothing to replay: {} is not after {}", args.to, args.from);
            return Ok(());
        }
        ReplayEntry::Started { total_minutes } => {
            info!(total_minutes, store = manager.loader().store_name(), "replaying");
        }
    }

    if done_rx.recv_timeout(args.timeout).is_err() {
        warn!(timeout_secs = args.timeout.as_secs(), "replay still running; stopping it");
        manager.stop_replay()?;
    }

    let status = manager.get_replay_status();
    if status.state == ReplayModeState::Error {
        bail!(
            "replay failed: {}",
            status.error_message.unwrap_or_else(|| "unknown error".into())
        );
    }

    exec.log_execution_summary();
    let stats = exec.get_execution_statistics();
    let trades = book.trades.trades();

    if args.json {
        let report = serde_json::json!({
            "replay": status,
            "last_snap": manager.last_snap_time(),
            "execution": stats,
            "trades": trades,
            "positions": book.portfolio.positions(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("=== Replay ===");
    println!("Store:          {}", manager.loader().store_name());
    println!(
        "Minutes:        {} of {} ({:.1}%)",
        status.completed_minutes,
        status.total_minutes,
        status.progress_percentage()
    );
    if let Some(last) = manager.last_snap_time() {
        println!("Last snapped:   {}", bin_key(last));
    }
    println!();
    println!("--- Execution ({}) ---", stats.symbol);
    println!("Executions:     {}", stats.total_executions);
    println!("Cancellations:  {}", stats.total_cancellations);
    println!("Volume:         {}", stats.total_trade_volume);
    println!("Buckets:        {}", stats.buckets_processed);
    println!("Decay ticks:    {}", stats.decay_ticks);
    println!("Pending:        {}", stats.pending);
    if !trades.is_empty() {
        println!();
        println!(
            "{:<22} {:<8} {:>10} {:>12} {:>10} {}",
            "Trade", "Detail", "Qty", "Price", "Comm", "Bucket end"
        );
        println!("{}", "-".repeat(82));
        for t in &trades {
            println!(
                "{:<22} {:<8} {:>10} {:>12} {:>10} {}",
                t.trade_id.to_string(),
                format!("{:?}", t.detail),
                t.quantity,
                t.price,
                t.commission,
                bin_key(t.end_time)
            );
        }
    }
    println!();
    Ok(())
}
