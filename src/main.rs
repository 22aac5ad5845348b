use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use ulid::Ulid;

use frontdesk::backend::{ReservationSource, RestBackend};
use frontdesk::config::Config;
use frontdesk::engine::{check, quote, BlockedDateSet, Clock, SystemClock};
use frontdesk::model::*;
use frontdesk::payment::format_amount;
use frontdesk::reconcile::ReconciliationQueue;
use frontdesk::sweeper;

/// Front-desk booking tools: availability checks against the live backend and
/// the reconciliation queue for payments left without a reservation.
#[derive(Parser, Debug)]
#[command(name = "frontdesk", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a room can take a stay, against a fresh snapshot.
    Check {
        room: RoomId,
        #[arg(value_parser = parse_date)]
        check_in: CalendarDate,
        #[arg(value_parser = parse_date)]
        check_out: CalendarDate,
        #[arg(default_value_t = 1)]
        guests: u32,
    },
    /// Show a room's blocked nights and free runs for the next `days` days.
    Blocked {
        room: RoomId,
        #[arg(default_value_t = 90)]
        days: u32,
    },
    /// List captured payments awaiting reconciliation.
    Reconcile,
    /// Close a reconciliation ticket (refunded, rebooked or written-off).
    Resolve {
        ticket: Ulid,
        resolution: Resolution,
        note: Option<String>,
    },
    /// Run the reconciliation sweeper and metrics endpoint until SIGINT/SIGTERM.
    Watch,
}

fn parse_date(raw: &str) -> Result<CalendarDate, String> {
    parse_calendar_date(raw).ok_or_else(|| format!("expected YYYY-MM-DD, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Check {
            room,
            check_in,
            check_out,
            guests,
        } => {
            let backend = RestBackend::from_config(&config)?;
            let (info, committed) = futures::try_join!(backend.room(room), backend.reservations(room))?;
            let stay = StayRequest {
                check_in,
                check_out,
                guests,
            };
            let result = check(&stay, &info, &committed, SystemClock.today());
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.available {
                let q = quote(&info, stay.range()?, &config.currency)?;
                println!(
                    "room {}: {} night(s) x {} = {} {}",
                    info.number,
                    q.nights,
                    format_amount(q.price_per_night),
                    format_amount(q.total),
                    q.currency
                );
            }
        }
        Command::Blocked { room, days } => {
            let backend = RestBackend::from_config(&config)?;
            let index = BlockedDateSet::from_dates(backend.blocked_dates(room).await?);
            let today = SystemClock.today();
            let until = today
                .checked_add_days(chrono::Days::new(u64::from(days.max(1))))
                .ok_or("window end out of range")?;
            let window = DateRange::new(today, until)?;
            let upcoming = index.upcoming(today);
            println!("room {room}: {} blocked night(s) from {today}", upcoming.len());
            for run in index.blocked_runs().iter().filter(|r| r.overlaps(&window)) {
                println!("  booked {run}");
            }
            for free in index.free_ranges(&window)? {
                println!("  free   {free} ({} night(s))", free.nights());
            }
        }
        Command::Reconcile => {
            let queue = ReconciliationQueue::open(&config.journal_path)?;
            let pending = queue.pending();
            if pending.is_empty() {
                println!("no payments awaiting reconciliation");
            }
            for o in pending {
                println!(
                    "{}  room {}  guest {}  {}  {} {}  ref {}  {}",
                    o.ticket,
                    o.room_id,
                    o.guest_id,
                    o.range,
                    format_amount(o.amount),
                    o.currency,
                    o.payment_reference,
                    o.detail
                );
            }
        }
        Command::Resolve {
            ticket,
            resolution,
            note,
        } => {
            let queue = ReconciliationQueue::open(&config.journal_path)?;
            let closed = queue.resolve(ticket, resolution, note).await?;
            println!(
                "ticket {ticket} resolved as {resolution:?} ({} {} ref {})",
                format_amount(closed.amount),
                closed.currency,
                closed.payment_reference
            );
        }
        Command::Watch => watch(config).await?,
    }
    Ok(())
}

async fn watch(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    frontdesk::observability::init(config.metrics_port)?;
    let queue = Arc::new(ReconciliationQueue::open(&config.journal_path)?);

    info!("frontdesk sweeper running");
    info!("  journal: {}", config.journal_path.display());
    info!("  pending: {}", queue.pending_count());
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweeper = tokio::spawn(sweeper::run_sweeper(
        queue.clone(),
        config.sweep_interval,
        config.compact_threshold,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    sweeper.abort();
    // Leave a compact journal behind for the next start.
    if let Err(e) = queue.compact().await {
        tracing::warn!(error = %e, "final journal compaction failed");
    }
    info!("frontdesk stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
