use std::time::{Duration, Instant};

use chrono::Days;

use frontdesk::engine::{check, BlockedDateSet};
use frontdesk::model::*;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}us, p50={:.2}us, p95={:.2}us, p99={:.2}us, max={:.2}us",
        latencies.len(),
        avg.as_secs_f64() * 1e6,
        percentile(latencies, 50.0).as_secs_f64() * 1e6,
        percentile(latencies, 95.0).as_secs_f64() * 1e6,
        percentile(latencies, 99.0).as_secs_f64() * 1e6,
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1e6),
    );
}

fn date(base: CalendarDate, offset: u64) -> CalendarDate {
    base.checked_add_days(Days::new(offset)).expect("date in range")
}

/// A year of back-to-back stays of 1..=6 nights, every fifth one cancelled.
fn year_of_bookings(room_id: RoomId, base: CalendarDate) -> Vec<CommittedReservation> {
    let mut out = Vec::new();
    let mut offset = 0u64;
    let mut id = 1;
    while offset < 365 {
        let nights = 1 + (id as u64 * 7) % 6;
        let gap = (id as u64 * 3) % 2;
        let range = DateRange::new(date(base, offset), date(base, offset + nights)).expect("valid stay");
        let status = if id % 5 == 0 {
            ReservationStatus::Cancelled
        } else {
            ReservationStatus::Confirmed
        };
        out.push(CommittedReservation {
            id,
            room_id,
            range,
            status,
        });
        offset += nights + gap;
        id += 1;
    }
    out
}

fn phase1_build(reservations: &[CommittedReservation]) -> BlockedDateSet {
    let mut latencies = Vec::with_capacity(1_000);
    let mut index = BlockedDateSet::build(reservations);
    for _ in 0..1_000 {
        let start = Instant::now();
        index = BlockedDateSet::build(reservations);
        latencies.push(start.elapsed());
    }
    println!("  {} reservations -> {} blocked nights", reservations.len(), index.len());
    print_latency("build", &mut latencies);
    index
}

fn phase2_range_lookup(index: &BlockedDateSet, base: CalendarDate) {
    let mut latencies = Vec::with_capacity(100_000);
    let mut hits = 0usize;
    for i in 0..100_000u64 {
        let offset = (i * 37) % 360;
        let nights = 1 + i % 7;
        let range = DateRange::new(date(base, offset), date(base, offset + nights)).expect("valid stay");
        let start = Instant::now();
        let blocked = index.is_range_blocked(&range);
        latencies.push(start.elapsed());
        hits += usize::from(blocked);
    }
    println!("  {hits}/100000 candidate stays overlap a blocked night");
    print_latency("is_range_blocked", &mut latencies);
}

fn phase3_full_check(room: &RoomInfo, reservations: &[CommittedReservation], base: CalendarDate) {
    let today = date(base, 0);
    let mut latencies = Vec::with_capacity(20_000);
    let mut accepted = 0usize;
    for i in 0..20_000u64 {
        let offset = 1 + (i * 53) % 355;
        let stay = StayRequest {
            check_in: date(base, offset),
            check_out: date(base, offset + 1 + i % 5),
            guests: 1 + (i % 3) as u32,
        };
        let start = Instant::now();
        let result = check(&stay, room, reservations, today);
        latencies.push(start.elapsed());
        accepted += usize::from(result.available);
    }
    println!("  {accepted}/20000 stays accepted");
    print_latency("check", &mut latencies);
}

fn main() {
    let base = parse_calendar_date("2025-01-01").expect("base date");
    let room = RoomInfo {
        id: 1,
        number: "101".into(),
        kind: RoomKind::Double,
        capacity: 2,
        price_per_night: 12_000,
        status: RoomStatus::Available,
    };

    println!("=== frontdesk live feedback benchmark ===\n");

    println!("[setup]");
    let reservations = year_of_bookings(room.id, base);
    println!("  {} reservations over 365 days", reservations.len());

    println!("\n[phase 1] blocked-date index build");
    let index = phase1_build(&reservations);

    println!("\n[phase 2] range lookups against the index");
    phase2_range_lookup(&index, base);

    println!("\n[phase 3] full availability check on the snapshot");
    phase3_full_check(&room, &reservations, base);

    println!("\n=== benchmark complete ===");
}
