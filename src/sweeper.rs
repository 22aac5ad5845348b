use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::now_ms;
use crate::observability;
use crate::reconcile::ReconciliationQueue;

/// What one sweep saw and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pending: usize,
    pub compacted: bool,
}

/// Report pending reconciliation tickets and compact the journal once it has
/// grown past `compact_threshold` appends.
pub async fn sweep_once(queue: &ReconciliationQueue, compact_threshold: u64) -> SweepReport {
    let pending = queue.pending();
    metrics::gauge!(observability::RECONCILIATIONS_PENDING).set(pending.len() as f64);

    let now = now_ms();
    for orphan in &pending {
        let age_mins = (now - orphan.recorded_at).max(0) / 60_000;
        warn!(
            ticket = %orphan.ticket,
            room_id = orphan.room_id,
            payment_reference = %orphan.payment_reference,
            amount = orphan.amount,
            currency = %orphan.currency,
            age_mins,
            "captured payment awaiting reconciliation"
        );
    }

    let mut compacted = false;
    if queue.appends_since_compact().await >= compact_threshold {
        match queue.compact().await {
            Ok(()) => {
                compacted = true;
                metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
                info!(pending = pending.len(), "reconciliation journal compacted");
            }
            Err(e) => {
                metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
                warn!(error = %e, "journal compaction failed");
            }
        }
    }

    SweepReport {
        pending: pending.len(),
        compacted,
    }
}

/// Background task: sweep every `interval`.
pub async fn run_sweeper(queue: Arc<ReconciliationQueue>, interval: Duration, compact_threshold: u64) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        sweep_once(&queue, compact_threshold).await;
    }
}
