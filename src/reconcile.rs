//! Compensation record for the payment-then-persist saga. A payment that was
//! captured but could not be turned into a reservation is journaled here as an
//! orphan and stays pending until an operator resolves it.

use std::io;
use std::path::Path;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info};
use ulid::Ulid;

use crate::engine::{now_ms, BookingError};
use crate::journal::Journal;
use crate::model::*;
use crate::observability;

// ── Group-commit journal channel ─────────────────────────────

enum JournalCommand {
    Append {
        entry: JournalEntry,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        entries: Vec<JournalEntry>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Batch = Vec<(JournalEntry, oneshot::Sender<io::Result<()>>)>;

/// Owns the journal. Appends that arrive together share one fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { entry, response } => {
                let mut batch = vec![(entry, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { entry, response }) => batch.push((entry, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut journal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut journal, other);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: &mut Batch) {
    metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(journal: &mut Journal, batch: &Batch) -> io::Result<()> {
    let mut append_err = None;
    for (entry, _) in batch {
        if let Err(e) = journal.append_buffered(entry) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes don't ride along
    // with the next batch.
    let flush_err = journal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { entries, response } => {
            let result = Journal::write_compact_file(journal.path(), &entries)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!(),
    }
}

fn journal_error(e: impl std::fmt::Display) -> BookingError {
    BookingError::JournalError(e.to_string())
}

// ── Queue ────────────────────────────────────────────────────

pub struct ReconciliationQueue {
    tx: mpsc::Sender<JournalCommand>,
    pending: DashMap<Ulid, OrphanedPayment>,
    /// Writers hold it shared; compaction holds it exclusively so the
    /// snapshot it rewrites can't miss an append.
    gate: RwLock<()>,
}

impl ReconciliationQueue {
    /// Replay the journal at `path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(path: &Path) -> Result<Self, BookingError> {
        let entries = Journal::recover(path).map_err(journal_error)?;
        let journal = Journal::open(path).map_err(journal_error)?;
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(journal_writer_loop(journal, rx));

        let pending = DashMap::new();
        for entry in entries {
            match entry {
                JournalEntry::PaymentOrphaned(orphan) => {
                    pending.insert(orphan.ticket, orphan);
                }
                JournalEntry::Resolved { ticket, .. } => {
                    pending.remove(&ticket);
                }
            }
        }
        if !pending.is_empty() {
            info!(pending = pending.len(), path = %path.display(), "reconciliation tickets awaiting review");
        }
        metrics::gauge!(observability::RECONCILIATIONS_PENDING).set(pending.len() as f64);

        Ok(Self {
            tx,
            pending,
            gate: RwLock::new(()),
        })
    }

    async fn append(&self, entry: JournalEntry) -> Result<(), BookingError> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::Append { entry, response })
            .await
            .map_err(|_| journal_error("journal writer shut down"))?;
        rx.await
            .map_err(|_| journal_error("journal writer dropped response"))?
            .map_err(journal_error)
    }

    /// Durably record a captured payment with no reservation behind it.
    /// Returns only after the entry is fsynced.
    pub async fn record_orphan(&self, orphan: OrphanedPayment) -> Result<Ulid, BookingError> {
        let _shared = self.gate.read().await;
        let ticket = orphan.ticket;
        self.append(JournalEntry::PaymentOrphaned(orphan.clone())).await?;
        self.pending.insert(ticket, orphan);
        metrics::gauge!(observability::RECONCILIATIONS_PENDING).set(self.pending.len() as f64);
        Ok(ticket)
    }

    /// Close a ticket. Resolving an unknown or already-closed ticket is `NotFound`.
    pub async fn resolve(
        &self,
        ticket: Ulid,
        resolution: Resolution,
        note: Option<String>,
    ) -> Result<OrphanedPayment, BookingError> {
        let _shared = self.gate.read().await;
        let (_, orphan) = self
            .pending
            .remove(&ticket)
            .ok_or_else(|| BookingError::NotFound(format!("ticket {ticket}")))?;

        let entry = JournalEntry::Resolved {
            ticket,
            resolution,
            note,
            resolved_at: now_ms(),
        };
        if let Err(e) = self.append(entry).await {
            error!(%ticket, error = %e, "failed to journal resolution");
            self.pending.insert(ticket, orphan);
            return Err(e);
        }
        metrics::gauge!(observability::RECONCILIATIONS_PENDING).set(self.pending.len() as f64);
        info!(%ticket, ?resolution, "reconciliation ticket resolved");
        Ok(orphan)
    }

    pub fn get(&self, ticket: &Ulid) -> Option<OrphanedPayment> {
        self.pending.get(ticket).map(|e| e.value().clone())
    }

    /// Unresolved tickets, oldest first.
    pub fn pending(&self) -> Vec<OrphanedPayment> {
        let mut list: Vec<OrphanedPayment> = self.pending.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|o| o.ticket);
        list
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self
            .tx
            .send(JournalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal with only the unresolved tickets.
    pub async fn compact(&self) -> Result<(), BookingError> {
        let _exclusive = self.gate.write().await;
        let entries: Vec<JournalEntry> = self
            .pending()
            .into_iter()
            .map(JournalEntry::PaymentOrphaned)
            .collect();

        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::Compact { entries, response })
            .await
            .map_err(|_| journal_error("journal writer shut down"))?;
        rx.await
            .map_err(|_| journal_error("journal writer dropped response"))?
            .map_err(journal_error)
    }
}
