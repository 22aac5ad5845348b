//! Booking flow controller: select dates, verify against a fresh snapshot,
//! capture payment, persist.
//!
//! Every verification fetches the room's reservations anew; nothing fetched
//! earlier (page load, a previous attempt, the live index) is ever reused for
//! a decision. The controller holds no lock across an await: state lives
//! behind a short-lived mutex, an in-flight flag rejects a second concurrent
//! submission, and an epoch counter discards results that arrive after the
//! guest has moved on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::backend::{CreateReservation, ReservationSink, ReservationSource};
use crate::engine::{
    check, now_ms, quote, validate_special_requests, validate_stay, BlockedDateSet, BookingError, Clock,
};
use crate::limits::MAX_SNAPSHOT_RESERVATIONS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::payment::{PaymentGateway, PaymentOutcome, PaymentReceipt, PaymentRequest};
use crate::reconcile::ReconciliationQueue;

// ── States ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlowStage {
    SelectingDates,
    Verifying,
    AwaitingPayment,
    Persisting,
    Confirmed,
    Failed,
}

impl FlowStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowStage::SelectingDates => "SelectingDates",
            FlowStage::Verifying => "Verifying",
            FlowStage::AwaitingPayment => "AwaitingPayment",
            FlowStage::Persisting => "Persisting",
            FlowStage::Confirmed => "Confirmed",
            FlowStage::Failed => "Failed",
        }
    }

    pub fn can_transition_to(self, to: FlowStage) -> bool {
        use FlowStage::*;
        matches!(
            (self, to),
            (SelectingDates, Verifying)
                | (Verifying, AwaitingPayment)
                | (Verifying, Failed)
                | (Verifying, SelectingDates)
                | (AwaitingPayment, Persisting)
                | (AwaitingPayment, SelectingDates)
                | (AwaitingPayment, Failed)
                | (Persisting, Confirmed)
                | (Persisting, Failed)
                | (Failed, SelectingDates)
        )
    }
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    SelectingDates,
    Verifying,
    AwaitingPayment(Quote),
    Persisting {
        quote: Quote,
        receipt: PaymentReceipt,
    },
    Confirmed(CommittedReservation),
    /// Not terminal: `edit` or `submit` start over from date selection.
    Failed(BookingError),
}

impl FlowState {
    pub fn stage(&self) -> FlowStage {
        match self {
            FlowState::SelectingDates => FlowStage::SelectingDates,
            FlowState::Verifying => FlowStage::Verifying,
            FlowState::AwaitingPayment(_) => FlowStage::AwaitingPayment,
            FlowState::Persisting { .. } => FlowStage::Persisting,
            FlowState::Confirmed(_) => FlowStage::Confirmed,
            FlowState::Failed(_) => FlowStage::Failed,
        }
    }
}

/// Published on the room's channel for every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowTransition {
    pub attempt: Ulid,
    pub room_id: RoomId,
    pub from: FlowStage,
    pub to: FlowStage,
}

/// Answer from the live index while the guest is still picking dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveFeedback {
    Clear,
    /// Blocked nights inside the picked range.
    Blocked(Vec<CalendarDate>),
    Invalid(BookingError),
}

// ── Controller ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct FlowDeps {
    pub source: Arc<dyn ReservationSource>,
    pub sink: Arc<dyn ReservationSink>,
    pub payments: Arc<dyn PaymentGateway>,
    pub reconciliation: Arc<ReconciliationQueue>,
    pub notify: Arc<NotifyHub>,
    pub clock: Arc<dyn Clock>,
    pub currency: String,
}

struct FlowInner {
    state: FlowState,
    draft: Option<ProposedBooking>,
    last_error: Option<BookingError>,
    live: BlockedDateSet,
    attempt: Ulid,
    /// Bumped whenever in-flight work is abandoned; results carrying an older
    /// epoch are dropped.
    epoch: u64,
    cancel: CancellationToken,
    /// The payment provider has control; `cancel` can't take it back.
    capturing: bool,
}

pub struct BookingFlow {
    room_id: RoomId,
    guest_id: GuestId,
    deps: FlowDeps,
    inner: Mutex<FlowInner>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on drop, including when the future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Armed while money may be moving. If `pay` is dropped before disarming,
/// the attempt is failed and held for reconciliation.
struct SagaGuard<'a> {
    flow: &'a BookingFlow,
    attempt: Ulid,
    quote: Quote,
    receipt: Option<PaymentReceipt>,
    armed: bool,
}

impl SagaGuard<'_> {
    fn captured(&mut self, receipt: PaymentReceipt) {
        self.receipt = Some(receipt);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SagaGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flow.interrupted(self.attempt, &self.quote, self.receipt.as_ref());
        }
    }
}

type Snapshot = (RoomInfo, Vec<CommittedReservation>);

impl BookingFlow {
    pub fn new(room_id: RoomId, guest_id: GuestId, deps: FlowDeps) -> Self {
        Self {
            room_id,
            guest_id,
            deps,
            inner: Mutex::new(FlowInner {
                state: FlowState::SelectingDates,
                draft: None,
                last_error: None,
                live: BlockedDateSet::default(),
                attempt: Ulid::new(),
                epoch: 0,
                cancel: CancellationToken::new(),
                capturing: false,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<InFlight<'_>, BookingError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| BookingError::Busy)
    }

    pub fn state(&self) -> FlowState {
        self.lock().state.clone()
    }

    pub fn stage(&self) -> FlowStage {
        self.lock().state.stage()
    }

    pub fn draft(&self) -> Option<ProposedBooking> {
        self.lock().draft.clone()
    }

    /// The most recent rejection, kept after the flow returns to date
    /// selection so the guest can be told why.
    pub fn last_error(&self) -> Option<BookingError> {
        self.lock().last_error.clone()
    }

    pub fn attempt(&self) -> Ulid {
        self.lock().attempt
    }

    fn transition(&self, inner: &mut FlowInner, next: FlowState) -> Result<(), BookingError> {
        let from = inner.state.stage();
        let to = next.stage();
        if !from.can_transition_to(to) {
            return Err(BookingError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
        if let FlowState::Failed(ref reason) = next {
            inner.last_error = Some(reason.clone());
        }
        inner.state = next;
        metrics::counter!(observability::FLOW_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        debug!(room_id = self.room_id, attempt = %inner.attempt, %from, %to, "booking flow transition");
        self.deps.notify.send(
            self.room_id,
            &FlowTransition {
                attempt: inner.attempt,
                room_id: self.room_id,
                from,
                to,
            },
        );
        Ok(())
    }

    /// Leave `Failed` for date selection, if that's where we are.
    fn reopen(&self, inner: &mut FlowInner) -> Result<(), BookingError> {
        match inner.state.stage() {
            FlowStage::SelectingDates => Ok(()),
            FlowStage::Failed => self.transition(inner, FlowState::SelectingDates),
            other => Err(BookingError::InvalidTransition {
                from: other.as_str(),
                to: FlowStage::SelectingDates.as_str(),
            }),
        }
    }

    /// Abandon whatever is in flight. Caller holds the lock.
    fn abandon(inner: &mut FlowInner) {
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.epoch += 1;
    }

    // ── Date selection ───────────────────────────────────────────

    /// Replace the draft. Allowed while selecting dates or after a failure.
    pub fn edit(&self, draft: ProposedBooking) -> Result<(), BookingError> {
        if draft.room_id != self.room_id {
            return Err(BookingError::NotFound(format!(
                "room {} in booking flow for room {}",
                draft.room_id, self.room_id
            )));
        }
        let mut inner = self.lock();
        self.reopen(&mut inner)?;
        inner.draft = Some(draft);
        Ok(())
    }

    /// Fetch the blocked-dates shortcut into the live index. Advisory only.
    pub async fn load_live_index(&self) -> Result<usize, BookingError> {
        let dates = self.deps.source.blocked_dates(self.room_id).await?;
        let index = BlockedDateSet::from_dates(dates);
        let count = index.len();
        self.lock().live = index;
        debug!(room_id = self.room_id, blocked = count, "live index loaded");
        Ok(count)
    }

    /// Feedback for a date pick, answered from the live index alone.
    pub fn live_feedback(&self, check_in: CalendarDate, check_out: CalendarDate) -> LiveFeedback {
        let stay = StayRequest {
            check_in,
            check_out,
            guests: 1,
        };
        let range = match validate_stay(&stay, self.deps.clock.today()) {
            Ok(range) => range,
            Err(e) => return LiveFeedback::Invalid(e),
        };
        let inner = self.lock();
        if !inner.live.is_range_blocked(&range) {
            return LiveFeedback::Clear;
        }
        LiveFeedback::Blocked(range.days().filter(|d| inner.live.is_blocked(*d)).collect())
    }

    // ── Verification ─────────────────────────────────────────────

    async fn fetch_snapshot(&self) -> Result<Snapshot, BookingError> {
        let start = Instant::now();
        let result = futures::try_join!(
            self.deps.source.room(self.room_id),
            self.deps.source.reservations(self.room_id),
        );
        metrics::histogram!(observability::SNAPSHOT_FETCH_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        let (room, committed) = result?;
        if committed.len() > MAX_SNAPSHOT_RESERVATIONS {
            return Err(BookingError::LimitExceeded("reservation snapshot too large"));
        }
        Ok((room, committed))
    }

    async fn fetch_cancellable(&self, token: CancellationToken) -> Result<Snapshot, BookingError> {
        tokio::select! {
            _ = token.cancelled() => Err(BookingError::Cancelled),
            fetched = self.fetch_snapshot() => fetched,
        }
    }

    fn verify(&self, draft: &ProposedBooking, room: &RoomInfo, committed: &[CommittedReservation]) -> Result<Quote, BookingError> {
        let verdict = check(&draft.stay(), room, committed, self.deps.clock.today());
        let outcome = if verdict.available { "available" } else { "rejected" };
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "outcome" => outcome).increment(1);
        verdict.into_result()?;
        quote(room, draft.range()?, &self.deps.currency)
    }

    /// Checks that need no network: the range, "not in the past", and the
    /// special-requests limit.
    fn verify_locally(&self, draft: &ProposedBooking) -> Result<(), BookingError> {
        validate_stay(&draft.stay(), self.deps.clock.today())?;
        validate_special_requests(draft.special_requests.as_deref())
    }

    /// Verify the draft against a freshly fetched snapshot. On success the
    /// flow waits for payment with the computed quote.
    pub async fn submit(&self) -> Result<Quote, BookingError> {
        let _busy = self.begin()?;

        let (draft, epoch, token) = {
            let mut inner = self.lock();
            let Some(draft) = inner.draft.clone() else {
                return Err(BookingError::InvalidDateRange("no dates selected".into()));
            };
            self.reopen(&mut inner)?;
            inner.attempt = Ulid::new();
            self.transition(&mut inner, FlowState::Verifying)?;

            if let Err(e) = self.verify_locally(&draft) {
                self.transition(&mut inner, FlowState::Failed(e.clone()))?;
                return Err(e);
            }
            (draft, inner.epoch, inner.cancel.clone())
        };

        let fetched = self.fetch_cancellable(token).await;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!(room_id = self.room_id, "discarding snapshot for abandoned verification");
            return Err(BookingError::Cancelled);
        }
        match fetched.and_then(|(room, committed)| self.verify(&draft, &room, &committed)) {
            Ok(quote) => {
                info!(
                    room_id = self.room_id,
                    attempt = %inner.attempt,
                    range = %quote.range,
                    total = quote.total,
                    "dates verified, awaiting payment"
                );
                self.transition(&mut inner, FlowState::AwaitingPayment(quote.clone()))?;
                Ok(quote)
            }
            Err(e) => {
                info!(room_id = self.room_id, attempt = %inner.attempt, reason = %e, "verification rejected");
                self.transition(&mut inner, FlowState::Failed(e.clone()))?;
                Err(e)
            }
        }
    }

    // ── Payment and persistence ──────────────────────────────────

    /// Re-check at the payment boundary, capture, then create the
    /// reservation. A create failure after capture is journaled for
    /// reconciliation and never retried.
    pub async fn pay(&self) -> Result<CommittedReservation, BookingError> {
        let _busy = self.begin()?;

        let (draft, quote, attempt, epoch, token) = {
            let inner = self.lock();
            let FlowState::AwaitingPayment(ref quote) = inner.state else {
                return Err(BookingError::InvalidTransition {
                    from: inner.state.stage().as_str(),
                    to: FlowStage::Persisting.as_str(),
                });
            };
            let Some(draft) = inner.draft.clone() else {
                return Err(BookingError::InvalidDateRange("no dates selected".into()));
            };
            (draft, quote.clone(), inner.attempt, inner.epoch, inner.cancel.clone())
        };

        let fetched = self.fetch_cancellable(token).await;

        let room = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                debug!(room_id = self.room_id, %attempt, "discarding snapshot for abandoned payment");
                return Err(BookingError::Cancelled);
            }
            let recheck = fetched.and_then(|(room, committed)| {
                let fresh = self.verify(&draft, &room, &committed)?;
                Ok((room, fresh))
            });
            match recheck {
                Ok((room, fresh)) => {
                    if fresh.total != quote.total {
                        warn!(
                            room_id = self.room_id,
                            %attempt,
                            quoted = quote.total,
                            current = fresh.total,
                            "room price changed since quote; charging the quoted amount"
                        );
                    }
                    inner.capturing = true;
                    room
                }
                Err(e) => {
                    info!(room_id = self.room_id, %attempt, reason = %e, "payment-boundary re-check rejected");
                    self.transition(&mut inner, FlowState::Failed(e.clone()))?;
                    return Err(e);
                }
            }
        };

        let mut saga = SagaGuard {
            flow: self,
            attempt,
            quote: quote.clone(),
            receipt: None,
            armed: true,
        };

        let request = PaymentRequest {
            attempt,
            amount: quote.total,
            currency: quote.currency.clone(),
            description: format!("Room {}, {} night(s), {}", room.number, quote.nights, quote.range),
        };
        info!(room_id = self.room_id, %attempt, amount = %request.amount_text(), currency = %request.currency, "handing off to payment provider");
        let outcome = self.deps.payments.capture(&request).await;

        let receipt = {
            let mut inner = self.lock();
            inner.capturing = false;
            let label = match &outcome {
                PaymentOutcome::Approved(_) => "approved",
                PaymentOutcome::Cancelled => "cancelled",
                PaymentOutcome::Failed(_) => "failed",
            };
            metrics::counter!(observability::PAYMENT_OUTCOMES_TOTAL, "outcome" => label).increment(1);

            match outcome {
                PaymentOutcome::Approved(receipt) => {
                    info!(room_id = self.room_id, %attempt, reference = %receipt.reference, "payment captured");
                    saga.captured(receipt.clone());
                    self.transition(
                        &mut inner,
                        FlowState::Persisting {
                            quote: quote.clone(),
                            receipt: receipt.clone(),
                        },
                    )?;
                    receipt
                }
                PaymentOutcome::Cancelled => {
                    saga.disarm();
                    info!(room_id = self.room_id, %attempt, "payment cancelled by guest");
                    self.transition(&mut inner, FlowState::SelectingDates)?;
                    inner.last_error = Some(BookingError::PaymentCancelled);
                    return Err(BookingError::PaymentCancelled);
                }
                PaymentOutcome::Failed(msg) => {
                    saga.disarm();
                    warn!(room_id = self.room_id, %attempt, error = %msg, "payment failed");
                    let e = BookingError::PaymentError(msg);
                    self.transition(&mut inner, FlowState::SelectingDates)?;
                    inner.last_error = Some(e.clone());
                    return Err(e);
                }
            }
        };

        let create = CreateReservation {
            room_id: self.room_id,
            guest_id: self.guest_id,
            range: quote.range,
            guests: draft.guests,
            special_requests: draft.special_requests.clone(),
            total: quote.total,
            receipt: receipt.clone(),
        };

        match self.deps.sink.create(&create).await {
            Ok(reservation) => {
                saga.disarm();
                {
                    let mut inner = self.lock();
                    self.transition(&mut inner, FlowState::Confirmed(reservation.clone()))?;
                }
                info!(room_id = self.room_id, %attempt, reservation_id = reservation.id, "reservation confirmed");
                if let Err(e) = self.deps.sink.send_confirmation(reservation.id).await {
                    warn!(reservation_id = reservation.id, error = %e, "confirmation email not sent");
                }
                Ok(reservation)
            }
            Err(cause) => {
                let err = self.escalate(attempt, &quote, &receipt, cause).await;
                saga.disarm();
                let mut inner = self.lock();
                self.transition(&mut inner, FlowState::Failed(err.clone()))?;
                Err(err)
            }
        }
    }

    /// Journal a captured payment that has no reservation behind it.
    async fn escalate(
        &self,
        attempt: Ulid,
        quote: &Quote,
        receipt: &PaymentReceipt,
        cause: BookingError,
    ) -> BookingError {
        let detail = match cause {
            BookingError::PersistenceConflict { detail, .. } => detail,
            other => other.to_string(),
        };
        metrics::counter!(observability::PERSISTENCE_CONFLICTS_TOTAL).increment(1);

        let orphan = self.orphan(attempt, quote, Some(receipt), detail.clone());
        match self.deps.reconciliation.record_orphan(orphan).await {
            Ok(ticket) => {
                error!(
                    room_id = self.room_id,
                    %attempt,
                    %ticket,
                    payment_reference = %receipt.reference,
                    %detail,
                    "reservation rejected after payment; reconciliation ticket recorded"
                );
                BookingError::PersistenceConflict {
                    detail,
                    ticket: Some(ticket),
                }
            }
            Err(journal_err) => {
                error!(
                    room_id = self.room_id,
                    %attempt,
                    payment_reference = %receipt.reference,
                    amount = receipt.amount,
                    %detail,
                    error = %journal_err,
                    "reservation rejected after payment and the reconciliation ticket could not be recorded"
                );
                BookingError::PersistenceConflict { detail, ticket: None }
            }
        }
    }

    fn orphan(
        &self,
        attempt: Ulid,
        quote: &Quote,
        receipt: Option<&PaymentReceipt>,
        detail: String,
    ) -> OrphanedPayment {
        OrphanedPayment {
            ticket: Ulid::new(),
            attempt,
            room_id: self.room_id,
            guest_id: self.guest_id,
            range: quote.range,
            amount: receipt.map_or(quote.total, |r| r.amount),
            currency: receipt.map_or_else(|| quote.currency.clone(), |r| r.currency.clone()),
            // Without a receipt the provider is searched by our attempt id.
            payment_reference: receipt.map_or_else(|| format!("attempt {attempt}"), |r| r.reference.clone()),
            detail,
            recorded_at: now_ms(),
        }
    }

    /// `pay` was dropped mid-capture or mid-create. The capture outcome (or
    /// whether the backend kept the booking) is unknown, so the attempt ends
    /// in `Failed(PersistenceConflict)` and a ticket is journaled from a
    /// spawned task.
    fn interrupted(&self, attempt: Ulid, quote: &Quote, receipt: Option<&PaymentReceipt>) {
        let mut inner = self.lock();
        inner.capturing = false;
        let stage = inner.state.stage();
        if inner.attempt != attempt || !matches!(stage, FlowStage::AwaitingPayment | FlowStage::Persisting) {
            return;
        }

        let detail = match receipt {
            Some(_) => "booking abandoned while the reservation was being created",
            None => "booking abandoned while the payment provider had control",
        };
        let orphan = self.orphan(attempt, quote, receipt, detail.to_string());
        let ticket = orphan.ticket;
        metrics::counter!(observability::PERSISTENCE_CONFLICTS_TOTAL).increment(1);
        error!(
            room_id = self.room_id,
            %attempt,
            %ticket,
            %stage,
            payment_reference = %orphan.payment_reference,
            amount = orphan.amount,
            "payment step interrupted; holding attempt for reconciliation"
        );
        let err = BookingError::PersistenceConflict {
            detail: detail.to_string(),
            ticket: Some(ticket),
        };
        if let Err(e) = self.transition(&mut inner, FlowState::Failed(err)) {
            warn!(room_id = self.room_id, %attempt, error = %e, "could not fail interrupted attempt");
        }
        drop(inner);

        let queue = self.deps.reconciliation.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = queue.record_orphan(orphan).await {
                        error!(%ticket, error = %e, "interrupted payment could not be journaled");
                    }
                });
            }
            Err(_) => error!(%ticket, "no runtime to journal interrupted payment"),
        }
    }

    /// Abandon an in-flight verification or an unpaid quote and go back to
    /// date selection. Returns false when there is nothing to abandon, or when
    /// the payment provider or the backend already has the booking.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        match inner.state.stage() {
            FlowStage::Verifying => {}
            FlowStage::AwaitingPayment if !inner.capturing => {}
            _ => return false,
        }
        Self::abandon(&mut inner);
        if self.transition(&mut inner, FlowState::SelectingDates).is_err() {
            return false;
        }
        inner.last_error = Some(BookingError::Cancelled);
        info!(room_id = self.room_id, attempt = %inner.attempt, "booking step abandoned");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_always_routes_back_to_selection() {
        assert!(FlowStage::Failed.can_transition_to(FlowStage::SelectingDates));
        assert!(!FlowStage::Failed.can_transition_to(FlowStage::Verifying));
        assert!(!FlowStage::Failed.can_transition_to(FlowStage::Confirmed));
    }

    #[test]
    fn confirmed_is_terminal() {
        use FlowStage::*;
        for to in [SelectingDates, Verifying, AwaitingPayment, Persisting, Failed] {
            assert!(!Confirmed.can_transition_to(to));
        }
    }

    #[test]
    fn payment_cannot_be_skipped() {
        assert!(!FlowStage::Verifying.can_transition_to(FlowStage::Persisting));
        assert!(!FlowStage::SelectingDates.can_transition_to(FlowStage::AwaitingPayment));
        assert!(!FlowStage::Persisting.can_transition_to(FlowStage::SelectingDates));
    }
}
