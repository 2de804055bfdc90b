//! Settlement posting with per-key idempotency.
//!
//! Each settlement is keyed `{booking}:{kind}:{batch}`. The first caller
//! to claim a key posts to the ledger; everyone else either replays the
//! posted settlement or waits for the in-flight posting to resolve. The
//! ledger call itself runs with no trip lock and no map guard held.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::timeout;
use ulid::Ulid;

use crate::collab::LedgerPosting;
use crate::model::{BookingStatus, Settlement, SettlementKind};
use crate::observability;

use super::mutations::validate_batch;
use super::{Engine, EngineError, now_ms};

/// Occupancy of one idempotency key.
pub(super) enum SettlementSlot {
    /// A posting is in flight; waiters park on the notify.
    Pending(Arc<Notify>),
    /// The settlement exists; replays return it unchanged.
    Posted(Settlement),
}

enum Claim {
    Won(Arc<Notify>),
    Wait,
    Existing(Settlement),
}

impl Engine {
    fn idempotency_key(booking_id: Ulid, kind: SettlementKind, batch: &str) -> String {
        format!("{booking_id}:{}:{batch}", kind.as_str())
    }

    /// Post (or replay) a settlement for a booking. Exactly one ledger
    /// posting ever happens per idempotency key, regardless of retries
    /// or concurrent callers.
    pub async fn post_settlement(
        &self,
        booking_id: Ulid,
        kind: SettlementKind,
        batch: &str,
        actor: Ulid,
    ) -> Result<Settlement, EngineError> {
        validate_batch(batch)?;

        let (trip_id, amount, currency, diver_id) = {
            let (trip_id, guard) = {
                let trip_id = *self
                    .booking_index
                    .get(&booking_id)
                    .ok_or(EngineError::NotFound(booking_id))?;
                (trip_id, self.read_trip(trip_id).await?)
            };
            let booking = guard
                .booking(booking_id)
                .ok_or(EngineError::NotFound(booking_id))?;
            let amount = match kind {
                SettlementKind::Revenue => {
                    if matches!(booking.status, BookingStatus::Cancelled | BookingStatus::NoShow) {
                        return Err(EngineError::Invalid(
                            "cannot post revenue for a cancelled or no-show booking",
                        ));
                    }
                    booking.price.total
                }
                SettlementKind::Refund => {
                    if booking.status != BookingStatus::Cancelled {
                        return Err(EngineError::Invalid(
                            "refund settlement requires a cancelled booking",
                        ));
                    }
                    booking
                        .refund_amount
                        .ok_or(EngineError::Invalid("no refund due on this booking"))?
                }
            };
            (trip_id, amount, booking.price.currency.clone(), booking.diver_id)
        };

        let key = Self::idempotency_key(booking_id, kind, batch);
        let mut attempts = 0u8;
        loop {
            // Entry guard must be dropped before any await. A waiter
            // enables its notified future while the guard is still held:
            // the holder cannot insert the posted slot (same shard) and
            // fire notify_waiters until after that, so the wakeup cannot
            // be lost in between.
            let wait_notify;
            let mut wait_fut = None;
            let claim = match self.settlements.entry(key.clone()) {
                Entry::Occupied(e) => match e.get() {
                    SettlementSlot::Posted(s) => Claim::Existing(s.clone()),
                    SettlementSlot::Pending(n) => {
                        wait_notify = n.clone();
                        let mut fut = Box::pin(wait_notify.notified());
                        fut.as_mut().enable();
                        wait_fut = Some(fut);
                        Claim::Wait
                    }
                },
                Entry::Vacant(v) => {
                    let notify = Arc::new(Notify::new());
                    v.insert(SettlementSlot::Pending(notify.clone()));
                    Claim::Won(notify)
                }
            };

            match claim {
                Claim::Existing(settlement) => {
                    metrics::counter!(observability::SETTLEMENT_REPLAYS_TOTAL).increment(1);
                    tracing::debug!(key = %key, "settlement replayed");
                    return Ok(settlement);
                }
                Claim::Wait => {
                    attempts += 1;
                    if attempts > 2 {
                        return Err(EngineError::SettlementContention(key));
                    }
                    if let Some(fut) = wait_fut {
                        // Woken when the holder posts or rolls back; the
                        // timeout covers a holder that never resolves.
                        let _ = timeout(self.config.settlement_wait, fut).await;
                    }
                }
                Claim::Won(notify) => {
                    return self
                        .post_claimed(
                            key, booking_id, trip_id, diver_id, kind, batch, amount, currency,
                            actor, notify,
                        )
                        .await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn post_claimed(
        &self,
        key: String,
        booking_id: Ulid,
        trip_id: Ulid,
        diver_id: Ulid,
        kind: SettlementKind,
        batch: &str,
        amount: rust_decimal::Decimal,
        currency: String,
        actor: Ulid,
        notify: Arc<Notify>,
    ) -> Result<Settlement, EngineError> {
        let (debit, credit, description) = match kind {
            SettlementKind::Revenue => (
                format!("receivable:{diver_id}"),
                "revenue:trips".to_string(),
                format!("trip revenue for booking {booking_id}"),
            ),
            SettlementKind::Refund => (
                "revenue:trips".to_string(),
                format!("receivable:{diver_id}"),
                format!("cancellation refund for booking {booking_id}"),
            ),
        };
        let posting = LedgerPosting {
            description,
            debit_account: debit,
            credit_account: credit,
            amount,
            currency: currency.clone(),
            metadata: json!({
                "booking_id": booking_id.to_string(),
                "trip_id": trip_id.to_string(),
                "idempotency_key": key,
                "settlement_type": kind.as_str(),
                "batch": batch,
            }),
        };

        match self.collab.ledger.post(posting).await {
            Ok(tx) => {
                let settlement = Settlement {
                    id: Ulid::new(),
                    booking_id,
                    trip_id,
                    kind,
                    batch: batch.to_string(),
                    amount,
                    currency,
                    idempotency_key: key.clone(),
                    ledger_ref: tx,
                    processed_by: actor,
                    settled_at: now_ms(),
                };
                self.settlements
                    .insert(key.clone(), SettlementSlot::Posted(settlement.clone()));
                if kind == SettlementKind::Revenue {
                    self.revenue_index.insert(booking_id, key);
                }
                notify.notify_waiters();

                metrics::counter!(observability::SETTLEMENTS_POSTED_TOTAL).increment(1);
                tracing::info!(
                    booking = %booking_id,
                    kind = kind.as_str(),
                    batch,
                    %amount,
                    "settlement posted"
                );
                self.emit(
                    "settlement.posted",
                    actor,
                    "settlement",
                    settlement.id,
                    json!({}),
                    json!({
                        "booking_id": booking_id.to_string(),
                        "kind": kind.as_str(),
                        "batch": batch,
                        "amount": amount,
                        "currency": settlement.currency,
                        "ledger_ref": settlement.ledger_ref.0,
                    }),
                )
                .await;
                Ok(settlement)
            }
            Err(e) => {
                // Roll the claim back so a retry can repost.
                self.settlements.remove(&key);
                notify.notify_waiters();
                tracing::warn!(key = %key, error = %e, "ledger posting failed");
                Err(EngineError::Ledger(e.to_string()))
            }
        }
    }
}
