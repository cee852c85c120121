//! Credit account aggregate

use super::rate::{CreditRate, BILLABLE_INCREMENT_SECS};
use super::reservation::{CommitReceipt, Reservation, ReservationHandle, ReservationStatus};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{SessionId, TenantId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Consumable minutes/credits of one tenant
///
/// All amounts are in the smallest credit unit. Both pools are unsigned, so
/// `balance + free_allowance_remaining` can never go negative; every held
/// reservation was carved out of the pools when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub tenant_id: TenantId,
    pub balance: u64,
    pub free_allowance_remaining: u64,
    pub free_allowance_quota: u64,
    pub cycle_started_at: DateTime<Utc>,
    pub reservations: HashMap<SessionId, Reservation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    pub fn new(
        tenant_id: TenantId,
        balance: u64,
        free_allowance_quota: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            balance,
            free_allowance_remaining: free_allowance_quota,
            free_allowance_quota,
            cycle_started_at: now,
            reservations: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Spendable credits across both pools
    pub fn available(&self) -> u64 {
        self.balance.saturating_add(self.free_allowance_remaining)
    }

    /// Credits currently held by open reservations
    pub fn held(&self) -> u64 {
        self.reservations
            .values()
            .filter(|r| r.is_held())
            .map(Reservation::amount)
            .sum()
    }

    /// Sum of costs committed in the current billing cycle
    pub fn committed(&self) -> u64 {
        self.reservations
            .values()
            .filter(|r| !self.finished_before_cycle(r))
            .filter_map(|r| r.committed_cost)
            .sum()
    }

    fn finished_before_cycle(&self, reservation: &Reservation) -> bool {
        reservation
            .finalized_at
            .map_or(false, |at| at < self.cycle_started_at)
    }

    pub fn reservation(&self, session_id: &SessionId) -> Option<&Reservation> {
        self.reservations.get(session_id)
    }

    /// Reset the free allowance if one or more billing cycles have elapsed
    ///
    /// Free credits still held by open reservations stay accounted for, so
    /// their later refund cannot push the allowance above its quota.
    /// Reservations settled before the new cycle are dropped.
    pub fn roll_billing_cycle(&mut self, now: DateTime<Utc>, cycle: Duration) -> bool {
        let cycle_secs = cycle.num_seconds();
        if cycle_secs <= 0 || now < self.cycle_started_at + Duration::seconds(cycle_secs) {
            return false;
        }

        let elapsed_cycles = (now - self.cycle_started_at).num_seconds() / cycle_secs;
        self.cycle_started_at += Duration::seconds(cycle_secs * elapsed_cycles);

        let cycle_start = self.cycle_started_at;
        self.reservations
            .retain(|_, r| r.finalized_at.map_or(true, |at| at >= cycle_start));

        let held_free: u64 = self
            .reservations
            .values()
            .filter(|r| r.is_held())
            .map(|r| r.from_free)
            .sum();
        self.free_allowance_remaining = self.free_allowance_quota.saturating_sub(held_free);
        self.updated_at = now;
        true
    }

    /// Hold credits for up to `estimated_max_seconds` of talk time
    ///
    /// Free allowance is consumed before paid balance. When the account
    /// cannot cover the whole estimate, as many whole minutes as it can pay
    /// for are reserved; it fails only when not even one minute is covered.
    pub fn reserve(
        &mut self,
        session_id: &SessionId,
        rate: CreditRate,
        estimated_max_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<ReservationHandle> {
        if self.reservations.contains_key(session_id) {
            return Err(DomainError::AlreadyExists(format!(
                "Reservation for session {}",
                session_id
            )));
        }

        let wanted_minutes = CreditRate::billable_minutes(estimated_max_seconds).max(1);
        let affordable_minutes = rate.affordable_minutes(self.available());
        let minutes = wanted_minutes.min(affordable_minutes);

        if minutes == 0 {
            return Err(DomainError::InsufficientCredits {
                tenant_id: self.tenant_id,
                required: rate.credits_per_minute(),
                available: self.available(),
            });
        }

        let amount = minutes * rate.credits_per_minute();
        let from_free = amount.min(self.free_allowance_remaining);
        let from_balance = amount - from_free;

        self.free_allowance_remaining -= from_free;
        self.balance -= from_balance;

        let covered_seconds = minutes.saturating_mul(BILLABLE_INCREMENT_SECS);
        self.reservations.insert(
            session_id.clone(),
            Reservation {
                session_id: session_id.clone(),
                from_free,
                from_balance,
                covered_seconds,
                status: ReservationStatus::Held,
                committed_cost: None,
                created_at: now,
                finalized_at: None,
            },
        );
        self.updated_at = now;

        Ok(ReservationHandle {
            tenant_id: self.tenant_id,
            session_id: session_id.clone(),
            amount,
            covered_seconds,
        })
    }

    /// Debit the actual cost and return the unused part of the hold
    ///
    /// The cost is charged against the free portion first, mirroring the
    /// order the hold was taken in. Committing twice is a no-op.
    pub fn commit(
        &mut self,
        session_id: &SessionId,
        rate: CreditRate,
        actual_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<CommitReceipt> {
        let reservation = self.reservations.get_mut(session_id).ok_or_else(|| {
            DomainError::NotFound(format!("Reservation for session {}", session_id))
        })?;

        match reservation.status {
            ReservationStatus::Committed => {
                let cost = reservation.committed_cost.unwrap_or(0);
                let billable_minutes = if rate.credits_per_minute() == 0 {
                    0
                } else {
                    cost / rate.credits_per_minute()
                };
                return Ok(CommitReceipt {
                    session_id: session_id.clone(),
                    billable_minutes,
                    cost,
                    refunded_free: 0,
                    refunded_balance: 0,
                    replayed: true,
                });
            }
            ReservationStatus::Released => {
                return Err(DomainError::InvalidOperation(format!(
                    "Reservation for session {} was already released",
                    session_id
                )));
            }
            ReservationStatus::Held => {}
        }

        let billable_minutes = CreditRate::billable_minutes(actual_seconds)
            .min(reservation.covered_seconds / BILLABLE_INCREMENT_SECS);
        let cost = rate.cost_of(actual_seconds).min(reservation.amount());
        let charged_free = cost.min(reservation.from_free);
        let charged_balance = cost - charged_free;

        let refunded_free = reservation.from_free - charged_free;
        let refunded_balance = reservation.from_balance - charged_balance;

        reservation.status = ReservationStatus::Committed;
        reservation.committed_cost = Some(cost);
        reservation.finalized_at = Some(now);

        self.free_allowance_remaining += refunded_free;
        self.balance += refunded_balance;
        self.updated_at = now;

        Ok(CommitReceipt {
            session_id: session_id.clone(),
            billable_minutes,
            cost,
            refunded_free,
            refunded_balance,
            replayed: false,
        })
    }

    /// Return the whole hold to its original pools
    ///
    /// Returns the amount given back; releasing twice gives back nothing.
    pub fn release(&mut self, session_id: &SessionId, now: DateTime<Utc>) -> Result<u64> {
        let reservation = self.reservations.get_mut(session_id).ok_or_else(|| {
            DomainError::NotFound(format!("Reservation for session {}", session_id))
        })?;

        match reservation.status {
            ReservationStatus::Released => return Ok(0),
            ReservationStatus::Committed => {
                return Err(DomainError::InvalidOperation(format!(
                    "Reservation for session {} was already committed",
                    session_id
                )));
            }
            ReservationStatus::Held => {}
        }

        reservation.status = ReservationStatus::Released;
        reservation.finalized_at = Some(now);
        let returned = reservation.amount();

        self.free_allowance_remaining += reservation.from_free;
        self.balance += reservation.from_balance;
        self.updated_at = now;

        Ok(returned)
    }
}
