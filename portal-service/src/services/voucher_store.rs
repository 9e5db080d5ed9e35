//! Durable voucher state with a per-code conditional `Unused -> Reserved`
//! transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::instrument;

use crate::models::{Voucher, VoucherState};
use crate::services::error::StoreError;

/// Result of attempting to reserve a voucher for one redemption.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Voucher),
    NotFound,
    AlreadyUsed,
    Expired,
}

#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Insert all vouchers or none; fails with `Conflict` on a duplicate code.
    async fn insert_many(&self, vouchers: &[Voucher]) -> Result<(), StoreError>;

    async fn get(&self, code: &str) -> Result<Option<Voucher>, StoreError>;

    /// Atomically move `code` from `Unused` to `Reserved` under
    /// `reservation_id`. Must be a single conditional update scoped to `code`.
    async fn try_reserve(
        &self,
        code: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Consume one use of a voucher still reserved under `reservation_id`.
    /// `None` if that reservation no longer holds it.
    async fn complete_redemption(
        &self,
        code: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Voucher>, StoreError>;

    /// Compensating `Reserved -> Unused` for `reservation_id` only. Returns
    /// whether the reservation was released.
    async fn release_reservation(&self, code: &str, reservation_id: &str)
        -> Result<bool, StoreError>;

    /// Release every reservation taken at or before `cutoff`; returns the codes.
    async fn release_stale_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    async fn list(&self) -> Result<Vec<Voucher>, StoreError>;

    async fn count_by_state(&self) -> Result<HashMap<VoucherState, u64>, StoreError>;
}

/// Process-local store. Each `DashMap` entry guard is an exclusive per-key lock,
/// so redemptions of different codes never contend on the same guard.
#[derive(Default)]
pub struct InMemoryVoucherStore {
    vouchers: DashMap<String, Voucher>,
}

impl InMemoryVoucherStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoucherStore for InMemoryVoucherStore {
    async fn insert_many(&self, vouchers: &[Voucher]) -> Result<(), StoreError> {
        let mut inserted: Vec<&str> = Vec::with_capacity(vouchers.len());
        for voucher in vouchers {
            let vacant = match self.vouchers.entry(voucher.code.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(voucher.clone());
                    true
                }
                Entry::Occupied(_) => false,
            };
            if !vacant {
                // Undo this batch.
                for code in inserted {
                    self.vouchers.remove(code);
                }
                return Err(StoreError::Conflict(voucher.code.clone()));
            }
            inserted.push(&voucher.code);
        }
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
        Ok(self.vouchers.get(code).map(|v| v.clone()))
    }

    async fn try_reserve(
        &self,
        code: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StoreError> {
        let Some(mut voucher) = self.vouchers.get_mut(code) else {
            return Ok(ReserveOutcome::NotFound);
        };

        if voucher.is_reservable(now) {
            voucher.reserve(reservation_id, now);
            return Ok(ReserveOutcome::Reserved(voucher.clone()));
        }

        let outcome = match voucher.state {
            VoucherState::Unused if voucher.is_past_validity(now) => {
                voucher.state = VoucherState::Expired;
                ReserveOutcome::Expired
            }
            VoucherState::Expired => ReserveOutcome::Expired,
            _ => ReserveOutcome::AlreadyUsed,
        };
        Ok(outcome)
    }

    async fn complete_redemption(
        &self,
        code: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Voucher>, StoreError> {
        Ok(self.vouchers.get_mut(code).and_then(|mut voucher| {
            voucher.is_held_by(reservation_id).then(|| {
                voucher.apply_redemption(now);
                voucher.clone()
            })
        }))
    }

    async fn release_reservation(
        &self,
        code: &str,
        reservation_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.vouchers.get_mut(code).is_some_and(|mut voucher| {
            let held = voucher.is_held_by(reservation_id);
            if held {
                voucher.release();
            }
            held
        }))
    }

    async fn release_stale_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut released = Vec::new();
        for mut entry in self.vouchers.iter_mut() {
            let stale = entry.state == VoucherState::Reserved
                && entry.reserved_at.map_or(true, |at| at <= cutoff);
            if stale {
                entry.release();
                released.push(entry.code.clone());
            }
        }
        Ok(released)
    }

    async fn list(&self) -> Result<Vec<Voucher>, StoreError> {
        let mut vouchers: Vec<Voucher> = self.vouchers.iter().map(|v| v.clone()).collect();
        vouchers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.code.cmp(&b.code)));
        Ok(vouchers)
    }

    async fn count_by_state(&self) -> Result<HashMap<VoucherState, u64>, StoreError> {
        let mut counts = HashMap::new();
        for voucher in self.vouchers.iter() {
            *counts.entry(voucher.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[derive(Debug, FromRow)]
struct VoucherRow {
    code: String,
    state: String,
    max_uses: i32,
    uses_remaining: i32,
    duration_secs: i64,
    value: Decimal,
    valid_until: Option<DateTime<Utc>>,
    reserved_at: Option<DateTime<Utc>>,
    reservation_id: Option<String>,
    redeemed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<VoucherRow> for Voucher {
    type Error = StoreError;

    fn try_from(row: VoucherRow) -> Result<Self, Self::Error> {
        let state = VoucherState::from_string(&row.state).ok_or_else(|| {
            StoreError::Corrupt(format!("voucher {} has unknown state {}", row.code, row.state))
        })?;
        Ok(Voucher {
            code: row.code,
            state,
            max_uses: row.max_uses,
            uses_remaining: row.uses_remaining,
            duration_secs: row.duration_secs,
            value: row.value,
            valid_until: row.valid_until,
            reserved_at: row.reserved_at,
            reservation_id: row.reservation_id,
            redeemed_at: row.redeemed_at,
            created_at: row.created_at,
        })
    }
}

const VOUCHER_COLUMNS: &str = "code, state, max_uses, uses_remaining, duration_secs, value, \
     valid_until, reserved_at, reservation_id, redeemed_at, created_at";

/// PostgreSQL store; every transition is one conditional `UPDATE`.
#[derive(Clone)]
pub struct PgVoucherStore {
    pool: PgPool,
}

impl PgVoucherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoucherStore for PgVoucherStore {
    #[instrument(skip(self, vouchers), fields(count = vouchers.len()))]
    async fn insert_many(&self, vouchers: &[Voucher]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for voucher in vouchers {
            sqlx::query(
                r#"
                INSERT INTO vouchers (code, state, max_uses, uses_remaining, duration_secs, value, valid_until, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&voucher.code)
            .bind(voucher.state.as_str())
            .bind(voucher.max_uses)
            .bind(voucher.uses_remaining)
            .bind(voucher.duration_secs)
            .bind(voucher.value)
            .bind(voucher.valid_until)
            .bind(voucher.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    StoreError::Conflict(voucher.code.clone())
                }
                other => StoreError::Database(other),
            })?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
        let row = sqlx::query_as::<_, VoucherRow>(&format!(
            "SELECT {} FROM vouchers WHERE code = $1",
            VOUCHER_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Voucher::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn try_reserve(
        &self,
        code: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StoreError> {
        let reserved = sqlx::query_as::<_, VoucherRow>(&format!(
            r#"
            UPDATE vouchers
            SET state = 'reserved', reserved_at = $2, reservation_id = $3
            WHERE code = $1
              AND state = 'unused'
              AND uses_remaining > 0
              AND (valid_until IS NULL OR valid_until > $2)
            RETURNING {}
            "#,
            VOUCHER_COLUMNS
        ))
        .bind(code)
        .bind(now)
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = reserved {
            return Ok(ReserveOutcome::Reserved(row.try_into()?));
        }

        let expired = sqlx::query(
            r#"
            UPDATE vouchers
            SET state = 'expired'
            WHERE code = $1 AND state = 'unused' AND valid_until IS NOT NULL AND valid_until <= $2
            "#,
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if expired.rows_affected() > 0 {
            return Ok(ReserveOutcome::Expired);
        }

        Ok(match self.get(code).await? {
            None => ReserveOutcome::NotFound,
            Some(v) if v.state == VoucherState::Expired => ReserveOutcome::Expired,
            Some(_) => ReserveOutcome::AlreadyUsed,
        })
    }

    async fn complete_redemption(
        &self,
        code: &str,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Voucher>, StoreError> {
        let row = sqlx::query_as::<_, VoucherRow>(&format!(
            r#"
            UPDATE vouchers
            SET uses_remaining = GREATEST(uses_remaining - 1, 0),
                state = CASE WHEN uses_remaining - 1 > 0 THEN 'unused' ELSE 'redeemed' END,
                reserved_at = NULL,
                reservation_id = NULL,
                redeemed_at = $2
            WHERE code = $1 AND state = 'reserved' AND reservation_id = $3
            RETURNING {}
            "#,
            VOUCHER_COLUMNS
        ))
        .bind(code)
        .bind(now)
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Voucher::try_from).transpose()
    }

    async fn release_reservation(
        &self,
        code: &str,
        reservation_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET state = 'unused', reserved_at = NULL, reservation_id = NULL
            WHERE code = $1 AND state = 'reserved' AND reservation_id = $2
            "#,
        )
        .bind(code)
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_stale_reservations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let codes: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE vouchers
            SET state = 'unused', reserved_at = NULL, reservation_id = NULL
            WHERE state = 'reserved' AND (reserved_at IS NULL OR reserved_at <= $1)
            RETURNING code
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes.into_iter().map(|(code,)| code).collect())
    }

    async fn list(&self) -> Result<Vec<Voucher>, StoreError> {
        let rows = sqlx::query_as::<_, VoucherRow>(&format!(
            "SELECT {} FROM vouchers ORDER BY created_at DESC, code",
            VOUCHER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Voucher::try_from).collect()
    }

    async fn count_by_state(&self) -> Result<HashMap<VoucherState, u64>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM vouchers GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            let state = VoucherState::from_string(&state)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown voucher state {}", state)))?;
            counts.insert(state, count.max(0) as u64);
        }
        Ok(counts)
    }
}
