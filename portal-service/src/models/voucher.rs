//! Voucher model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Voucher lifecycle state.
///
/// A single redemption walks `Unused -> Reserved -> Redeemed`; a failed
/// billing confirmation rolls `Reserved` back to `Unused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherState {
    Unused,
    Reserved,
    Redeemed,
    Expired,
}

impl VoucherState {
    pub const ALL: [VoucherState; 4] = [
        VoucherState::Unused,
        VoucherState::Reserved,
        VoucherState::Redeemed,
        VoucherState::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherState::Unused => "unused",
            VoucherState::Reserved => "reserved",
            VoucherState::Redeemed => "redeemed",
            VoucherState::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "unused" => Some(VoucherState::Unused),
            "reserved" => Some(VoucherState::Reserved),
            "redeemed" => Some(VoucherState::Redeemed),
            "expired" => Some(VoucherState::Expired),
            _ => None,
        }
    }
}

/// A redeemable access code backed by the billing system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub code: String,
    pub state: VoucherState,
    pub max_uses: i32,
    pub uses_remaining: i32,
    /// Network access granted per redemption, in seconds.
    pub duration_secs: i64,
    pub value: Decimal,
    pub valid_until: Option<DateTime<Utc>>,
    pub reserved_at: Option<DateTime<Utc>>,
    /// Token of the redemption attempt holding the reservation.
    #[serde(skip)]
    pub reservation_id: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    /// Create a fresh single-use voucher.
    pub fn new(code: &str, duration: Duration, value: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            code: Self::normalize_code(code),
            state: VoucherState::Unused,
            max_uses: 1,
            uses_remaining: 1,
            duration_secs: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            value,
            valid_until: None,
            reserved_at: None,
            reservation_id: None,
            redeemed_at: None,
            created_at: now,
        }
    }

    pub fn with_max_uses(mut self, max_uses: i32) -> Self {
        let max_uses = max_uses.max(1);
        self.max_uses = max_uses;
        self.uses_remaining = max_uses;
        self
    }

    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    /// Codes are compared trimmed and case-folded.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.max(0) as u64)
    }

    pub fn is_past_validity(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| now >= until)
    }

    /// Whether a new redemption attempt may reserve this voucher.
    pub fn is_reservable(&self, now: DateTime<Utc>) -> bool {
        self.state == VoucherState::Unused && self.uses_remaining > 0 && !self.is_past_validity(now)
    }

    pub fn reserve(&mut self, reservation_id: &str, now: DateTime<Utc>) {
        self.state = VoucherState::Reserved;
        self.reserved_at = Some(now);
        self.reservation_id = Some(reservation_id.to_string());
    }

    /// Whether the current reservation belongs to `reservation_id`.
    pub fn is_held_by(&self, reservation_id: &str) -> bool {
        self.state == VoucherState::Reserved && self.reservation_id.as_deref() == Some(reservation_id)
    }

    pub fn release(&mut self) {
        self.state = VoucherState::Unused;
        self.reserved_at = None;
        self.reservation_id = None;
    }

    /// Apply a confirmed redemption: one use is spent, and the voucher becomes
    /// terminal once no uses remain.
    pub fn apply_redemption(&mut self, now: DateTime<Utc>) {
        self.uses_remaining = (self.uses_remaining - 1).max(0);
        self.reserved_at = None;
        self.reservation_id = None;
        self.redeemed_at = Some(now);
        self.state = if self.uses_remaining > 0 {
            VoucherState::Unused
        } else {
            VoucherState::Redeemed
        };
    }
}
