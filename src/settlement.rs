// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Outbound value transfers.
//!
//! The engine decides whether and how much to pay out; a [`Settlement`]
//! implementation moves the value. Agreements call [`Settlement::transfer`]
//! while holding their write lock and commit the balance debit only when the
//! transfer returns `Ok`, so a rejected payout never changes internal state.

use crate::EscrowError;
use crate::amount::Amount;
use crate::base::{AgreementId, Identity};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;

/// A payout the engine has authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub agreement_id: AgreementId,
    pub to: Identity,
    pub amount: Amount,
}

/// Confirmation that the settlement layer executed a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementReceipt(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("settlement layer unavailable")]
    Unavailable,
}

impl From<SettlementError> for EscrowError {
    fn from(err: SettlementError) -> Self {
        EscrowError::SettlementFailed(err.to_string())
    }
}

/// External value-transfer network.
///
/// Implementations must return only after the transfer is final (or
/// definitively failed), and must bound their own waiting time.
pub trait Settlement: Send + Sync {
    fn transfer(&self, payout: &Payout) -> Result<SettlementReceipt, SettlementError>;
}

/// In-process settlement layer that records every confirmed payout.
///
/// Failures can be injected with [`InMemorySettlement::fail_next`] and
/// [`InMemorySettlement::set_offline`].
#[derive(Debug, Default)]
pub struct InMemorySettlement {
    /// Total paid out per recipient.
    paid: DashMap<Identity, Amount>,
    /// Confirmed payouts in execution order.
    log: Mutex<Vec<(SettlementReceipt, Payout)>>,
    next_receipt: AtomicU64,
    pending_failures: AtomicU32,
    offline: AtomicBool,
}

impl InMemorySettlement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next `count` transfers.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// While offline every transfer fails with [`SettlementError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total confirmed payouts to `identity`.
    pub fn paid_to(&self, identity: Identity) -> Amount {
        self.paid
            .get(&identity)
            .map(|amount| *amount)
            .unwrap_or(Amount::ZERO)
    }

    /// Confirmed payouts in execution order.
    pub fn payouts(&self) -> Vec<Payout> {
        self.log.lock().iter().map(|(_, payout)| *payout).collect()
    }
}

impl Settlement for InMemorySettlement {
    fn transfer(&self, payout: &Payout) -> Result<SettlementReceipt, SettlementError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SettlementError::Unavailable);
        }
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(SettlementError::Rejected("injected failure".into()));
        }

        let mut total = self.paid.entry(payout.to).or_insert(Amount::ZERO);
        let updated = total
            .checked_add(payout.amount)
            .map_err(|_| SettlementError::Rejected("recipient balance overflow".into()))?;
        *total = updated;
        drop(total);

        let receipt = SettlementReceipt(self.next_receipt.fetch_add(1, Ordering::SeqCst) + 1);
        self.log.lock().push((receipt, *payout));
        Ok(receipt)
    }
}
