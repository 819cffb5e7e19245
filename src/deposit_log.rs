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

//! Thread-safe log of credited deposits with deduplication.
//!
//! The settlement layer may deliver the same incoming-transfer signal more
//! than once. The log guarantees each [`TransferId`] is credited at most once
//! while keeping the order in which deposits were credited.

use crate::EscrowError;
use crate::amount::Amount;
use crate::base::{AgreementId, Identity, TransferId};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

/// Incoming value transfer signaled by the settlement layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    pub transfer_id: TransferId,
    pub agreement_id: AgreementId,
    pub sender: Identity,
    pub amount: Amount,
}

/// A thread-safe deposit log with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// to preserve credit order.
#[derive(Debug)]
pub struct DepositLog {
    /// Credited deposits by transfer ID.
    deposits: DashMap<TransferId, DepositEvent>,

    /// Transfer IDs in credit order, not yet taken by [`DepositLog::take_credited`].
    credited: SegQueue<TransferId>,
}

impl DepositLog {
    pub fn new() -> Self {
        Self {
            deposits: DashMap::new(),
            credited: SegQueue::new(),
        }
    }

    /// Runs `credit` for a deposit whose transfer ID has not been seen, and
    /// records the deposit only if `credit` succeeds.
    ///
    /// The map shard for the transfer ID stays locked while `credit` runs,
    /// so two deliveries of the same transfer cannot both credit. `credit`
    /// must not block: callers take any agreement lock before calling.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::DuplicateTransfer`] if the transfer ID was
    /// already credited, or whatever `credit` returns.
    pub fn record_with<T>(
        &self,
        event: DepositEvent,
        credit: impl FnOnce(&DepositEvent) -> Result<T, EscrowError>,
    ) -> Result<T, EscrowError> {
        match self.deposits.entry(event.transfer_id) {
            Entry::Occupied(_) => Err(EscrowError::DuplicateTransfer),
            Entry::Vacant(entry) => {
                let result = credit(&event)?;
                entry.insert(event);
                self.credited.push(event.transfer_id);
                Ok(result)
            }
        }
    }

    pub fn contains(&self, transfer_id: &TransferId) -> bool {
        self.deposits.contains_key(transfer_id)
    }

    pub fn get(&self, transfer_id: &TransferId) -> Option<DepositEvent> {
        self.deposits.get(transfer_id).map(|entry| *entry)
    }

    /// Number of deposits ever credited.
    pub fn len(&self) -> usize {
        self.deposits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty()
    }

    /// Drains deposits credited since the last call, in credit order.
    ///
    /// Deduplication is unaffected: drained transfer IDs are still rejected.
    pub fn take_credited(&self) -> Vec<DepositEvent> {
        let mut out = Vec::with_capacity(self.credited.len());
        while let Some(transfer_id) = self.credited.pop() {
            if let Some(event) = self.get(&transfer_id) {
                out.push(event);
            }
        }
        out
    }
}

impl Default for DepositLog {
    fn default() -> Self {
        Self::new()
    }
}
