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

//! Audit history entries.
//!
//! Every committed change to an agreement appends exactly one
//! [`AgreementEvent`]. Events are never removed or rewritten.

use crate::amount::Amount;
use crate::base::{Identity, Timestamp, TransferId};
use crate::settlement::SettlementReceipt;
use crate::status::RateMode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementEvent {
    pub at: Timestamp,
    pub actor: Identity,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created {
        expiry: Timestamp,
        rate_mode: RateMode,
        hourly_rate: Amount,
        fixed_rate: Amount,
    },
    Signed,
    Deposited {
        transfer_id: Option<TransferId>,
        amount: Amount,
    },
    ClaimAdded {
        units: u128,
        amount: Amount,
    },
    ClaimApproved {
        amount: Amount,
    },
    Withdrawn {
        amount: Amount,
        receipt: SettlementReceipt,
    },
    TerminationRequested,
    TerminationApproved,
    RemainderWithdrawn {
        amount: Amount,
        receipt: SettlementReceipt,
    },
    ExpiryExtended {
        from: Timestamp,
        to: Timestamp,
    },
}

impl EventKind {
    /// Value moved by this event, zero for pure status changes.
    pub fn amount(&self) -> Amount {
        match self {
            Self::Deposited { amount, .. }
            | Self::ClaimAdded { amount, .. }
            | Self::ClaimApproved { amount }
            | Self::Withdrawn { amount, .. }
            | Self::RemainderWithdrawn { amount, .. } => *amount,
            _ => Amount::ZERO,
        }
    }
}
