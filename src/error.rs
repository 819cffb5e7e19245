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

//! Error types for escrow operations.

use thiserror::Error;

/// Escrow operation errors.
///
/// Every failed operation leaves the agreement untouched: an error is only
/// ever returned before any balance or status change is committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Caller is not the role this operation requires
    #[error("caller is not permitted to perform this operation")]
    PermissionDenied,

    /// Operation is not valid in the agreement's current status
    #[error("operation not valid in the current agreement status")]
    InvalidState,

    /// Amount is zero, exceeds the outstanding claim, or overflows
    #[error("invalid amount")]
    InvalidAmount,

    /// Requested amount exceeds the balance it would be debited from
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Expiry is not in the future
    #[error("expiry must be in the future")]
    InvalidExpiry,

    /// Escrow balance is already zero
    #[error("nothing to withdraw")]
    NothingToWithdraw,

    /// Rate values do not match the rate mode
    #[error("rate does not match rate mode")]
    InvalidRate,

    /// Referenced agreement ID does not exist
    #[error("agreement not found")]
    AgreementNotFound,

    /// Incoming transfer was already credited
    #[error("duplicate transfer ID")]
    DuplicateTransfer,

    /// Settlement layer rejected an outbound transfer
    #[error("settlement failed: {0}")]
    SettlementFailed(String),
}
