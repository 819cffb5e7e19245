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

//! Participant actions on an agreement.
//!
//! | Action | Caller | Valid status |
//! |--------|--------|--------------|
//! | [`Sign`] | payee | pending signature |
//! | [`AddClaim`] | payee | active |
//! | [`ApproveClaim`] | payer | active |
//! | [`Withdraw`] | payee | any |
//! | [`RequestTermination`] | payer | active |
//! | [`ApproveTermination`] | payee | pending termination |
//! | [`WithdrawRemainingFund`] | payer | expired, terminated |
//! | [`ExtendExpiry`] | payer | expired |
//!
//! Deposits are not actions: they arrive from the settlement layer as
//! [`DepositEvent`](crate::DepositEvent)s.
//!
//! [`Sign`]: Action::Sign
//! [`AddClaim`]: Action::AddClaim
//! [`ApproveClaim`]: Action::ApproveClaim
//! [`Withdraw`]: Action::Withdraw
//! [`RequestTermination`]: Action::RequestTermination
//! [`ApproveTermination`]: Action::ApproveTermination
//! [`WithdrawRemainingFund`]: Action::WithdrawRemainingFund
//! [`ExtendExpiry`]: Action::ExtendExpiry

use crate::amount::Amount;
use crate::base::Timestamp;
use crate::status::AgreementStatus;
use serde::{Deserialize, Serialize};

/// Which participant an action must come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Payer,
    Payee,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Sign,
    /// Hours worked for hourly agreements, a raw amount for fixed-rate ones.
    AddClaim {
        units: u128,
    },
    ApproveClaim {
        amount: Amount,
    },
    Withdraw {
        amount: Amount,
    },
    RequestTermination,
    ApproveTermination,
    WithdrawRemainingFund,
    ExtendExpiry {
        new_expiry: Timestamp,
    },
}

impl Action {
    pub fn role(&self) -> Role {
        match self {
            Self::Sign => Role::Payee,
            Self::AddClaim { .. } => Role::Payee,
            Self::ApproveClaim { .. } => Role::Payer,
            Self::Withdraw { .. } => Role::Payee,
            Self::RequestTermination => Role::Payer,
            Self::ApproveTermination => Role::Payee,
            Self::WithdrawRemainingFund => Role::Payer,
            Self::ExtendExpiry { .. } => Role::Payer,
        }
    }

    /// Whether the action may run while the agreement reads as `status`.
    pub fn allowed_in(&self, status: AgreementStatus) -> bool {
        use AgreementStatus::*;
        match self {
            Self::Sign => status == PendingSignature,
            Self::AddClaim { .. } | Self::ApproveClaim { .. } => status == Active,
            Self::Withdraw { .. } => true,
            Self::RequestTermination => status == Active,
            Self::ApproveTermination => status == PendingTermination,
            Self::WithdrawRemainingFund => matches!(status, Expired | Terminated),
            Self::ExtendExpiry { .. } => status == Expired,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sign => "sign",
            Self::AddClaim { .. } => "add_claim",
            Self::ApproveClaim { .. } => "approve_claim",
            Self::Withdraw { .. } => "withdraw",
            Self::RequestTermination => "request_termination",
            Self::ApproveTermination => "approve_termination",
            Self::WithdrawRemainingFund => "withdraw_remaining_fund",
            Self::ExtendExpiry { .. } => "extend_expiry",
        }
    }
}
