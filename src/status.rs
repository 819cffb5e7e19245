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

//! Agreement status and rate mode.
//!
//! Agreements follow a state machine:
//! - [`PendingSignature`] → [`Active`] (payee signs)
//! - [`Active`] → [`PendingTermination`] (payer requests termination)
//! - [`PendingTermination`] → [`Terminated`] (payee approves)
//! - [`Active`] ⇢ [`Expired`] (time passes the expiry, derived on read)
//! - [`Expired`] → [`Active`] (payer extends the expiry)
//!
//! [`Expired`] is never stored. It is computed by [`AgreementStatus::effective`]
//! from the stored status, the expiry and the current time.
//!
//! [`PendingSignature`]: AgreementStatus::PendingSignature
//! [`Active`]: AgreementStatus::Active
//! [`Expired`]: AgreementStatus::Expired
//! [`PendingTermination`]: AgreementStatus::PendingTermination
//! [`Terminated`]: AgreementStatus::Terminated

use crate::base::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a payee's claims are priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMode {
    /// Claims are hours worked, multiplied by the hourly rate.
    HourlyRate,
    /// Claims are raw amounts against a fixed project price.
    FixedRate,
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateMode::HourlyRate => write!(f, "hourly"),
            RateMode::FixedRate => write!(f, "fixed"),
        }
    }
}

impl FromStr for RateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" | "hourly_rate" => Ok(RateMode::HourlyRate),
            "fixed" | "fixed_rate" | "project" => Ok(RateMode::FixedRate),
            other => Err(format!("unknown rate mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    PendingSignature,
    Active,
    Expired,
    PendingTermination,
    Terminated,
}

impl AgreementStatus {
    pub const ALL: [AgreementStatus; 5] = [
        AgreementStatus::PendingSignature,
        AgreementStatus::Active,
        AgreementStatus::Expired,
        AgreementStatus::PendingTermination,
        AgreementStatus::Terminated,
    ];

    /// Status as observed at `now`.
    ///
    /// A stored `Active` past its expiry reads as `Expired`; every other
    /// stored status reads as itself.
    pub fn effective(self, expiry: Timestamp, now: Timestamp) -> Self {
        match self {
            AgreementStatus::Active if now > expiry => AgreementStatus::Expired,
            other => other,
        }
    }
}

impl fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgreementStatus::PendingSignature => "pending_signature",
            AgreementStatus::Active => "active",
            AgreementStatus::Expired => "expired",
            AgreementStatus::PendingTermination => "pending_termination",
            AgreementStatus::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
