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

//! Value amounts.
//!
//! Balances are tracked as whole base units (the smallest indivisible unit of
//! the settlement currency). All arithmetic is checked; an overflow surfaces
//! as [`EscrowError::InvalidAmount`] instead of wrapping.
//!
//! [`Denomination`] converts between base units and the human-facing decimal
//! notation, e.g. `"3.5"` whole units with 18 decimals.
//!
//! # Example
//!
//! ```
//! use work_escrow_rs::{Amount, Denomination};
//!
//! let denom = Denomination::new(2).unwrap();
//! let amount = denom.parse("12.34").unwrap();
//! assert_eq!(amount, Amount(1234));
//! assert_eq!(denom.format(amount), "12.34");
//! ```

use crate::EscrowError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Non-negative amount in base units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Result<Amount, EscrowError> {
        self.0
            .checked_add(rhs.0)
            .map(Amount)
            .ok_or(EscrowError::InvalidAmount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Result<Amount, EscrowError> {
        self.0
            .checked_sub(rhs.0)
            .map(Amount)
            .ok_or(EscrowError::InsufficientFunds)
    }

    /// Multiplies by a unit count (e.g. hours worked times hourly rate).
    pub fn checked_mul(self, units: u128) -> Result<Amount, EscrowError> {
        self.0
            .checked_mul(units)
            .map(Amount)
            .ok_or(EscrowError::InvalidAmount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(value)
    }
}

/// Number of decimal places between a whole currency unit and a base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Denomination {
    decimals: u32,
}

impl Denomination {
    /// Largest scale a [`Decimal`] can represent.
    pub const MAX_DECIMALS: u32 = 28;

    /// Ether-style denomination: 18 decimals.
    pub const WEI: Denomination = Denomination { decimals: 18 };

    /// Returns `None` if `decimals` exceeds [`Self::MAX_DECIMALS`].
    pub fn new(decimals: u32) -> Option<Self> {
        (decimals <= Self::MAX_DECIMALS).then_some(Self { decimals })
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Parses a decimal string of whole units into base units.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidAmount`] if the string is not a decimal, is
    /// negative, has more fractional digits than the denomination allows, or
    /// does not fit in base units.
    pub fn parse(&self, input: &str) -> Result<Amount, EscrowError> {
        let value = Decimal::from_str(input.trim()).map_err(|_| EscrowError::InvalidAmount)?;
        self.from_decimal(value)
    }

    /// Converts a decimal number of whole units into base units.
    pub fn from_decimal(&self, value: Decimal) -> Result<Amount, EscrowError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }
        let value = value.normalize();
        if value.scale() > self.decimals {
            return Err(EscrowError::InvalidAmount);
        }
        let mantissa = u128::try_from(value.mantissa()).map_err(|_| EscrowError::InvalidAmount)?;
        let factor = 10u128
            .checked_pow(self.decimals - value.scale())
            .ok_or(EscrowError::InvalidAmount)?;
        Amount(mantissa).checked_mul(factor)
    }

    /// Converts base units into a decimal number of whole units.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidAmount`] if the amount exceeds the 96-bit
    /// mantissa of [`Decimal`].
    pub fn to_decimal(&self, amount: Amount) -> Result<Decimal, EscrowError> {
        let raw = i128::try_from(amount.0).map_err(|_| EscrowError::InvalidAmount)?;
        Decimal::try_from_i128_with_scale(raw, self.decimals)
            .map_err(|_| EscrowError::InvalidAmount)
    }

    /// Formats base units as whole units, falling back to the raw base-unit
    /// count when the value is too large for [`Decimal`].
    pub fn format(&self, amount: Amount) -> String {
        match self.to_decimal(amount) {
            Ok(value) => value.normalize().to_string(),
            Err(_) => format!("{}e-{}", amount.0, self.decimals),
        }
    }
}

impl Default for Denomination {
    fn default() -> Self {
        Self::WEI
    }
}

impl TryFrom<u32> for Denomination {
    type Error = String;

    fn try_from(decimals: u32) -> Result<Self, Self::Error> {
        Denomination::new(decimals).ok_or_else(|| {
            format!(
                "decimals must be at most {}, got {}",
                Denomination::MAX_DECIMALS,
                decimals
            )
        })
    }
}

impl From<Denomination> for u32 {
    fn from(denomination: Denomination) -> Self {
        denomination.decimals
    }
}
