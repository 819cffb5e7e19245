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

//! # Work Escrow
//!
//! This library provides an escrow engine for bilateral work agreements: a
//! payer deposits funds, the payee claims against them, and the payer
//! releases funds by approving claims.
//!
//! ## Core Components
//!
//! - [`Engine`]: Front-end boundary routing calls to agreements
//! - [`Registry`]: Creates agreements and indexes them by payer and payee
//! - [`Agreement`]: Per-agreement balance ledger and status machine
//! - [`Settlement`]: External layer that executes authorized payouts
//! - [`EscrowError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use work_escrow_rs::{
//!     AgreementTerms, Amount, DepositEvent, Engine, Identity, InMemorySettlement, ManualClock,
//!     Timestamp, TransferId,
//! };
//!
//! let (payer, payee) = (Identity(1), Identity(2));
//! let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
//! let engine = Engine::new(Identity(0), clock, Arc::new(InMemorySettlement::new()));
//!
//! let terms = AgreementTerms::hourly(payee, Timestamp(10_000), Amount(3));
//! let id = engine.create_agreement(payer, terms).unwrap();
//! engine.sign(id, payee).unwrap();
//! engine
//!     .deposit(DepositEvent {
//!         transfer_id: TransferId(1),
//!         agreement_id: id,
//!         sender: payer,
//!         amount: Amount(100),
//!     })
//!     .unwrap();
//!
//! engine.add_claim(id, payee, 6).unwrap();
//! let balances = engine.approve_claim(id, payer, Amount(18)).unwrap();
//! assert_eq!(balances.escrow_balance, Amount(82));
//! assert_eq!(balances.employee_balance, Amount(18));
//! ```
//!
//! ## Thread Safety
//!
//! Each agreement serializes its own mutations behind a lock; different
//! agreements are processed in parallel.

mod action;
pub mod agreement;
mod amount;
mod base;
mod clock;
pub mod config;
mod deposit_log;
mod engine;
pub mod error;
mod event;
mod registry;
pub mod settlement;
mod status;

pub use action::{Action, Role};
pub use agreement::{Agreement, AgreementSnapshot, AgreementTerms, Balances};
pub use amount::{Amount, Denomination};
pub use base::{AgreementId, Identity, Timestamp, TransferId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use deposit_log::{DepositEvent, DepositLog};
pub use engine::Engine;
pub use error::EscrowError;
pub use event::{AgreementEvent, EventKind};
pub use registry::Registry;
pub use settlement::{InMemorySettlement, Payout, Settlement, SettlementError, SettlementReceipt};
pub use status::{AgreementStatus, RateMode};
