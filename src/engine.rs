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

//! Escrow engine.
//!
//! The [`Engine`] is the boundary a front end talks to. It owns the
//! [`Registry`], the [`DepositLog`], a [`Clock`] and a [`Settlement`] layer,
//! and routes every `(agreement, caller, ...)` call to the right agreement.
//!
//! # Operations
//!
//! - **Create**: register a new agreement with the caller as payer.
//! - **Deposit**: credit an incoming transfer signaled by the settlement layer.
//! - **Actions**: sign, claim, approve, withdraw, terminate, extend expiry.
//! - **Queries**: snapshots, status, history, and per-identity listings.
//!
//! # Thread Safety
//!
//! Agreements are looked up through the registry and the map guard is
//! dropped before the agreement is locked. Operations on different
//! agreements run in parallel; operations on one agreement are serialized.
//! Deposits lock the agreement first and the deposit log shard second, so a
//! payout in progress on one agreement never holds up deposits to another.

use crate::action::Action;
use crate::agreement::{AgreementSnapshot, AgreementTerms, Balances};
use crate::amount::Amount;
use crate::base::{AgreementId, Identity, Timestamp};
use crate::clock::Clock;
use crate::deposit_log::{DepositEvent, DepositLog};
use crate::event::AgreementEvent;
use crate::registry::Registry;
use crate::settlement::Settlement;
use crate::status::AgreementStatus;
use crate::{Agreement, EscrowError};
use std::sync::Arc;

/// Escrow engine managing every agreement.
pub struct Engine {
    registry: Registry,
    deposits: DepositLog,
    clock: Arc<dyn Clock>,
    settlement: Arc<dyn Settlement>,
}

impl Engine {
    /// Creates an engine with no agreements.
    pub fn new(admin: Identity, clock: Arc<dyn Clock>, settlement: Arc<dyn Settlement>) -> Self {
        Engine {
            registry: Registry::new(admin),
            deposits: DepositLog::new(),
            clock,
            settlement,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn lookup(&self, id: AgreementId) -> Result<Arc<Agreement>, EscrowError> {
        self.registry.get(&id).ok_or(EscrowError::AgreementNotFound)
    }

    /// Creates an agreement with `caller` as payer.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidExpiry`] - expiry is not in the future.
    /// - [`EscrowError::InvalidRate`] - rates do not match the rate mode.
    pub fn create_agreement(
        &self,
        caller: Identity,
        terms: AgreementTerms,
    ) -> Result<AgreementId, EscrowError> {
        self.registry.create_agreement(caller, terms, self.now())
    }

    /// Returns every field of the agreement as observed now.
    pub fn agreement(&self, id: AgreementId) -> Result<AgreementSnapshot, EscrowError> {
        Ok(self.lookup(id)?.snapshot(self.now()))
    }

    pub fn status(&self, id: AgreementId) -> Result<AgreementStatus, EscrowError> {
        Ok(self.lookup(id)?.status(self.now()))
    }

    pub fn history(&self, id: AgreementId) -> Result<Vec<AgreementEvent>, EscrowError> {
        Ok(self.lookup(id)?.history())
    }

    pub fn list_as_payer(&self, identity: Identity) -> Vec<AgreementId> {
        self.registry.list_as_payer(&identity)
    }

    pub fn list_as_payee(&self, identity: Identity) -> Vec<AgreementId> {
        self.registry.list_as_payee(&identity)
    }

    /// Snapshots of every agreement ordered by ID.
    pub fn snapshots(&self) -> Vec<AgreementSnapshot> {
        let now = self.now();
        self.registry
            .agreements()
            .iter()
            .map(|agreement| agreement.snapshot(now))
            .collect()
    }

    /// Credits an incoming transfer to the agreement's escrow.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::AgreementNotFound`] - unknown agreement.
    /// - [`EscrowError::DuplicateTransfer`] - transfer already credited.
    /// - [`EscrowError::PermissionDenied`] - sender is not the payer.
    /// - [`EscrowError::InvalidState`] - agreement is terminated.
    /// - [`EscrowError::InvalidAmount`] - zero amount or overflow.
    pub fn deposit(&self, event: DepositEvent) -> Result<Balances, EscrowError> {
        let agreement = self.lookup(event.agreement_id)?;
        agreement.deposit_transfer(event, &self.deposits, self.now())
    }

    /// Deposits credited since the last call, in credit order.
    pub fn take_credited_deposits(&self) -> Vec<DepositEvent> {
        self.deposits.take_credited()
    }

    /// Runs `action` on behalf of `caller`.
    ///
    /// See [`Agreement::apply`] for the error contract; additionally returns
    /// [`EscrowError::AgreementNotFound`] for an unknown agreement.
    pub fn execute(
        &self,
        id: AgreementId,
        caller: Identity,
        action: Action,
    ) -> Result<Balances, EscrowError> {
        let agreement = self.lookup(id)?;
        agreement.apply(caller, action, self.now(), self.settlement.as_ref())
    }

    pub fn sign(&self, id: AgreementId, caller: Identity) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::Sign)
    }

    pub fn add_claim(
        &self,
        id: AgreementId,
        caller: Identity,
        units: u128,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::AddClaim { units })
    }

    pub fn approve_claim(
        &self,
        id: AgreementId,
        caller: Identity,
        amount: Amount,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::ApproveClaim { amount })
    }

    pub fn withdraw(
        &self,
        id: AgreementId,
        caller: Identity,
        amount: Amount,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::Withdraw { amount })
    }

    pub fn request_termination(
        &self,
        id: AgreementId,
        caller: Identity,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::RequestTermination)
    }

    pub fn approve_termination(
        &self,
        id: AgreementId,
        caller: Identity,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::ApproveTermination)
    }

    pub fn withdraw_remaining_fund(
        &self,
        id: AgreementId,
        caller: Identity,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::WithdrawRemainingFund)
    }

    pub fn extend_expiry(
        &self,
        id: AgreementId,
        caller: Identity,
        new_expiry: Timestamp,
    ) -> Result<Balances, EscrowError> {
        self.execute(id, caller, Action::ExtendExpiry { new_expiry })
    }
}
