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

//! Escrow agreement between one payer and one payee.
//!
//! An [`Agreement`] owns the balance ledger and the [`AgreementStatus`]
//! machine. Every operation checks, in order, the caller's role,
//! the status as observed at `now`, the amount, and finally the balance it
//! would debit. Nothing is written until all checks pass.
//!
//! # Conservation
//!
//! After every operation:
//!
//! ```text
//! escrow + employee + withdrawn_by_payee + withdrawn_by_payer == deposited
//! ```
//!
//! # Example
//!
//! ```
//! use work_escrow_rs::{Agreement, AgreementId, AgreementTerms, Amount, Identity, Timestamp};
//!
//! let now = Timestamp(1_000);
//! let terms = AgreementTerms::hourly(Identity(2), Timestamp(2_000), Amount(3));
//! let agreement = Agreement::new(AgreementId(1), Identity(1), terms, now).unwrap();
//! agreement.sign(Identity(2), now).unwrap();
//! agreement.deposit(Identity(1), Amount(100), None, now).unwrap();
//! let balances = agreement.add_claim(Identity(2), 6, now).unwrap();
//! assert_eq!(balances.claim_value, Amount(18));
//! ```

use crate::EscrowError;
use crate::action::{Action, Role};
use crate::amount::Amount;
use crate::base::{AgreementId, Identity, Timestamp, TransferId};
use crate::deposit_log::{DepositEvent, DepositLog};
use crate::event::{AgreementEvent, EventKind};
use crate::settlement::{Payout, Settlement, SettlementError, SettlementReceipt};
use crate::status::{AgreementStatus, RateMode};
use parking_lot::RwLock;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Parameters the payer chooses when creating an agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementTerms {
    pub payee: Identity,
    pub expiry: Timestamp,
    pub rate_mode: RateMode,
    pub hourly_rate: Amount,
    pub fixed_rate: Amount,
}

impl AgreementTerms {
    pub fn hourly(payee: Identity, expiry: Timestamp, hourly_rate: Amount) -> Self {
        Self {
            payee,
            expiry,
            rate_mode: RateMode::HourlyRate,
            hourly_rate,
            fixed_rate: Amount::ZERO,
        }
    }

    pub fn fixed(payee: Identity, expiry: Timestamp, fixed_rate: Amount) -> Self {
        Self {
            payee,
            expiry,
            rate_mode: RateMode::FixedRate,
            hourly_rate: Amount::ZERO,
            fixed_rate,
        }
    }

    /// Checks that the expiry is in the future and that exactly the rate
    /// matching `rate_mode` is non-zero.
    pub fn validate(&self, now: Timestamp) -> Result<(), EscrowError> {
        if self.expiry <= now {
            return Err(EscrowError::InvalidExpiry);
        }
        let (applicable, other) = match self.rate_mode {
            RateMode::HourlyRate => (self.hourly_rate, self.fixed_rate),
            RateMode::FixedRate => (self.fixed_rate, self.hourly_rate),
        };
        if applicable.is_zero() || !other.is_zero() {
            return Err(EscrowError::InvalidRate);
        }
        Ok(())
    }
}

/// Balances and status returned by every mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub escrow_balance: Amount,
    pub employee_balance: Amount,
    pub total_paid: Amount,
    pub claim_value: Amount,
    pub status: AgreementStatus,
}

/// Point-in-time view of every agreement field.
///
/// `status` is the status observed at the time the snapshot was taken, so an
/// active agreement past its expiry shows as expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementSnapshot {
    pub id: AgreementId,
    pub payer: Identity,
    pub payee: Identity,
    pub expiry: Timestamp,
    pub rate_mode: RateMode,
    pub hourly_rate: Amount,
    pub fixed_rate: Amount,
    pub escrow_balance: Amount,
    pub employee_balance: Amount,
    pub total_paid: Amount,
    pub claim_value: Amount,
    pub status: AgreementStatus,
    pub total_deposited: Amount,
    pub total_withdrawn_by_payee: Amount,
    pub total_withdrawn_by_payer: Amount,
}

#[derive(Debug)]
struct AgreementData {
    id: AgreementId,
    payer: Identity,
    payee: Identity,
    expiry: Timestamp,
    rate_mode: RateMode,
    hourly_rate: Amount,
    fixed_rate: Amount,
    escrow_balance: Amount,
    employee_balance: Amount,
    total_paid: Amount,
    claim_value: Amount,
    /// Stored status; never `Expired`.
    status: AgreementStatus,
    total_deposited: Amount,
    total_withdrawn_by_payee: Amount,
    total_withdrawn_by_payer: Amount,
    history: Vec<AgreementEvent>,
}

impl AgreementData {
    fn new(id: AgreementId, payer: Identity, terms: AgreementTerms, now: Timestamp) -> Self {
        let mut data = Self {
            id,
            payer,
            payee: terms.payee,
            expiry: terms.expiry,
            rate_mode: terms.rate_mode,
            hourly_rate: terms.hourly_rate,
            fixed_rate: terms.fixed_rate,
            escrow_balance: Amount::ZERO,
            employee_balance: Amount::ZERO,
            total_paid: Amount::ZERO,
            claim_value: Amount::ZERO,
            status: AgreementStatus::PendingSignature,
            total_deposited: Amount::ZERO,
            total_withdrawn_by_payee: Amount::ZERO,
            total_withdrawn_by_payer: Amount::ZERO,
            history: Vec::new(),
        };
        data.record(
            now,
            payer,
            EventKind::Created {
                expiry: terms.expiry,
                rate_mode: terms.rate_mode,
                hourly_rate: terms.hourly_rate,
                fixed_rate: terms.fixed_rate,
            },
        );
        data
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.status != AgreementStatus::Expired,
            "Invariant violated: expired status was stored"
        );
        debug_assert_eq!(
            self.escrow_balance.0
                + self.employee_balance.0
                + self.total_withdrawn_by_payee.0
                + self.total_withdrawn_by_payer.0,
            self.total_deposited.0,
            "Invariant violated: funds not conserved"
        );
        debug_assert!(
            self.total_paid.0 >= self.employee_balance.0,
            "Invariant violated: payee holds more than was ever approved"
        );
    }

    fn status(&self, now: Timestamp) -> AgreementStatus {
        self.status.effective(self.expiry, now)
    }

    fn balances(&self, now: Timestamp) -> Balances {
        Balances {
            escrow_balance: self.escrow_balance,
            employee_balance: self.employee_balance,
            total_paid: self.total_paid,
            claim_value: self.claim_value,
            status: self.status(now),
        }
    }

    fn snapshot(&self, now: Timestamp) -> AgreementSnapshot {
        AgreementSnapshot {
            id: self.id,
            payer: self.payer,
            payee: self.payee,
            expiry: self.expiry,
            rate_mode: self.rate_mode,
            hourly_rate: self.hourly_rate,
            fixed_rate: self.fixed_rate,
            escrow_balance: self.escrow_balance,
            employee_balance: self.employee_balance,
            total_paid: self.total_paid,
            claim_value: self.claim_value,
            status: self.status(now),
            total_deposited: self.total_deposited,
            total_withdrawn_by_payee: self.total_withdrawn_by_payee,
            total_withdrawn_by_payer: self.total_withdrawn_by_payer,
        }
    }

    fn record(&mut self, at: Timestamp, actor: Identity, kind: EventKind) {
        self.history.push(AgreementEvent { at, actor, kind });
    }

    fn holds_role(&self, caller: Identity, role: Role) -> bool {
        match role {
            Role::Payer => caller == self.payer,
            Role::Payee => caller == self.payee,
        }
    }

    /// Role first, then status.
    fn authorize(
        &self,
        caller: Identity,
        action: &Action,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if !self.holds_role(caller, action.role()) {
            return Err(EscrowError::PermissionDenied);
        }
        if !action.allowed_in(self.status(now)) {
            return Err(EscrowError::InvalidState);
        }
        Ok(())
    }

    /// Credits escrow from an incoming transfer.
    fn deposit(
        &mut self,
        sender: Identity,
        amount: Amount,
        transfer_id: Option<TransferId>,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if sender != self.payer {
            return Err(EscrowError::PermissionDenied);
        }
        if self.status == AgreementStatus::Terminated {
            return Err(EscrowError::InvalidState);
        }
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }
        let escrow = self.escrow_balance.checked_add(amount)?;
        let deposited = self.total_deposited.checked_add(amount)?;

        self.escrow_balance = escrow;
        self.total_deposited = deposited;
        self.record(now, sender, EventKind::Deposited { transfer_id, amount });
        self.assert_invariants();
        Ok(())
    }

    fn apply(
        &mut self,
        caller: Identity,
        action: Action,
        now: Timestamp,
        settlement: &dyn Settlement,
    ) -> Result<(), EscrowError> {
        self.authorize(caller, &action, now)?;

        match action {
            Action::Sign => {
                self.status = AgreementStatus::Active;
                self.record(now, caller, EventKind::Signed);
            }
            Action::AddClaim { units } => self.add_claim(caller, units, now)?,
            Action::ApproveClaim { amount } => self.approve_claim(caller, amount, now)?,
            Action::Withdraw { amount } => self.withdraw(caller, amount, now, settlement)?,
            Action::RequestTermination => {
                self.status = AgreementStatus::PendingTermination;
                self.record(now, caller, EventKind::TerminationRequested);
            }
            Action::ApproveTermination => {
                self.status = AgreementStatus::Terminated;
                self.record(now, caller, EventKind::TerminationApproved);
            }
            Action::WithdrawRemainingFund => {
                self.withdraw_remaining_fund(caller, now, settlement)?
            }
            Action::ExtendExpiry { new_expiry } => {
                if new_expiry <= now {
                    return Err(EscrowError::InvalidExpiry);
                }
                let from = self.expiry;
                self.expiry = new_expiry;
                self.record(
                    now,
                    caller,
                    EventKind::ExpiryExtended {
                        from,
                        to: new_expiry,
                    },
                );
            }
        }

        self.assert_invariants();
        Ok(())
    }

    /// Adds to the outstanding claim. Not capped by escrow here; the cap
    /// applies at approval.
    fn add_claim(
        &mut self,
        caller: Identity,
        units: u128,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if units == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let amount = match self.rate_mode {
            RateMode::HourlyRate => self.hourly_rate.checked_mul(units)?,
            RateMode::FixedRate => Amount(units),
        };
        let claim = self.claim_value.checked_add(amount)?;

        self.claim_value = claim;
        self.record(now, caller, EventKind::ClaimAdded { units, amount });
        Ok(())
    }

    /// Moves funds from escrow to the payee balance.
    fn approve_claim(
        &mut self,
        caller: Identity,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if amount.is_zero() || amount > self.claim_value {
            return Err(EscrowError::InvalidAmount);
        }
        if amount > self.escrow_balance {
            return Err(EscrowError::InsufficientFunds);
        }
        let claim = self.claim_value.checked_sub(amount)?;
        let escrow = self.escrow_balance.checked_sub(amount)?;
        let employee = self.employee_balance.checked_add(amount)?;
        let paid = self.total_paid.checked_add(amount)?;

        self.claim_value = claim;
        self.escrow_balance = escrow;
        self.employee_balance = employee;
        self.total_paid = paid;
        self.record(now, caller, EventKind::ClaimApproved { amount });
        Ok(())
    }

    /// Pays out part of the payee balance. Debited only on confirmed transfer.
    fn withdraw(
        &mut self,
        caller: Identity,
        amount: Amount,
        now: Timestamp,
        settlement: &dyn Settlement,
    ) -> Result<(), EscrowError> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }
        let employee = self.employee_balance.checked_sub(amount)?;
        let withdrawn = self.total_withdrawn_by_payee.checked_add(amount)?;

        let receipt = self.settle(self.payee, amount, settlement)?;

        self.employee_balance = employee;
        self.total_withdrawn_by_payee = withdrawn;
        self.record(now, caller, EventKind::Withdrawn { amount, receipt });
        Ok(())
    }

    /// Returns the whole escrow balance to the payer.
    fn withdraw_remaining_fund(
        &mut self,
        caller: Identity,
        now: Timestamp,
        settlement: &dyn Settlement,
    ) -> Result<(), EscrowError> {
        let amount = self.escrow_balance;
        if amount.is_zero() {
            return Err(EscrowError::NothingToWithdraw);
        }
        let withdrawn = self.total_withdrawn_by_payer.checked_add(amount)?;

        let receipt = self.settle(self.payer, amount, settlement)?;

        self.escrow_balance = Amount::ZERO;
        self.total_withdrawn_by_payer = withdrawn;
        self.record(now, caller, EventKind::RemainderWithdrawn { amount, receipt });
        Ok(())
    }

    fn settle(
        &self,
        to: Identity,
        amount: Amount,
        settlement: &dyn Settlement,
    ) -> Result<SettlementReceipt, EscrowError> {
        let payout = Payout {
            agreement_id: self.id,
            to,
            amount,
        };
        settlement.transfer(&payout).map_err(|err| {
            warn!(agreement = %self.id, to = %to, amount = %amount, error = %err, "payout rejected");
            EscrowError::from(err)
        })
    }
}

/// Escrow agreement.
///
/// All state sits behind one [`RwLock`]: mutations hold the write lock from
/// validation through settlement to commit, queries share the read lock.
#[derive(Debug)]
pub struct Agreement {
    inner: RwLock<AgreementData>,
}

impl Agreement {
    /// Creates an agreement in `PendingSignature`.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidExpiry`] - expiry is not after `now`.
    /// - [`EscrowError::InvalidRate`] - rates do not match the rate mode.
    pub fn new(
        id: AgreementId,
        payer: Identity,
        terms: AgreementTerms,
        now: Timestamp,
    ) -> Result<Self, EscrowError> {
        terms.validate(now)?;
        Ok(Self {
            inner: RwLock::new(AgreementData::new(id, payer, terms, now)),
        })
    }

    pub fn id(&self) -> AgreementId {
        self.inner.read().id
    }

    pub fn payer(&self) -> Identity {
        self.inner.read().payer
    }

    pub fn payee(&self) -> Identity {
        self.inner.read().payee
    }

    /// Status observed at `now`.
    pub fn status(&self, now: Timestamp) -> AgreementStatus {
        self.inner.read().status(now)
    }

    pub fn balances(&self, now: Timestamp) -> Balances {
        self.inner.read().balances(now)
    }

    pub fn snapshot(&self, now: Timestamp) -> AgreementSnapshot {
        self.inner.read().snapshot(now)
    }

    /// Audit events in commit order.
    pub fn history(&self) -> Vec<AgreementEvent> {
        self.inner.read().history.clone()
    }

    /// Credits an incoming transfer from `sender` to escrow.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::PermissionDenied`] - sender is not the payer.
    /// - [`EscrowError::InvalidState`] - agreement is terminated.
    /// - [`EscrowError::InvalidAmount`] - zero amount or balance overflow.
    pub fn deposit(
        &self,
        sender: Identity,
        amount: Amount,
        transfer_id: Option<TransferId>,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        let mut data = self.inner.write();
        data.deposit(sender, amount, transfer_id, now)?;
        debug!(agreement = %data.id, amount = %amount, "deposit credited");
        Ok(data.balances(now))
    }

    /// Credits a transfer signaled by the settlement layer, recording it in
    /// `log` so a redelivery is rejected.
    ///
    /// The agreement lock is taken before the log shard, and the shard is
    /// held only for the in-memory credit.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::DuplicateTransfer`] - transfer already credited.
    /// - Otherwise as [`Agreement::deposit`].
    pub fn deposit_transfer(
        &self,
        event: DepositEvent,
        log: &DepositLog,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        let mut data = self.inner.write();
        debug_assert_eq!(data.id, event.agreement_id);
        log.record_with(event, |event| {
            data.deposit(event.sender, event.amount, Some(event.transfer_id), now)
        })?;
        debug!(
            agreement = %data.id,
            transfer = %event.transfer_id,
            amount = %event.amount,
            "transfer credited"
        );
        Ok(data.balances(now))
    }

    /// Runs a participant action.
    ///
    /// `settlement` is only called by [`Action::Withdraw`] and
    /// [`Action::WithdrawRemainingFund`].
    ///
    /// # Errors
    ///
    /// - [`EscrowError::PermissionDenied`] - caller does not hold the action's role.
    /// - [`EscrowError::InvalidState`] - action not valid in the current status.
    /// - [`EscrowError::InvalidAmount`] - zero, overflowing, or above the outstanding claim.
    /// - [`EscrowError::InsufficientFunds`] - amount exceeds the debited balance.
    /// - [`EscrowError::InvalidExpiry`] - new expiry is not after `now`.
    /// - [`EscrowError::NothingToWithdraw`] - escrow is already empty.
    /// - [`EscrowError::SettlementFailed`] - payout rejected; nothing changed.
    pub fn apply(
        &self,
        caller: Identity,
        action: Action,
        now: Timestamp,
        settlement: &dyn Settlement,
    ) -> Result<Balances, EscrowError> {
        let mut data = self.inner.write();
        data.apply(caller, action, now, settlement)?;
        debug!(agreement = %data.id, caller = %caller, action = action.name(), "action applied");
        Ok(data.balances(now))
    }

    pub fn sign(&self, caller: Identity, now: Timestamp) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::Sign, now, &NoSettlement)
    }

    pub fn add_claim(
        &self,
        caller: Identity,
        units: u128,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::AddClaim { units }, now, &NoSettlement)
    }

    pub fn approve_claim(
        &self,
        caller: Identity,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::ApproveClaim { amount }, now, &NoSettlement)
    }

    pub fn withdraw(
        &self,
        caller: Identity,
        amount: Amount,
        now: Timestamp,
        settlement: &dyn Settlement,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::Withdraw { amount }, now, settlement)
    }

    pub fn request_termination(
        &self,
        caller: Identity,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::RequestTermination, now, &NoSettlement)
    }

    pub fn approve_termination(
        &self,
        caller: Identity,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::ApproveTermination, now, &NoSettlement)
    }

    pub fn withdraw_remaining_fund(
        &self,
        caller: Identity,
        now: Timestamp,
        settlement: &dyn Settlement,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::WithdrawRemainingFund, now, settlement)
    }

    pub fn extend_expiry(
        &self,
        caller: Identity,
        new_expiry: Timestamp,
        now: Timestamp,
    ) -> Result<Balances, EscrowError> {
        self.apply(caller, Action::ExtendExpiry { new_expiry }, now, &NoSettlement)
    }
}

/// Stand-in for actions that never pay out.
struct NoSettlement;

impl Settlement for NoSettlement {
    fn transfer(&self, _payout: &Payout) -> Result<SettlementReceipt, SettlementError> {
        Err(SettlementError::Unavailable)
    }
}

/// Persisted record: stored status, not the time-derived one.
impl Serialize for Agreement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.read();
        let mut state = serializer.serialize_struct("Agreement", 15)?;
        state.serialize_field("id", &data.id)?;
        state.serialize_field("payer", &data.payer)?;
        state.serialize_field("payee", &data.payee)?;
        state.serialize_field("expiry", &data.expiry)?;
        state.serialize_field("rate_mode", &data.rate_mode)?;
        state.serialize_field("hourly_rate", &data.hourly_rate)?;
        state.serialize_field("fixed_rate", &data.fixed_rate)?;
        state.serialize_field("escrow_balance", &data.escrow_balance)?;
        state.serialize_field("employee_balance", &data.employee_balance)?;
        state.serialize_field("total_paid", &data.total_paid)?;
        state.serialize_field("claim_value", &data.claim_value)?;
        state.serialize_field("status", &data.status)?;
        state.serialize_field("total_deposited", &data.total_deposited)?;
        state.serialize_field("total_withdrawn_by_payee", &data.total_withdrawn_by_payee)?;
        state.serialize_field("total_withdrawn_by_payer", &data.total_withdrawn_by_payer)?;
        state.end()
    }
}
