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

//! Agreement registry.
//!
//! Creates agreements and indexes them by payer and by payee. Both indices
//! are append-only: an agreement stays listed in every final status.
//!
//! # Thread Safety
//!
//! Indices are [`DashMap`]s keyed by identity, so appends for one identity
//! are serialized by its shard lock while unrelated identities proceed in
//! parallel.

use crate::EscrowError;
use crate::agreement::{Agreement, AgreementTerms};
use crate::base::{AgreementId, Identity, Timestamp};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Registry of all agreements.
///
/// # Invariants
///
/// - Agreement IDs are unique and allocated in increasing order from 1.
/// - Every ID in an index resolves through [`Registry::get`].
/// - Index entries are never removed or reordered.
#[derive(Debug)]
pub struct Registry {
    /// Deployer identity; informational only.
    admin: Identity,
    agreements: DashMap<AgreementId, Arc<Agreement>>,
    by_payer: DashMap<Identity, Vec<AgreementId>>,
    by_payee: DashMap<Identity, Vec<AgreementId>>,
    last_id: AtomicU64,
}

impl Registry {
    pub fn new(admin: Identity) -> Self {
        Registry {
            admin,
            agreements: DashMap::new(),
            by_payer: DashMap::new(),
            by_payee: DashMap::new(),
            last_id: AtomicU64::new(0),
        }
    }

    pub fn admin(&self) -> Identity {
        self.admin
    }

    /// Creates an agreement with `caller` as payer.
    ///
    /// The agreement starts in `PendingSignature` and is appended to the
    /// caller's payer index and the payee's payee index.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidExpiry`] - expiry is not after `now`.
    /// - [`EscrowError::InvalidRate`] - rates do not match the rate mode.
    pub fn create_agreement(
        &self,
        caller: Identity,
        terms: AgreementTerms,
        now: Timestamp,
    ) -> Result<AgreementId, EscrowError> {
        // Validate before allocating so rejected requests do not consume IDs.
        terms.validate(now)?;
        let id = AgreementId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
        let agreement = Agreement::new(id, caller, terms, now)?;

        // Publish the agreement before indexing it.
        self.agreements.insert(id, Arc::new(agreement));
        self.by_payer.entry(caller).or_default().push(id);
        self.by_payee.entry(terms.payee).or_default().push(id);

        debug!(agreement = %id, payer = %caller, payee = %terms.payee, "agreement created");
        Ok(id)
    }

    /// Returns a shared handle to the agreement.
    ///
    /// The map guard is released before returning, so callers may lock the
    /// agreement without holding a registry shard.
    pub fn get(&self, id: &AgreementId) -> Option<Arc<Agreement>> {
        self.agreements.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Agreements where `identity` is the payer, in creation order.
    pub fn list_as_payer(&self, identity: &Identity) -> Vec<AgreementId> {
        self.by_payer
            .get(identity)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    /// Agreements where `identity` is the payee, in creation order.
    pub fn list_as_payee(&self, identity: &Identity) -> Vec<AgreementId> {
        self.by_payee
            .get(identity)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.agreements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agreements.is_empty()
    }

    /// All agreements ordered by ID.
    pub fn agreements(&self) -> Vec<Arc<Agreement>> {
        let mut all: Vec<_> = self
            .agreements
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, agreement)| agreement).collect()
    }
}
