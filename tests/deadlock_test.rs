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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the real engine from many threads and verify that its
//! locking patterns do not lead to deadlocks. Agreement locks are
//! `parking_lot` locks, so the `deadlock_detection` feature enabled for
//! tests makes them visible to the detector.

use parking_lot::deadlock;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use work_escrow_rs::{
    AgreementId, AgreementSnapshot, AgreementStatus, AgreementTerms, Amount, DepositEvent, Engine,
    EscrowError, Identity, InMemorySettlement, ManualClock, Payout, Settlement, SettlementError,
    SettlementReceipt, Timestamp, TransferId,
};

const PAYER: Identity = Identity(1);
const PAYEE: Identity = Identity(2);
const START: Timestamp = Timestamp(1_000);
const EXPIRY: Timestamp = Timestamp(1_000_000);

// === Fixtures ===

struct Fixture {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    settlement: Arc<InMemorySettlement>,
    transfers: Arc<AtomicU64>,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let settlement = Arc::new(InMemorySettlement::new());
        let engine = Engine::new(Identity(0), clock.clone(), settlement.clone());
        Fixture {
            engine: Arc::new(engine),
            clock,
            settlement,
            transfers: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Signed hourly agreement at rate 3 funded with `funds`.
    fn active_agreement(&self, payer: Identity, payee: Identity, funds: u128) -> AgreementId {
        let id = self
            .engine
            .create_agreement(payer, AgreementTerms::hourly(payee, EXPIRY, Amount(3)))
            .expect("creation should succeed");
        self.engine.sign(id, payee).expect("sign should succeed");
        deposit(&self.engine, &self.transfers, id, payer, funds).expect("deposit should succeed");
        id
    }
}

fn deposit(
    engine: &Engine,
    transfers: &AtomicU64,
    id: AgreementId,
    sender: Identity,
    amount: u128,
) -> Result<(), EscrowError> {
    let transfer_id = TransferId(transfers.fetch_add(1, Ordering::SeqCst));
    engine
        .deposit(DepositEvent {
            transfer_id,
            agreement_id: id,
            sender,
            amount: Amount(amount),
        })
        .map(drop)
}

fn assert_conserved(snapshot: &AgreementSnapshot) {
    assert_eq!(
        snapshot.escrow_balance.0
            + snapshot.employee_balance.0
            + snapshot.total_withdrawn_by_payee.0
            + snapshot.total_withdrawn_by_payer.0,
        snapshot.total_deposited.0,
        "funds not conserved for agreement {}",
        snapshot.id
    );
    assert!(snapshot.total_paid >= snapshot.employee_balance);
}

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Tests ===

/// Payer and payee hammer one agreement from many threads.
#[test]
fn no_deadlock_high_contention_single_agreement() {
    let detector = start_deadlock_detector();
    let fixture = Fixture::new();
    let id = fixture.active_agreement(PAYER, PAYEE, 1_000);

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for _ in 0..NUM_THREADS {
        let engine = fixture.engine.clone();
        let transfers = fixture.transfers.clone();

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                match i % 5 {
                    0 => {
                        let _ = deposit(&engine, &transfers, id, PAYER, 10);
                    }
                    1 => {
                        let _ = engine.add_claim(id, PAYEE, 1);
                    }
                    2 => {
                        let _ = engine.approve_claim(id, PAYER, Amount(3));
                    }
                    3 => {
                        let _ = engine.withdraw(id, PAYEE, Amount(2));
                    }
                    _ => {
                        let _ = engine.agreement(id);
                        let _ = engine.history(id);
                    }
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let snapshot = fixture.engine.agreement(id).expect("agreement should exist");
    assert_conserved(&snapshot);
    assert_eq!(
        fixture.settlement.paid_to(PAYEE),
        snapshot.total_withdrawn_by_payee
    );
    println!(
        "High contention test passed: {} threads × {} ops",
        NUM_THREADS, OPS_PER_THREAD
    );
}

/// Threads work on many agreements and read across them.
#[test]
fn no_deadlock_cross_agreement_operations() {
    let detector = start_deadlock_detector();
    let fixture = Fixture::new();

    const NUM_THREADS: usize = 20;
    const NUM_AGREEMENTS: u64 = 10;
    const OPS_PER_THREAD: usize = 50;

    let ids: Vec<_> = (0..NUM_AGREEMENTS)
        .map(|n| fixture.active_agreement(PAYER, Identity(100 + n), 500))
        .collect();
    let ids = Arc::new(ids);

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let engine = fixture.engine.clone();
        let transfers = fixture.transfers.clone();
        let ids = ids.clone();

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let index = (thread_id + i) % ids.len();
                let id = ids[index];
                let payee = Identity(100 + index as u64);

                if i % 2 == 0 {
                    let _ = deposit(&engine, &transfers, id, PAYER, 5);
                    let _ = engine.add_claim(id, payee, 1);
                } else {
                    let _ = engine.approve_claim(id, PAYER, Amount(3));
                    let _ = engine.withdraw(id, payee, Amount(1));
                }

                // Also read a different agreement and the payer index
                let other = ids[(index + 1) % ids.len()];
                let _ = engine.status(other);
                let _ = engine.list_as_payer(PAYER);
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    for snapshot in fixture.engine.snapshots() {
        assert_conserved(&snapshot);
    }
    println!(
        "Cross-agreement test passed: {} agreements, {} threads",
        fixture.engine.registry().len(),
        NUM_THREADS
    );
}

/// Each transfer is delivered by several threads at once; exactly one
/// delivery may credit it.
#[test]
fn no_deadlock_duplicate_deliveries() {
    let detector = start_deadlock_detector();
    let fixture = Fixture::new();
    let id = fixture.active_agreement(PAYER, PAYEE, 1);

    const TRANSFERS: u64 = 200;
    const DELIVERIES: u64 = 8;

    let deliveries: Vec<u64> = (0..TRANSFERS * DELIVERIES)
        .map(|n| 10_000 + n % TRANSFERS)
        .collect();

    let credited = AtomicU32::new(0);
    let duplicates = AtomicU32::new(0);
    deliveries.par_iter().for_each(|transfer| {
        let result = fixture.engine.deposit(DepositEvent {
            transfer_id: TransferId(*transfer),
            agreement_id: id,
            sender: PAYER,
            amount: Amount(7),
        });
        match result {
            Ok(_) => credited.fetch_add(1, Ordering::SeqCst),
            Err(EscrowError::DuplicateTransfer) => duplicates.fetch_add(1, Ordering::SeqCst),
            Err(other) => panic!("unexpected deposit error: {other}"),
        };
    });

    stop_deadlock_detector(detector);

    assert_eq!(credited.load(Ordering::SeqCst) as u64, TRANSFERS);
    assert_eq!(
        duplicates.load(Ordering::SeqCst) as u64,
        TRANSFERS * (DELIVERIES - 1)
    );
    let snapshot = fixture.engine.agreement(id).expect("agreement should exist");
    assert_eq!(snapshot.escrow_balance, Amount(1 + 7 * TRANSFERS as u128));
}

/// Termination and remainder withdrawal race on many agreements.
#[test]
fn no_deadlock_termination_race() {
    let detector = start_deadlock_detector();
    let fixture = Fixture::new();

    const NUM_AGREEMENTS: u64 = 20;
    const RACERS: usize = 4;

    let ids: Vec<_> = (0..NUM_AGREEMENTS)
        .map(|n| fixture.active_agreement(PAYER, Identity(200 + n), 1_000))
        .collect();
    let remainders = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for (n, id) in ids.iter().copied().enumerate() {
        let payee = Identity(200 + n as u64);
        for _ in 0..RACERS {
            let engine = fixture.engine.clone();
            let remainders = remainders.clone();

            let handle = thread::spawn(move || {
                let _ = engine.request_termination(id, PAYER);
                thread::sleep(Duration::from_micros(100));
                let _ = engine.approve_termination(id, payee);
                if engine.withdraw_remaining_fund(id, PAYER).is_ok() {
                    remainders.fetch_add(1, Ordering::SeqCst);
                }
            });
            handles.push(handle);
        }
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Some racer may reach withdrawal before approval; finish the rest here.
    for id in &ids {
        if fixture.engine.withdraw_remaining_fund(*id, PAYER).is_ok() {
            remainders.fetch_add(1, Ordering::SeqCst);
        }
    }

    assert_eq!(remainders.load(Ordering::SeqCst) as u64, NUM_AGREEMENTS);
    for id in &ids {
        let snapshot = fixture.engine.agreement(*id).expect("agreement should exist");
        assert_eq!(snapshot.status, AgreementStatus::Terminated);
        assert_eq!(snapshot.escrow_balance, Amount::ZERO);
        assert_conserved(&snapshot);
    }
    assert_eq!(
        fixture.settlement.paid_to(PAYER),
        Amount(1_000 * NUM_AGREEMENTS as u128)
    );
}

/// Agreements are created while readers iterate the registry.
#[test]
fn no_deadlock_creation_during_iteration() {
    let detector = start_deadlock_detector();
    let fixture = Fixture::new();
    let running = Arc::new(AtomicBool::new(true));

    let mut handles = Vec::new();

    for writer_id in 0..5u64 {
        let engine = fixture.engine.clone();
        let running = running.clone();

        let handle = thread::spawn(move || {
            let mut count = 0;
            while running.load(Ordering::SeqCst) && count < 100 {
                let payee = Identity(1_000 + writer_id * 100 + count);
                let terms = AgreementTerms::fixed(payee, EXPIRY, Amount(50));
                engine
                    .create_agreement(Identity(writer_id + 1), terms)
                    .expect("creation should succeed");
                count += 1;
                thread::yield_now();
            }
        });

        handles.push(handle);
    }

    for reader_id in 0..5u64 {
        let engine = fixture.engine.clone();
        let running = running.clone();

        let handle = thread::spawn(move || {
            let mut iterations = 0;
            while running.load(Ordering::SeqCst) && iterations < 50 {
                let snapshots = engine.snapshots();
                assert!(snapshots.windows(2).all(|w| w[0].id < w[1].id));
                for id in engine.list_as_payer(Identity(reader_id + 1)) {
                    assert!(engine.agreement(id).is_ok());
                }
                iterations += 1;
                thread::yield_now();
            }
        });

        handles.push(handle);
    }

    thread::sleep(Duration::from_millis(500));
    running.store(false, Ordering::SeqCst);

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let total: usize = (1..=5)
        .map(|payer| fixture.engine.list_as_payer(Identity(payer)).len())
        .sum();
    assert_eq!(total, fixture.engine.registry().len());
    println!(
        "Creation during iteration test passed: {} agreements created",
        total
    );
}

/// Clock advances past expiry while participants keep acting.
#[test]
fn no_deadlock_expiry_race() {
    let detector = start_deadlock_detector();
    let fixture = Fixture::new();
    let id = fixture.active_agreement(PAYER, PAYEE, 10_000);

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 200;

    let mut handles = Vec::with_capacity(NUM_THREADS + 1);

    {
        let clock = fixture.clock.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                clock.advance(10_000);
                thread::yield_now();
            }
        }));
    }

    for thread_id in 0..NUM_THREADS {
        let engine = fixture.engine.clone();
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                match (thread_id + i) % 4 {
                    0 => {
                        let _ = engine.add_claim(id, PAYEE, 1);
                    }
                    1 => {
                        let _ = engine.approve_claim(id, PAYER, Amount(3));
                    }
                    2 => {
                        let new_expiry = engine.now().plus_secs(5_000);
                        let _ = engine.extend_expiry(id, PAYER, new_expiry);
                    }
                    _ => {
                        let _ = engine.withdraw(id, PAYEE, Amount(1));
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let snapshot = fixture.engine.agreement(id).expect("agreement should exist");
    assert_conserved(&snapshot);
    assert_ne!(snapshot.status, AgreementStatus::Terminated);
}

/// Settlement layer that takes `delay` to confirm each payout.
struct SlowSettlement {
    delay: Duration,
    started: AtomicBool,
}

impl Settlement for SlowSettlement {
    fn transfer(&self, _payout: &Payout) -> Result<SettlementReceipt, SettlementError> {
        self.started.store(true, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(SettlementReceipt(1))
    }
}

/// A payout stuck in settlement on one agreement must not hold up deposits
/// to another, whatever shard their transfer IDs land in.
#[test]
fn slow_payout_does_not_block_other_agreements() {
    let detector = start_deadlock_detector();
    let settlement = Arc::new(SlowSettlement {
        delay: Duration::from_secs(2),
        started: AtomicBool::new(false),
    });
    let clock = Arc::new(ManualClock::new(START));
    let engine = Arc::new(Engine::new(Identity(0), clock, settlement.clone()));
    let transfers = AtomicU64::new(1);

    let (payer_x, payee_x) = (Identity(10), Identity(11));
    let (payer_y, payee_y) = (Identity(20), Identity(21));
    let make = |payer: Identity, payee: Identity| {
        let id = engine
            .create_agreement(payer, AgreementTerms::hourly(payee, EXPIRY, Amount(1)))
            .expect("creation should succeed");
        engine.sign(id, payee).expect("sign should succeed");
        deposit(&engine, &transfers, id, payer, 100).expect("deposit should succeed");
        id
    };
    let x = make(payer_x, payee_x);
    let y = make(payer_y, payee_y);
    engine.add_claim(x, payee_x, 10).unwrap();
    engine.approve_claim(x, payer_x, Amount(10)).unwrap();

    let withdrawer = {
        let engine = engine.clone();
        thread::spawn(move || engine.withdraw(x, payee_x, Amount(10)))
    };
    while !settlement.started.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    // Queued behind the payout on X.
    let queued = {
        let engine = engine.clone();
        thread::spawn(move || {
            engine.deposit(DepositEvent {
                transfer_id: TransferId(2_000),
                agreement_id: x,
                sender: payer_x,
                amount: Amount(5),
            })
        })
    };
    thread::sleep(Duration::from_millis(200));

    let mut worst = Duration::ZERO;
    for transfer in 3_000..3_300u64 {
        let start = Instant::now();
        engine
            .deposit(DepositEvent {
                transfer_id: TransferId(transfer),
                agreement_id: y,
                sender: payer_y,
                amount: Amount(1),
            })
            .expect("deposit to Y should succeed");
        worst = worst.max(start.elapsed());
    }

    assert!(
        worst < Duration::from_millis(500),
        "deposit to Y waited {worst:?} behind the payout on X"
    );
    assert!(withdrawer.join().expect("Thread panicked").is_ok());
    assert!(queued.join().expect("Thread panicked").is_ok());

    stop_deadlock_detector(detector);

    assert_eq!(engine.agreement(y).unwrap().escrow_balance, Amount(400));
    let snapshot = engine.agreement(x).unwrap();
    assert_eq!(snapshot.escrow_balance, Amount(95));
    assert_eq!(snapshot.employee_balance, Amount::ZERO);
    assert_conserved(&snapshot);
}

/// Verifies the detector infrastructure on an uncontended engine.
#[test]
fn detector_runs_on_quiet_engine() {
    let detector = start_deadlock_detector();

    let fixture = Fixture::new();
    let id = fixture.active_agreement(PAYER, PAYEE, 100);
    fixture.engine.add_claim(id, PAYEE, 6).unwrap();
    fixture.engine.approve_claim(id, PAYER, Amount(18)).unwrap();

    let snapshot = fixture.engine.agreement(id).unwrap();
    assert_eq!(snapshot.escrow_balance, Amount(82));

    stop_deadlock_detector(detector);

    println!("Deadlock detector infrastructure verified");
}
