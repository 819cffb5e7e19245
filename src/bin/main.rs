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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use work_escrow_rs::{
    Action, AgreementId, AgreementTerms, Clock, Denomination, DepositEvent, Engine,
    EngineConfig, Identity, InMemorySettlement, ManualClock, RateMode, SystemClock, Timestamp,
    TransferId,
};

/// Escrow Engine - Replay agreement operation CSV files
///
/// Reads escrow operations from a CSV file and outputs agreement states to stdout.
/// Supports create, sign, deposit, claim, approve, withdraw, terminate,
/// approve_termination, withdraw_remaining, and extend.
#[derive(Parser, Debug)]
#[command(name = "work-escrow-rs")]
#[command(about = "An escrow engine that replays agreement operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,caller,agreement,amount,payee,expiry,rate,at
    /// Example: cargo run -- operations.csv > agreements.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML config file (admin, decimals, log_level)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Decimal places of one whole currency unit; overrides the config file
    #[arg(long)]
    decimals: Option<u32>,

    /// Registry admin identity; overrides the config file
    #[arg(long)]
    admin: Option<u64>,

    /// Log filter used when RUST_LOG is unset; overrides the config file
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Replay operations from CSV
    let engine = match process_operations(BufReader::new(file), &config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    // Write results to stdout
    if let Err(e) = write_agreements(&engine, config.denomination, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Defaults, then the config file, then command line flags.
fn resolve_config(args: &Args) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(decimals) = args.decimals {
        config.denomination = Denomination::new(decimals).ok_or_else(|| {
            format!(
                "decimals must be at most {}, got {}",
                Denomination::MAX_DECIMALS,
                decimals
            )
        })?;
    }
    if let Some(admin) = args.admin {
        config.admin = Identity(admin);
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, caller, agreement, amount, payee, expiry, rate, at`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op: String,
    caller: u64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    agreement: Option<u64>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    payee: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    expiry: Option<u64>,
    #[serde(default)]
    rate: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    at: Option<u64>,
}

/// An operation decoded from one CSV row.
#[derive(Debug)]
enum Operation {
    Create {
        payer: Identity,
        terms: AgreementTerms,
    },
    Deposit(DepositEvent),
    Act {
        agreement: AgreementId,
        caller: Identity,
        action: Action,
    },
}

impl CsvRecord {
    /// Converts a CSV record to an operation.
    ///
    /// `row` is the 1-based data row number; it doubles as the transfer ID
    /// of deposits. Claims on hourly agreements are whole hours, every other
    /// amount is in whole currency units.
    fn into_operation(
        self,
        row: u64,
        engine: &Engine,
        denomination: Denomination,
    ) -> Result<Operation, String> {
        let caller = Identity(self.caller);
        let amount = || -> Result<_, String> {
            let raw = self.amount.as_deref().ok_or("missing amount")?;
            denomination.parse(raw).map_err(|e| e.to_string())
        };
        let agreement = || self.agreement.map(AgreementId).ok_or("missing agreement");

        let action = match self.op.to_lowercase().as_str() {
            "create" => {
                let payee = Identity(self.payee.ok_or("missing payee")?);
                let expiry = Timestamp(self.expiry.ok_or("missing expiry")?);
                let mode: RateMode = self.rate.as_deref().ok_or("missing rate")?.parse()?;
                let rate = amount()?;
                let terms = match mode {
                    RateMode::HourlyRate => AgreementTerms::hourly(payee, expiry, rate),
                    RateMode::FixedRate => AgreementTerms::fixed(payee, expiry, rate),
                };
                return Ok(Operation::Create {
                    payer: caller,
                    terms,
                });
            }
            "deposit" => {
                return Ok(Operation::Deposit(DepositEvent {
                    transfer_id: TransferId(row),
                    agreement_id: agreement()?,
                    sender: caller,
                    amount: amount()?,
                }));
            }
            "sign" => Action::Sign,
            "claim" => {
                let snapshot = engine
                    .agreement(agreement()?)
                    .map_err(|e| e.to_string())?;
                let units = match snapshot.rate_mode {
                    RateMode::HourlyRate => self
                        .amount
                        .as_deref()
                        .ok_or("missing hours")?
                        .trim()
                        .parse::<u128>()
                        .map_err(|e| format!("invalid hours: {e}"))?,
                    RateMode::FixedRate => amount()?.0,
                };
                Action::AddClaim { units }
            }
            "approve" => Action::ApproveClaim { amount: amount()? },
            "withdraw" => Action::Withdraw { amount: amount()? },
            "terminate" => Action::RequestTermination,
            "approve_termination" => Action::ApproveTermination,
            "withdraw_remaining" => Action::WithdrawRemainingFund,
            "extend" => Action::ExtendExpiry {
                new_expiry: Timestamp(self.expiry.ok_or("missing expiry")?),
            },
            other => return Err(format!("unknown operation '{other}'")),
        };

        Ok(Operation::Act {
            agreement: agreement()?,
            caller,
            action,
        })
    }
}

/// Replay operations from a CSV reader.
///
/// Rows are applied in file order. A row with an `at` value moves the replay
/// clock to that time first; rows without one run at the previous row's
/// time, starting from the wall clock. Malformed rows and rejected operations
/// are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, caller, agreement, amount, payee, expiry, rate, at`
///
/// # Example
///
/// ```csv
/// type,caller,agreement,amount,payee,expiry,rate,at
/// create,1,,3.0,2,1700600000,hourly,1700000000
/// sign,2,1,,,,,
/// deposit,1,1,100.0,,,,
/// claim,2,1,6,,,,
/// approve,1,1,18.0,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_operations<R: Read>(
    reader: R,
    config: &EngineConfig,
) -> Result<Engine, csv::Error> {
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let settlement = Arc::new(InMemorySettlement::new());
    let engine = Engine::new(config.admin, clock.clone(), settlement.clone());

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " deposit "
        .flexible(true) // Allow trailing columns to be omitted
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let row = index as u64 + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, error = %e, "skipping malformed row");
                continue;
            }
        };
        if let Some(at) = record.at {
            clock.set(Timestamp(at));
        }

        let operation = match record.into_operation(row, &engine, config.denomination) {
            Ok(operation) => operation,
            Err(e) => {
                warn!(row, error = %e, "skipping invalid operation");
                continue;
            }
        };

        // Rejected operations leave state unchanged; keep going.
        let outcome = match operation {
            Operation::Create { payer, terms } => {
                engine.create_agreement(payer, terms).map(|_| ())
            }
            Operation::Deposit(event) => engine.deposit(event).map(|_| ()),
            Operation::Act {
                agreement,
                caller,
                action,
            } => engine.execute(agreement, caller, action).map(|_| ()),
        };
        if let Err(e) = outcome {
            warn!(row, error = %e, "operation rejected");
        }
    }

    let credited = engine.take_credited_deposits();
    info!(
        agreements = engine.registry().len(),
        deposits = credited.len(),
        payouts = settlement.payouts().len(),
        "replay finished"
    );
    Ok(engine)
}

/// One output row per agreement, amounts in whole currency units.
#[derive(Debug, Serialize)]
struct AgreementRow {
    id: u64,
    payer: u64,
    payee: u64,
    expiry: u64,
    rate_mode: String,
    hourly_rate: String,
    fixed_rate: String,
    escrow_balance: String,
    employee_balance: String,
    total_paid: String,
    claim_value: String,
    status: String,
}

/// Write agreement states to a CSV writer
///
/// # CSV Format
///
/// Columns: `id, payer, payee, expiry, rate_mode, hourly_rate, fixed_rate,
/// escrow_balance, employee_balance, total_paid, claim_value, status`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_agreements<W: Write>(
    engine: &Engine,
    denomination: Denomination,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for snapshot in engine.snapshots() {
        wtr.serialize(AgreementRow {
            id: snapshot.id.0,
            payer: snapshot.payer.0,
            payee: snapshot.payee.0,
            expiry: snapshot.expiry.0,
            rate_mode: snapshot.rate_mode.to_string(),
            hourly_rate: denomination.format(snapshot.hourly_rate),
            fixed_rate: denomination.format(snapshot.fixed_rate),
            escrow_balance: denomination.format(snapshot.escrow_balance),
            employee_balance: denomination.format(snapshot.employee_balance),
            total_paid: denomination.format(snapshot.total_paid),
            claim_value: denomination.format(snapshot.claim_value),
            status: snapshot.status.to_string(),
        })?;
    }

    // Flush to ensure all data is written
    wtr.flush()?;
    Ok(())
}
