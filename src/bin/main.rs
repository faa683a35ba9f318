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
use token_ledger::{
    AccountId, CheckStatus, ExternalEventId, PaymentEvent, PaymentEventKind,
    ReconciliationAuditor, Tokens, TransactionEngine,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Token Ledger - Process an operations CSV file
///
/// Reads ledger operations from a CSV file, outputs final account states to
/// stdout, and reconciles the result. Logs go to stderr (RUST_LOG to tune).
#[derive(Parser, Debug)]
#[command(name = "token-ledger")]
#[command(about = "A token ledger that processes operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,account,counterparty,amount,event_id,reason
    /// Example: cargo run -- operations.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Skip the reconciliation pass after processing
    #[arg(long)]
    no_reconcile: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let (engine, seen_events) = match process_operations(BufReader::new(file)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_accounts(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    if !args.no_reconcile {
        let auditor = ReconciliationAuditor::new(Arc::clone(&engine));
        for record in auditor.run_all(&seen_events) {
            if record.status != CheckStatus::Passed {
                warn!(
                    check = ?record.check_type,
                    discrepancy = record.discrepancy,
                    details = %record.details,
                    "reconciliation flagged this run"
                );
            }
        }
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, account, counterparty, amount, event_id, reason`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    account: u64,
    #[serde(deserialize_with = "csv::invalid_option")]
    counterparty: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Tokens>,
    event_id: Option<String>,
    reason: Option<String>,
}

/// One parsed ledger operation.
#[derive(Debug)]
enum Operation {
    Event(PaymentEvent),
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Tokens,
        reason: String,
    },
    Debit {
        account: AccountId,
        amount: Tokens,
        reason: String,
    },
    Credit {
        account: AccountId,
        amount: Tokens,
        reason: String,
    },
    Adjust {
        account: AccountId,
        amount: Tokens,
        note: String,
    },
}

impl CsvRecord {
    /// Converts a CSV record into an operation.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let account = AccountId(self.account);
        let reason = self.reason.unwrap_or_default();

        match self.op.to_lowercase().as_str() {
            "purchase" | "refund" | "chargeback" => {
                let kind = match self.op.to_lowercase().as_str() {
                    "purchase" => PaymentEventKind::Purchase,
                    "refund" => PaymentEventKind::Refund,
                    _ => PaymentEventKind::Chargeback,
                };
                Some(Operation::Event(PaymentEvent {
                    event_id: ExternalEventId::new(self.event_id?),
                    account_id: account,
                    amount_tokens: self.amount?,
                    kind,
                }))
            }
            "transfer" => Some(Operation::Transfer {
                from: account,
                to: AccountId(self.counterparty?),
                amount: self.amount?,
                reason,
            }),
            "debit" => Some(Operation::Debit {
                account,
                amount: self.amount?,
                reason,
            }),
            "credit" => Some(Operation::Credit {
                account,
                amount: self.amount?,
                reason,
            }),
            "adjust" => Some(Operation::Adjust {
                account,
                amount: self.amount?,
                note: reason,
            }),
            _ => None,
        }
    }
}

/// Processes operations from a CSV reader.
///
/// Streaming parse; malformed rows and failed operations are skipped with a
/// log line rather than aborting the run. Returns the engine plus every
/// external event id seen in the input, which doubles as the processor's
/// event list for the reconciliation pass.
///
/// # CSV Format
///
/// Columns: `op, account, counterparty, amount, event_id, reason`
/// - `op`: purchase, refund, chargeback, transfer, debit, credit, adjust
/// - `account`: acting account id (the sender for transfers)
/// - `counterparty`: receiving account id (transfers only)
/// - `amount`: token amount (signed for adjust)
/// - `event_id`: external processor event id (payment events only)
/// - `reason`: free-form reason recorded on the ledger entry
pub fn process_operations<R: Read>(
    reader: R,
) -> Result<(Arc<TransactionEngine>, Vec<ExternalEventId>), csv::Error> {
    let engine = Arc::new(TransactionEngine::new());
    let mut seen_events = Vec::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(op) = record.into_operation() else {
                    debug!("skipping invalid operation record");
                    continue;
                };

                let outcome = match op {
                    Operation::Event(event) => {
                        seen_events.push(event.event_id.clone());
                        engine.process_payment_event(event).map(|_| ())
                    }
                    Operation::Transfer {
                        from,
                        to,
                        amount,
                        reason,
                    } => engine.transfer(from, to, amount, &reason).map(|_| ()),
                    Operation::Debit {
                        account,
                        amount,
                        reason,
                    } => engine.debit(account, amount, &reason).map(|_| ()),
                    Operation::Credit {
                        account,
                        amount,
                        reason,
                    } => engine.credit(account, amount, &reason).map(|_| ()),
                    Operation::Adjust {
                        account,
                        amount,
                        note,
                    } => engine.admin_adjust(account, amount, &note).map(|_| ()),
                };

                if let Err(e) = outcome {
                    debug!(error = %e, "skipping failed operation");
                }
            }
            Err(e) => {
                debug!(error = %e, "skipping malformed row");
                continue;
            }
        }
    }

    Ok((engine, seen_events))
}

/// Account state row for the output CSV.
#[derive(Debug, Serialize)]
struct AccountRow {
    account: u64,
    balance: Tokens,
    lifetime_purchased: Tokens,
    lifetime_spent: Tokens,
    lifetime_earned: Tokens,
}

/// Writes final account states as CSV.
///
/// Columns: `account, balance, lifetime_purchased, lifetime_spent,
/// lifetime_earned`, ordered by account id.
pub fn write_accounts<W: Write>(engine: &TransactionEngine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for snapshot in engine.snapshots() {
        wtr.serialize(AccountRow {
            account: snapshot.account_id.0,
            balance: snapshot.balance,
            lifetime_purchased: snapshot.lifetime_purchased,
            lifetime_spent: snapshot.lifetime_spent,
            lifetime_earned: snapshot.lifetime_earned,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_simple_purchase() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,500,evt_1,\n";
        let (engine, events) = process_operations(Cursor::new(csv)).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(engine.balance(AccountId(1)).unwrap(), 500);
    }

    #[test]
    fn parse_purchase_and_transfer() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,500,evt_1,\n\
                   transfer,1,2,30,,tip\n";
        let (engine, _) = process_operations(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(AccountId(1)).unwrap(), 470);
        assert_eq!(engine.balance(AccountId(2)).unwrap(), 30);
    }

    #[test]
    fn duplicate_event_rows_apply_once() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,500,evt_1,\n\
                   purchase,1,,500,evt_1,\n";
        let (engine, _) = process_operations(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(AccountId(1)).unwrap(), 500);
    }

    #[test]
    fn failed_debit_does_not_abort_processing() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,100,evt_1,\n\
                   debit,1,150,,,call\n\
                   debit,1,50,,,call\n";
        let (engine, _) = process_operations(Cursor::new(csv)).unwrap();

        assert_eq!(engine.balance(AccountId(1)).unwrap(), 50);
    }

    #[test]
    fn skip_malformed_rows() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,500,evt_1,\n\
                   nonsense,not,a,valid,row,here\n\
                   purchase,2,,200,evt_2,\n";
        let (engine, events) = process_operations(Cursor::new(csv)).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(engine.account_count(), 2);
    }

    #[test]
    fn parse_with_whitespace() {
        let csv = "op,account,counterparty,amount,event_id,reason\n purchase , 1 ,, 500 , evt_1 ,\n";
        let (engine, _) = process_operations(Cursor::new(csv)).unwrap();
        assert_eq!(engine.balance(AccountId(1)).unwrap(), 500);
    }

    #[test]
    fn adjust_accepts_signed_amounts() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,500,evt_1,\n\
                   adjust,1,-200,,,support correction\n";
        let (engine, _) = process_operations(Cursor::new(csv)).unwrap();
        assert_eq!(engine.balance(AccountId(1)).unwrap(), 300);
    }

    #[test]
    fn write_accounts_to_csv() {
        let csv = "op,account,counterparty,amount,event_id,reason\n\
                   purchase,1,,500,evt_1,\n\
                   purchase,2,,200,evt_2,\n";
        let (engine, _) = process_operations(Cursor::new(csv)).unwrap();

        let mut output = Vec::new();
        write_accounts(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains(
            "account,balance,lifetime_purchased,lifetime_spent,lifetime_earned"
        ));
        assert!(output_str.contains("1,500,500,0,0"));
    }
}
