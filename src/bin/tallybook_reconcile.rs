//! tallybook-reconcile: drift check and repair CLI
//!
//! Operational replacement for ad hoc diagnostic scripts: compares the
//! three representations of an access count (event rows, resource counter,
//! audit entries) and optionally repairs a drifted counter from the
//! authoritative event count.
//!
//! ## Usage
//! ```text
//! tallybook_reconcile reconcile <resource_id> <view|download>
//! tallybook_reconcile repair <resource_id> <view|download>
//! ```
//!
//! ## Configuration
//! - TALLYBOOK_CONFIG: configuration file path (default: config.yaml)
//! - TALLYBOOK_LOG: log filter (default: info)
//!
//! Exits non-zero when `reconcile` finds drift, so it can run under cron.

use std::process::ExitCode;

use tracing::{error, info};

use tallybook::config::Config;
use tallybook::ledger::Ledger;
use tallybook::model::EventKind;
use tallybook::storage::init_storage;
use tallybook::utils::bootstrap::init_tracing;

fn usage() -> ExitCode {
    eprintln!("usage: tallybook_reconcile <reconcile|repair> <resource_id> <view|download>");
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [command, resource_id, kind] = args.as_slice() else {
        return usage();
    };

    let Ok(resource_id) = resource_id.parse::<i64>() else {
        eprintln!("invalid resource id: {resource_id}");
        return usage();
    };
    let kind = match kind.parse::<EventKind>() {
        Ok(kind) => kind,
        Err(e) => {
            eprintln!("{e}");
            return usage();
        }
    };

    match run(command, resource_id, kind).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: &str,
    resource_id: i64,
    kind: EventKind,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = Config::load(None)?;
    let store = init_storage(&config.storage).await?;
    let ledger = Ledger::new(store);

    match command {
        "reconcile" => {
            let report = ledger.reconcile(resource_id, kind).await?;
            println!(
                "resource {resource_id} {kind}: events={} counter={} audit={} in_sync={}",
                report.event_count, report.counter_value, report.audit_count, report.in_sync
            );
            if report.in_sync {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        "repair" => {
            let corrected = ledger.repair(resource_id, kind).await?;
            info!(resource_id, kind = %kind, corrected, "Counter repaired");
            println!("resource {resource_id} {kind}: counter repaired to {corrected}");
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(usage()),
    }
}
