use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;

use schoolhub_fees::entities::student_fee;
use schoolhub_fees::{
    audit_ledger, get_events_for_entity, import_path, init_tracing, open_database, portal_for,
    run_backfill, run_grant_sync, run_recalculation, BackfillOutcome, ImportKind, LedgerConfig,
    Role,
};

const USAGE: &str = "Usage: schoolhub-fees <command>

Commands:
  init                                   Create the ledger database
  import <students|fee-items|grants> <csv>
  backfill                               Create missing fee records for cleared students
  recalculate                            Rebuild the fee ledger from active fee items
  sync-grants                            Push active grant discounts into the ledger
  audit                                  Check every ledger row balances
  events <entity_type> <entity_id>       Show the audit trail for an entity
  portal <role>                          Show a role's portal navigation

Environment:
  SCHOOLHUB_CONFIG   path to a JSON config file
  SCHOOLHUB_DB       database path (overrides config)
  RUST_LOG           log filter (default schoolhub_fees=info)";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    // Portal lookup needs no database
    if command == "portal" {
        return run_portal(args.get(2));
    }
    if command == "help" || command == "--help" || command == "-h" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = LedgerConfig::from_env().context("Failed to load configuration")?;
    let conn = open_database(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;

    match command.as_str() {
        "init" => {
            let rows = student_fee::count_student_fees(&conn)?;
            println!(
                "✓ Database ready at {:?} ({} fee records)",
                config.database_path, rows
            );
            Ok(())
        }
        "import" => run_import(&conn, args.get(2), args.get(3)),
        "backfill" => run_backfill_cmd(&conn, &config),
        "recalculate" => run_recalculate_cmd(&conn, &config),
        "sync-grants" => run_sync_cmd(&conn, &config),
        "audit" => run_audit_cmd(&conn),
        "events" => run_events_cmd(&conn, args.get(2), args.get(3)),
        other => {
            eprintln!("❌ Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(1);
        }
    }
}

fn run_import(conn: &Connection, kind: Option<&String>, path: Option<&String>) -> Result<()> {
    let (Some(kind), Some(path)) = (kind, path) else {
        bail!("import needs a kind and a CSV path\n\n{}", USAGE);
    };
    let kind: ImportKind = kind.parse()?;

    println!("📂 Importing {:?} from {}", kind, path);
    let count = import_path(conn, kind, Path::new(path))
        .with_context(|| format!("Failed to import {}", path))?;
    println!("✓ Imported {} rows", count);
    Ok(())
}

fn run_backfill_cmd(conn: &Connection, config: &LedgerConfig) -> Result<()> {
    println!("🧩 Fee Record Backfill");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let outcome = run_backfill(conn, config).context("Backfill failed")?;

    match &outcome {
        BackfillOutcome::NothingToDo => {
            println!("✓ No students found that need fee records");
        }
        BackfillOutcome::Completed(report) => {
            println!("✓ Created {} fee records", outcome.created_count());
            if report.already_present > 0 {
                println!("  {} already present", report.already_present);
            }
            for student_id in &report.missing_school_year {
                println!("⚠️  Student {} has no school year, skipped", student_id);
            }
            for failure in &report.failures {
                println!("❌ Student {}: {}", failure.student_id, failure.error);
            }
        }
    }

    println!("\n{}", outcome.summary());

    if let BackfillOutcome::Completed(report) = &outcome {
        if outcome.has_failures() {
            bail!("{} students failed to get a fee record", report.failures.len());
        }
    }
    Ok(())
}

fn run_recalculate_cmd(conn: &Connection, config: &LedgerConfig) -> Result<()> {
    println!("🔁 Fee Recalculation ({:?})", config.recalc_strategy);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = run_recalculation(conn, config).context("Recalculation failed")?;

    if report.cleared_rows > 0 {
        println!("✓ Cleared {} existing fee records", report.cleared_rows);
    }
    let mut running = 0.0;
    for app in &report.applications {
        running += app.subtotal;
        println!(
            "✓ {} ({}): applied to {} students, {:.2} each (running total {:.2})",
            app.name, app.category, app.applied_count, app.amount, running
        );
    }
    for failure in &report.failures {
        println!("❌ {} (#{}): {}", failure.name, failure.fee_item_id, failure.error);
    }

    println!("\n{}", report.summary());
    println!("Grand total: {:.2}", report.grand_total);

    if !report.is_complete() {
        bail!("{} fee items failed to apply", report.failures.len());
    }
    Ok(())
}

fn run_sync_cmd(conn: &Connection, config: &LedgerConfig) -> Result<()> {
    println!("🎁 Grant Discount Sync");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = run_grant_sync(conn, config).context("Grant sync failed")?;

    for update in &report.updated {
        println!(
            "✓ Student {} ({}): discount {:.2}, balance {:.2}",
            update.student_id, update.school_year, update.grant_discount, update.balance
        );
    }
    for update in &report.cleared_stale {
        println!(
            "✓ Student {} ({}): stale discount {:.2} cleared",
            update.student_id, update.school_year, update.previous_discount
        );
    }
    for failure in &report.failures {
        println!("❌ Student {}: {}", failure.student_id, failure.error);
    }

    println!("\n{}", report.summary());

    if report.has_failures() {
        bail!("{} ledger rows failed to sync", report.failures.len());
    }
    Ok(())
}

fn run_audit_cmd(conn: &Connection) -> Result<()> {
    println!("⚖️  Ledger Audit");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = audit_ledger(conn)?;
    for discrepancy in &report.discrepancies {
        println!(
            "❌ Student {} ({}): {}",
            discrepancy.student_id, discrepancy.school_year, discrepancy.description
        );
    }
    println!("\n{}", report.summary());

    if !report.is_balanced() {
        bail!("ledger has {} discrepancies", report.discrepancies.len());
    }
    println!("✅ Ledger balanced");
    Ok(())
}

fn run_events_cmd(
    conn: &Connection,
    entity_type: Option<&String>,
    entity_id: Option<&String>,
) -> Result<()> {
    let (Some(entity_type), Some(entity_id)) = (entity_type, entity_id) else {
        bail!("events needs an entity type and id\n\n{}", USAGE);
    };

    let events = get_events_for_entity(conn, entity_type, entity_id)?;
    if events.is_empty() {
        println!("No events for {} {}", entity_type, entity_id);
    }
    for event in events {
        println!(
            "{}  {:<24} {}  {}",
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.actor,
            event.data
        );
    }
    Ok(())
}

fn run_portal(role: Option<&String>) -> Result<()> {
    let Some(role) = role else {
        bail!("portal needs a role\n\n{}", USAGE);
    };
    let role: Role = role.parse()?;
    let portal = portal_for(role);

    println!("🧭 {} ({})", portal.label, portal.theme);
    for item in &portal.navigation {
        println!("  {:<22} {}", item.label, item.route);
    }
    Ok(())
}
