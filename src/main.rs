use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::fs;
use std::path::Path;

use expense_ledger::{
    count_expenses, get_all_expenses, import_upload, setup_database, AppConfig,
    ExtractionGateway, ImportError,
};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(),
        Some("import") if args.len() > 2 => run_import(&args[2..]),
        Some("list") => run_list(),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("expense-ledger {}", expense_ledger::VERSION);
    println!();
    println!("Usage:");
    println!("  expense-ledger init              Create the ledger database");
    println!("  expense-ledger import <file>...  Import receipts (.png/.jpg/.jpeg)");
    println!("                                   and statements (.csv/.xls/.xlsx)");
    println!("  expense-ledger list              Print all expenses");
}

fn run_init() -> Result<()> {
    let config = AppConfig::from_env();

    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    setup_database(&conn)?;

    println!("✓ Database initialized: {}", config.db_path.display());
    Ok(())
}

fn run_import(files: &[String]) -> Result<()> {
    let config = AppConfig::from_env();

    let mut conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    setup_database(&conn)?;

    let gateway = ExtractionGateway::new(config.gateway.clone())?;

    let mut total_inserted = 0;
    let mut total_duplicates = 0;

    for file in files {
        let path = Path::new(file);
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file.as_str());

        println!("Importing {}...", filename);

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("  ✗ Could not read {}: {}", file, e);
                continue;
            }
        };

        match import_upload(&mut conn, &gateway, &config.upload_dir, filename, &bytes) {
            Ok(report) => {
                println!(
                    "  ✓ Inserted: {}  duplicates skipped: {}  rows skipped: {}",
                    report.inserted, report.duplicates_skipped, report.rows_skipped
                );
                total_inserted += report.inserted;
                total_duplicates += report.duplicates_skipped;
            }
            Err(ImportError::UnsupportedFormat(name)) => {
                eprintln!("  ✗ Unsupported file format: {}", name);
            }
            Err(e) => {
                eprintln!("  ✗ Import failed: {}", e);
            }
        }
    }

    let count = count_expenses(&conn)?;
    println!();
    println!("✓ Imported {} new expenses ({} duplicates skipped)", total_inserted, total_duplicates);
    println!("✓ Ledger contains {} expenses", count);

    Ok(())
}

fn run_list() -> Result<()> {
    let config = AppConfig::from_env();

    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    setup_database(&conn)?;

    let expenses = get_all_expenses(&conn)?;

    if expenses.is_empty() {
        println!("Ledger is empty. Import something first.");
        return Ok(());
    }

    for stored in &expenses {
        let expense = &stored.expense;
        println!(
            "{}  {:>10.2} {}  {:<14} {}  [{}]",
            expense.date_incurred,
            expense.amount,
            expense.currency,
            expense.category.as_str(),
            expense.vendor,
            expense.source.as_str(),
        );
        for item in &expense.line_items {
            println!("    - {} x{:.1}  {:.2}", item.name, item.quantity, item.price);
        }
    }

    println!();
    println!("✓ {} expenses", expenses.len());

    Ok(())
}
