// Image Extraction Pipeline - single-receipt imports
// Persist transiently, extract, normalize, attach line items, commit.
// The transient artifact is removed on every exit path.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::Local;
use rusqlite::Connection;
use tracing::debug;

use crate::category::Category;
use crate::db::{ExpenseRecord, LineItem, RecordSource};
use crate::dedup::dedup_and_commit;
use crate::gateway::{ExtractionProvider, ExtractionResult, RawLineItem};
use crate::normalize::parse_date;
use crate::pipeline::{ImportError, ImportReport};

/// Vendor used when extraction produced no merchant name at all.
const UNKNOWN_VENDOR: &str = "Unknown";

/// Receipts without an explicit currency default to EUR.
const RECEIPT_CURRENCY: &str = "EUR";

// ============================================================================
// PIPELINE
// ============================================================================

/// Import one photographed receipt.
///
/// The upload is persisted as a transient artifact in `upload_dir` for the
/// duration of the extraction call and removed unconditionally afterwards
/// (the tempfile guard drops on success, failure and panic alike). An
/// extraction failure aborts the import with a surfaced reason and zero rows
/// committed.
pub(crate) fn import(
    conn: &mut Connection,
    provider: &dyn ExtractionProvider,
    upload_dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<ImportReport, ImportError> {
    fs::create_dir_all(upload_dir)
        .with_context(|| format!("Failed to create upload dir {}", upload_dir.display()))?;

    let mut artifact = tempfile::Builder::new()
        .prefix("receipt-")
        .suffix(&suffix_of(filename))
        .tempfile_in(upload_dir)
        .context("Failed to persist transient upload")?;
    artifact
        .write_all(bytes)
        .context("Failed to persist transient upload")?;
    artifact.flush().context("Failed to persist transient upload")?;

    // Extraction reads the persisted artifact; the guard stays alive across
    // the call so failure paths still clean up.
    let image = fs::read(artifact.path()).context("Failed to read transient upload")?;
    let extraction = provider.extract_receipt(&image);
    drop(artifact);

    let extraction = extraction.map_err(|e| ImportError::Extraction(e.to_string()))?;
    let record = normalize_extraction(extraction)?;

    debug!(vendor = %record.vendor, amount = record.amount, "receipt extracted");

    let outcome = dedup_and_commit(conn, vec![record])?;

    Ok(ImportReport {
        source: RecordSource::ReceiptScan,
        rows_seen: 1,
        rows_skipped: 0,
        inserted: outcome.inserted,
        duplicates_skipped: outcome.duplicates_skipped,
    })
}

/// Preserve the upload's extension on the transient artifact name.
fn suffix_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{}", ext),
        _ => String::new(),
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Turn a sanitized extraction into a candidate record, or reject it.
///
/// An absent or zero amount is absent data, not a zero-amount expense; the
/// import is rejected with a reason rather than committing a junk record.
fn normalize_extraction(extraction: ExtractionResult) -> Result<ExpenseRecord, ImportError> {
    let amount = match extraction.amount {
        Some(amount) if amount != 0.0 => amount.abs(),
        _ => {
            return Err(ImportError::Extraction(
                "no usable total amount on receipt".to_string(),
            ));
        }
    };

    let vendor = extraction
        .vendor
        .unwrap_or_else(|| UNKNOWN_VENDOR.to_string());

    let date_incurred = parse_date(
        extraction.date.as_deref().unwrap_or_default(),
        Local::now().date_naive(),
    );

    let line_items = extraction
        .line_items
        .into_iter()
        .filter_map(coerce_line_item)
        .collect();

    Ok(ExpenseRecord {
        vendor,
        amount,
        currency: extraction
            .currency
            .unwrap_or_else(|| RECEIPT_CURRENCY.to_string()),
        date_incurred,
        category: Category::from_provider(extraction.category.as_deref()),
        description: extraction.description,
        source: RecordSource::ReceiptScan,
        line_items,
    })
}

/// Coerce a raw line item into the stored shape: quantity >= 0 defaulting to
/// 1.0; items without a name or price carry no information and are dropped.
fn coerce_line_item(raw: RawLineItem) -> Option<LineItem> {
    let name = raw.name?;
    let price = raw.price?;

    Some(LineItem {
        name,
        quantity: raw.quantity.unwrap_or(1.0).max(0.0),
        price,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_expenses, get_all_expenses, setup_database};
    use crate::gateway::stub::StubProvider;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn extraction_fixture() -> ExtractionResult {
        ExtractionResult {
            vendor: Some("REWE".to_string()),
            amount: Some(23.45),
            currency: Some("EUR".to_string()),
            date: Some("2024-11-02".to_string()),
            category: Some("Groceries".to_string()),
            description: Some("Weekly grocery run".to_string()),
            line_items: vec![
                RawLineItem {
                    name: Some("Milk".to_string()),
                    quantity: Some(2.0),
                    price: Some(2.38),
                },
                RawLineItem {
                    name: Some("Bread".to_string()),
                    quantity: None,
                    price: Some(1.99),
                },
            ],
        }
    }

    #[test]
    fn test_import_happy_path() {
        let mut conn = test_conn();
        let provider = StubProvider::with_receipt(extraction_fixture());
        let dir = tempfile::tempdir().unwrap();

        let report = import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap();

        assert_eq!(report.source, RecordSource::ReceiptScan);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates_skipped, 0);

        let stored = get_all_expenses(&conn).unwrap();
        let expense = &stored[0].expense;
        assert_eq!(expense.vendor, "REWE");
        assert_eq!(expense.amount, 23.45);
        assert_eq!(expense.category, Category::Groceries);
        assert_eq!(expense.line_items.len(), 2);
        // Missing quantity defaulted to 1.0.
        assert_eq!(expense.line_items[1].quantity, 1.0);
    }

    #[test]
    fn test_import_extraction_failure_commits_nothing_and_cleans_up() {
        let mut conn = test_conn();
        let provider = StubProvider::failing();
        let dir = tempfile::tempdir().unwrap();

        let err =
            import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap_err();

        assert!(matches!(err, ImportError::Extraction(_)));
        assert_eq!(count_expenses(&conn).unwrap(), 0);

        // Transient artifact removed despite the failure.
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0, "transient upload must be removed");
    }

    #[test]
    fn test_import_removes_artifact_on_success_too() {
        let mut conn = test_conn();
        let provider = StubProvider::with_receipt(extraction_fixture());
        let dir = tempfile::tempdir().unwrap();

        import(&mut conn, &provider, dir.path(), "receipt.png", b"pngbytes").unwrap();

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_import_missing_amount_is_rejected_not_zero() {
        let mut conn = test_conn();
        let mut extraction = extraction_fixture();
        extraction.amount = None;
        let provider = StubProvider::with_receipt(extraction);
        let dir = tempfile::tempdir().unwrap();

        let err =
            import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap_err();
        assert!(matches!(err, ImportError::Extraction(_)));
        assert_eq!(count_expenses(&conn).unwrap(), 0);
    }

    #[test]
    fn test_import_negative_total_stored_positive() {
        let mut conn = test_conn();
        let mut extraction = extraction_fixture();
        extraction.amount = Some(-23.45);
        let provider = StubProvider::with_receipt(extraction);
        let dir = tempfile::tempdir().unwrap();

        import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap();
        let stored = get_all_expenses(&conn).unwrap();
        assert_eq!(stored[0].expense.amount, 23.45);
    }

    #[test]
    fn test_import_defaults_for_sparse_extraction() {
        let mut conn = test_conn();
        let extraction = ExtractionResult {
            amount: Some(9.99),
            date: Some("not a date".to_string()),
            ..ExtractionResult::default()
        };
        let provider = StubProvider::with_receipt(extraction);
        let dir = tempfile::tempdir().unwrap();

        import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap();

        let stored = get_all_expenses(&conn).unwrap();
        let expense = &stored[0].expense;
        assert_eq!(expense.vendor, UNKNOWN_VENDOR);
        assert_eq!(expense.currency, RECEIPT_CURRENCY);
        assert_eq!(expense.category, Category::Other);
        assert_eq!(expense.date_incurred, Local::now().date_naive());
    }

    #[test]
    fn test_import_category_outside_closed_set_coerced() {
        let mut conn = test_conn();
        let mut extraction = extraction_fixture();
        extraction.category = Some("Luxury Yachts".to_string());
        let provider = StubProvider::with_receipt(extraction);
        let dir = tempfile::tempdir().unwrap();

        import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap();
        let stored = get_all_expenses(&conn).unwrap();
        assert_eq!(stored[0].expense.category, Category::Other);
    }

    #[test]
    fn test_rescanning_same_receipt_is_a_duplicate() {
        let mut conn = test_conn();
        let provider = StubProvider::with_receipt(extraction_fixture());
        let dir = tempfile::tempdir().unwrap();

        let first = import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap();
        assert_eq!(first.inserted, 1);

        let second = import(&mut conn, &provider, dir.path(), "receipt.jpg", b"jpegbytes").unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates_skipped, 1);
        assert_eq!(count_expenses(&conn).unwrap(), 1);
    }

    #[test]
    fn test_coerce_line_item_rules() {
        // Negative quantity clamps to zero.
        let item = coerce_line_item(RawLineItem {
            name: Some("Deposit refund".to_string()),
            quantity: Some(-1.0),
            price: Some(0.25),
        })
        .unwrap();
        assert_eq!(item.quantity, 0.0);

        // Nameless or priceless items carry no information.
        assert!(coerce_line_item(RawLineItem {
            name: None,
            quantity: Some(1.0),
            price: Some(1.0),
        })
        .is_none());
        assert!(coerce_line_item(RawLineItem {
            name: Some("Coffee".to_string()),
            quantity: None,
            price: None,
        })
        .is_none());
    }
}
