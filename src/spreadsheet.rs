// Spreadsheet Extraction Pipeline - statement imports
// Load -> Clean -> MapColumns -> MapVendors -> RowWalk -> Dedup -> Commit.
// Column mapping is fail-closed, everything per-row is fail-open.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::Local;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::classifier::SpreadsheetFormat;
use crate::db::{ExpenseRecord, RecordSource};
use crate::dedup::dedup_and_commit;
use crate::gateway::ExtractionProvider;
use crate::normalize::{parse_amount, parse_date};
use crate::pipeline::{ImportError, ImportReport};
use crate::vendor::{unique_vendors, VendorMap};

/// Rows included in the column-mapping sample. The sample only needs to be
/// structurally indicative, not representative.
const SAMPLE_ROWS: usize = 5;

/// Statement files carry no currency column; imports default to EUR.
const STATEMENT_CURRENCY: &str = "EUR";

// ============================================================================
// TABLE
// ============================================================================

/// An uploaded table, decoded to strings. Header names are the coordinate
/// system the column mapping is expressed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Drop rows that are empty across all columns and columns that are
    /// empty across all rows. Runs before sampling or row-walking.
    pub fn clean(&mut self) {
        self.rows
            .retain(|row| row.iter().any(|cell| !cell.trim().is_empty()));

        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }

        let keep: Vec<usize> = (0..width)
            .filter(|&col| {
                self.rows.is_empty() || self.rows.iter().any(|row| !row[col].trim().is_empty())
            })
            .collect();

        if keep.len() != width {
            self.headers = keep.iter().map(|&col| self.headers[col].clone()).collect();
            self.rows = self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&col| row[col].clone()).collect())
                .collect();
        }
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Header row plus the first `n` data rows, rendered as CSV for the
    /// column-mapping prompt.
    pub fn sample_csv(&self, n: usize) -> String {
        let mut out = self.headers.join(",");
        for row in self.rows.iter().take(n) {
            out.push('\n');
            out.push_str(&row.join(","));
        }
        out
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Decode upload bytes into a Table per the classifier's format decision.
pub fn load_table(format: SpreadsheetFormat, bytes: &[u8]) -> Result<Table, ImportError> {
    match format {
        SpreadsheetFormat::Csv => load_csv_table(bytes),
        SpreadsheetFormat::Workbook => load_workbook_table(bytes),
    }
}

/// Guess the delimiter from the header line. European bank exports often use
/// ';', some use tabs; plain ',' is the fallback.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes
        .split(|&b| b == b'\n')
        .next()
        .unwrap_or_default();

    // max_by_key keeps the last maximum, so ',' wins an all-zero tie.
    let candidates = [b';', b'\t', b','];
    candidates
        .into_iter()
        .max_by_key(|&delim| first_line.iter().filter(|&&b| b == delim).count())
        .unwrap_or(b',')
}

fn load_csv_table(bytes: &[u8]) -> Result<Table, ImportError> {
    let delimiter = sniff_delimiter(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = Vec::new();
    for result in reader.records() {
        let record =
            result.map_err(|e| ImportError::UnreadableInput(format!("csv parse: {}", e)))?;
        records.push(record.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
    }

    let mut iter = records.into_iter();
    let headers = iter
        .next()
        .ok_or_else(|| ImportError::UnreadableInput("empty file".to_string()))?;

    Ok(Table {
        headers,
        rows: iter.collect(),
    })
}

fn load_workbook_table(bytes: &[u8]) -> Result<Table, ImportError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| ImportError::UnreadableInput(format!("workbook open: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::UnreadableInput("workbook has no sheets".to_string()))?
        .map_err(|e| ImportError::UnreadableInput(format!("worksheet read: {}", e)))?;

    let mut rows = range.rows().map(|row| {
        row.iter()
            .map(|cell| match cell {
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
    });

    let headers = rows
        .next()
        .ok_or_else(|| ImportError::UnreadableInput("empty sheet".to_string()))?;

    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run the full statement import over uploaded spreadsheet bytes.
pub(crate) fn import(
    conn: &mut Connection,
    provider: &dyn ExtractionProvider,
    format: SpreadsheetFormat,
    bytes: &[u8],
) -> Result<ImportReport, ImportError> {
    let mut table = load_table(format, bytes)?;
    table.clean();

    if table.rows.is_empty() {
        // Nothing to map or import; not an error.
        return Ok(ImportReport {
            source: RecordSource::StatementImport,
            rows_seen: 0,
            rows_skipped: 0,
            inserted: 0,
            duplicates_skipped: 0,
        });
    }

    // MapColumns: fail-closed. Never guess a column - a wrong mapping would
    // silently import wrong data for every row.
    let mapping = provider
        .map_columns(&table.sample_csv(SAMPLE_ROWS))
        .map_err(|e| ImportError::ColumnMapping(e.to_string()))?;

    let (date_idx, vendor_idx, amount_idx) = match (
        table.column_index(&mapping.date_column),
        table.column_index(&mapping.vendor_column),
        table.column_index(&mapping.amount_column),
    ) {
        (Some(d), Some(v), Some(a)) => (d, v, a),
        _ => {
            return Err(ImportError::ColumnMapping(format!(
                "mapped headers not present in table: {:?} / {:?} / {:?}",
                mapping.date_column, mapping.vendor_column, mapping.amount_column
            )));
        }
    };

    // MapVendors: fail-open. A failed call degrades quality (raw vendor
    // strings, Uncategorized), never blocks the import.
    let raw_vendors = unique_vendors(table.rows.iter().map(|row| row[vendor_idx].as_str()));
    let vendor_map = if raw_vendors.is_empty() {
        VendorMap::empty()
    } else {
        match provider.map_vendors(&raw_vendors) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "vendor mapping degraded to raw strings");
                VendorMap::empty()
            }
        }
    };

    // RowWalk: sequential, one bad row never aborts the batch.
    let today = Local::now().date_naive();
    let mut candidates = Vec::new();
    let mut rows_skipped = 0;

    for row in &table.rows {
        let amount = match parse_amount(&row[amount_idx]) {
            Some(amount) => amount,
            None => {
                debug!(cell = %row[amount_idx], "row skipped: unparseable amount");
                rows_skipped += 1;
                continue;
            }
        };

        // Only outflows are tracked; incoming funds are excluded.
        if amount >= 0.0 {
            rows_skipped += 1;
            continue;
        }

        let (vendor, category) = vendor_map.resolve(row[vendor_idx].trim());

        candidates.push(ExpenseRecord {
            vendor,
            amount: amount.abs(),
            currency: STATEMENT_CURRENCY.to_string(),
            date_incurred: parse_date(&row[date_idx], today),
            category,
            description: None,
            source: RecordSource::StatementImport,
            line_items: Vec::new(),
        });
    }

    let rows_seen = table.rows.len();
    let outcome = dedup_and_commit(conn, candidates)?;

    Ok(ImportReport {
        source: RecordSource::StatementImport,
        rows_seen,
        rows_skipped,
        inserted: outcome.inserted,
        duplicates_skipped: outcome.duplicates_skipped,
    })
}

// ============================================================================
// TESTS
// ============================================================================
