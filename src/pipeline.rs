// Ingestion dispatcher - classify an upload and run the matching pipeline
// Also owns the batch-level error taxonomy and the report returned to callers.

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

use crate::classifier::{classify, UploadFormat};
use crate::db::RecordSource;
use crate::gateway::ExtractionProvider;
use crate::{receipt, spreadsheet};

// ============================================================================
// ERRORS
// ============================================================================

/// Batch-terminating failures. Every variant means zero rows were committed;
/// per-row problems never surface here (they degrade inside the pipelines).
#[derive(Debug, Error)]
pub enum ImportError {
    /// Filename suffix matched no pipeline. Deterministic rejection.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Bytes could not be parsed as the classified format.
    #[error("could not read spreadsheet: {0}")]
    UnreadableInput(String),

    /// Column mapping failed or named headers absent from the table.
    /// Fail-closed: a bad mapping would corrupt every row.
    #[error("could not map spreadsheet columns: {0}")]
    ColumnMapping(String),

    /// Receipt extraction failed; the single-record import is aborted.
    #[error("receipt extraction failed: {0}")]
    Extraction(String),

    /// Store or filesystem fault.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ============================================================================
// REPORT
// ============================================================================

/// Outcome of one upload import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub source: RecordSource,
    /// Rows walked (spreadsheet) or 1 (receipt).
    pub rows_seen: usize,
    /// Rows dropped by per-row degradation (unparseable amount, inflow).
    pub rows_skipped: usize,
    pub inserted: usize,
    pub duplicates_skipped: usize,
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Import one uploaded artifact end to end.
///
/// Classification is by filename suffix only; the byte content is handed
/// untouched to the selected pipeline. Unsupported uploads are rejected
/// before any side effect.
pub fn import_upload(
    conn: &mut Connection,
    provider: &dyn ExtractionProvider,
    upload_dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<ImportReport, ImportError> {
    let report = match classify(filename) {
        UploadFormat::Spreadsheet(format) => spreadsheet::import(conn, provider, format, bytes)?,
        UploadFormat::Image => receipt::import(conn, provider, upload_dir, filename, bytes)?,
        UploadFormat::Unsupported => {
            return Err(ImportError::UnsupportedFormat(filename.to_string()));
        }
    };

    info!(
        filename,
        inserted = report.inserted,
        duplicates = report.duplicates_skipped,
        skipped = report.rows_skipped,
        "import finished"
    );

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
