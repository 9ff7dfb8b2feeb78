// Format Classifier - decide which pipeline handles an uploaded artifact
// Suffix matching only; content sniffing is deliberately out of scope.

use serde::{Deserialize, Serialize};

// ============================================================================
// UPLOAD FORMAT
// ============================================================================

/// How spreadsheet bytes should be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadsheetFormat {
    /// Delimited text (.csv)
    Csv,

    /// Excel workbook (.xls / .xlsx)
    Workbook,
}

/// Classification result for an uploaded artifact.
///
/// `Unsupported` is a value, not an error: the dispatcher turns it into a
/// deterministic rejection so classification itself never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadFormat {
    Spreadsheet(SpreadsheetFormat),
    Image,
    Unsupported,
}

/// Classify an upload by filename extension (case-insensitive).
///
/// `.csv` / `.xls` / `.xlsx` -> spreadsheet, `.png` / `.jpg` / `.jpeg` ->
/// image, everything else -> unsupported. Pure: the byte content is never
/// inspected.
pub fn classify(filename: &str) -> UploadFormat {
    let lower = filename.to_lowercase();

    if lower.ends_with(".csv") {
        UploadFormat::Spreadsheet(SpreadsheetFormat::Csv)
    } else if lower.ends_with(".xls") || lower.ends_with(".xlsx") {
        UploadFormat::Spreadsheet(SpreadsheetFormat::Workbook)
    } else if lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        UploadFormat::Image
    } else {
        UploadFormat::Unsupported
    }
}

// ============================================================================
// TESTS
// ============================================================================
