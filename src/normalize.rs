// Amount/Date Normalizer - locale-ambiguous decimal parsing and date coercion
// Pure and stateless; every pipeline funnels raw strings through here.

use chrono::NaiveDate;

// ============================================================================
// DATE PARSING
// ============================================================================

/// Parse a date in strict `YYYY-MM-DD` form.
///
/// Anything else - wrong format, impossible calendar date ("2024-13-40"),
/// empty string - returns `fallback` unchanged. Records with unparseable
/// dates stay importable; the pipeline passes "today" as the fallback.
pub fn parse_date(raw: &str, fallback: NaiveDate) -> NaiveDate {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").unwrap_or(fallback)
}

// ============================================================================
// AMOUNT PARSING
// ============================================================================

/// Parse a raw amount string with decimal-separator inference.
///
/// Returns `None` for absent data (blank, "nan", "none") and for strings that
/// do not survive parsing - callers skip the row rather than record a
/// zero-amount expense. Sign is preserved: spreadsheet callers use it to
/// exclude inflows before taking the absolute value.
///
/// Separator rules:
/// 1. Both `,` and `.` present: the one appearing LAST is the decimal
///    separator, the other is thousands and is stripped.
///    "1.234,56" -> 1234.56, "1,234.56" -> 1234.56
/// 2. Only `,` present with <= 2 digits after the last one: `,` is the
///    decimal separator. "12,34" -> 12.34
/// 3. Otherwise `,` is stripped as a thousands separator.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower == "nan" || lower == "none" {
        return None;
    }

    // Bank exports prefix amounts with currency glyphs ("-$855.94", "€ 12,50").
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥') && !c.is_whitespace())
        .collect();

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(last_comma), Some(last_dot)) if last_comma > last_dot => {
            // European: '.' thousands, ',' decimal
            cleaned.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => {
            // Anglo: ',' thousands, '.' decimal
            cleaned.replace(',', "")
        }
        (Some(last_comma), None) => {
            if cleaned[last_comma + 1..].len() <= 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        _ => cleaned,
    };

    normalized.parse::<f64>().ok()
}

// ============================================================================
// TESTS
// ============================================================================
