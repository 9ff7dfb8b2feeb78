use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::category::Category;

// ============================================================================
// MODELS
// ============================================================================

/// Where a record entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordSource {
    Manual,
    ReceiptScan,
    StatementImport,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Manual => "manual",
            RecordSource::ReceiptScan => "receipt-scan",
            RecordSource::StatementImport => "statement-import",
        }
    }

    pub fn parse(s: &str) -> RecordSource {
        match s {
            "receipt-scan" => RecordSource::ReceiptScan,
            "statement-import" => RecordSource::StatementImport,
            _ => RecordSource::Manual,
        }
    }
}

/// A single purchased item on a receipt.
///
/// Owned by exactly one ExpenseRecord; the row cascades away with its parent.
/// `price` is the total line price, not a unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: f64,
    pub price: f64,
}

/// The canonical expense record produced by a pipeline run.
///
/// `amount` is always stored positive; direction was resolved during
/// extraction. Never mutated by the pipeline after commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub vendor: String,
    pub amount: f64,
    pub currency: String,
    pub date_incurred: NaiveDate,
    pub category: Category,
    pub description: Option<String>,
    pub source: RecordSource,
    pub line_items: Vec<LineItem>,
}

impl ExpenseRecord {
    /// Amount at cent precision. Duplicate keys compare amounts here so that
    /// float formatting differences cannot split a key.
    pub fn amount_cents(&self) -> i64 {
        (self.amount * 100.0).round() as i64
    }

    /// Hash of the duplicate key (date_incurred, amount, vendor).
    /// Used for indexed history lookups; exact equality, no fuzzing.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.date_incurred,
            self.amount_cents(),
            self.vendor
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// A persisted expense with its surrogate id.
#[derive(Debug, Clone, Serialize)]
pub struct StoredExpense {
    pub id: i64,
    #[serde(flatten)]
    pub expense: ExpenseRecord,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery; foreign keys for line-item cascade
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dedup_hash TEXT NOT NULL,
            vendor TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL,
            date_incurred TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT,
            source TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS line_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            expense_id INTEGER NOT NULL
                REFERENCES expenses(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            quantity REAL NOT NULL DEFAULT 1.0,
            price REAL NOT NULL
        )",
        [],
    )?;

    // Non-unique on purpose: cross-history dedup is a best-effort pre-commit
    // check, not a store-enforced constraint (see DESIGN.md).
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_dedup_hash ON expenses(dedup_hash)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date_incurred)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_line_items_expense ON line_items(expense_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

/// Insert a batch of expense records in a single transaction.
///
/// Either every record (with its line items) becomes visible or none does.
/// Duplicate filtering happens upstream in the dedup engine; this function
/// inserts exactly what it is given.
pub fn insert_expenses(conn: &mut Connection, records: &[ExpenseRecord]) -> Result<usize> {
    let tx = conn
        .transaction()
        .context("Failed to begin insert transaction")?;

    for record in records {
        tx.execute(
            "INSERT INTO expenses (
                dedup_hash, vendor, amount, currency, date_incurred,
                category, description, source
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.dedup_hash(),
                record.vendor,
                record.amount,
                record.currency,
                record.date_incurred.to_string(),
                record.category.as_str(),
                record.description,
                record.source.as_str(),
            ],
        )?;

        let expense_id = tx.last_insert_rowid();

        for (position, item) in record.line_items.iter().enumerate() {
            tx.execute(
                "INSERT INTO line_items (expense_id, position, name, quantity, price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    expense_id,
                    position as i64,
                    item.name,
                    item.quantity,
                    item.price
                ],
            )?;
        }
    }

    tx.commit().context("Failed to commit expense batch")?;

    Ok(records.len())
}

/// Delete an expense by id; line items cascade. Returns whether a row existed.
pub fn delete_expense(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM expenses WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

// ============================================================================
// QUERIES
// ============================================================================

/// Zero-or-one predicate query on the duplicate key, via its hash.
pub fn expense_exists(conn: &Connection, dedup_hash: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM expenses WHERE dedup_hash = ?1 LIMIT 1")?;
    let found = stmt.exists(params![dedup_hash])?;
    Ok(found)
}

pub fn get_all_expenses(conn: &Connection) -> Result<Vec<StoredExpense>> {
    let mut stmt = conn.prepare(
        "SELECT id, vendor, amount, currency, date_incurred,
                category, description, source
         FROM expenses
         ORDER BY date_incurred DESC, id DESC",
    )?;

    let mut expenses = stmt
        .query_map([], |row| {
            let date_str: String = row.get(4)?;
            let category_str: String = row.get(5)?;
            let source_str: String = row.get(7)?;

            Ok(StoredExpense {
                id: row.get(0)?,
                expense: ExpenseRecord {
                    vendor: row.get(1)?,
                    amount: row.get(2)?,
                    currency: row.get(3)?,
                    date_incurred: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                    category: Category::parse(&category_str),
                    description: row.get(6)?,
                    source: RecordSource::parse(&source_str),
                    line_items: Vec::new(),
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for stored in &mut expenses {
        stored.expense.line_items = get_line_items(conn, stored.id)?;
    }

    Ok(expenses)
}

fn get_line_items(conn: &Connection, expense_id: i64) -> Result<Vec<LineItem>> {
    let mut stmt = conn.prepare(
        "SELECT name, quantity, price
         FROM line_items
         WHERE expense_id = ?1
         ORDER BY position",
    )?;

    let items = stmt
        .query_map(params![expense_id], |row| {
            Ok(LineItem {
                name: row.get(0)?,
                quantity: row.get(1)?,
                price: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

pub fn count_expenses(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn create_test_expense(
        date: &str,
        amount: f64,
        vendor: &str,
        source: RecordSource,
    ) -> ExpenseRecord {
        ExpenseRecord {
            vendor: vendor.to_string(),
            amount,
            currency: "EUR".to_string(),
            date_incurred: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            category: Category::Groceries,
            description: None,
            source,
            line_items: Vec::new(),
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_query_roundtrip() {
        let mut conn = test_conn();

        let mut record =
            create_test_expense("2024-12-25", 45.99, "REWE", RecordSource::ReceiptScan);
        record.description = Some("Weekly groceries".to_string());
        record.line_items = vec![
            LineItem {
                name: "Milk".to_string(),
                quantity: 2.0,
                price: 2.38,
            },
            LineItem {
                name: "Bread".to_string(),
                quantity: 1.0,
                price: 1.99,
            },
        ];

        let inserted = insert_expenses(&mut conn, &[record]).unwrap();
        assert_eq!(inserted, 1);

        let stored = get_all_expenses(&conn).unwrap();
        assert_eq!(stored.len(), 1);
        let expense = &stored[0].expense;
        assert_eq!(expense.vendor, "REWE");
        assert_eq!(expense.amount, 45.99);
        assert_eq!(expense.category, Category::Groceries);
        assert_eq!(expense.source, RecordSource::ReceiptScan);
        assert_eq!(expense.line_items.len(), 2);
        assert_eq!(expense.line_items[0].name, "Milk");
        assert_eq!(expense.line_items[1].price, 1.99);
    }

    #[test]
    fn test_expense_exists_by_dedup_hash() {
        let mut conn = test_conn();

        let record =
            create_test_expense("2024-12-25", 45.99, "REWE", RecordSource::StatementImport);
        let hash = record.dedup_hash();

        assert!(!expense_exists(&conn, &hash).unwrap());
        insert_expenses(&mut conn, &[record]).unwrap();
        assert!(expense_exists(&conn, &hash).unwrap());
    }

    #[test]
    fn test_dedup_hash_depends_on_key_only() {
        let a = create_test_expense("2024-12-25", 45.99, "REWE", RecordSource::ReceiptScan);
        let mut b =
            create_test_expense("2024-12-25", 45.99, "REWE", RecordSource::StatementImport);
        b.description = Some("different metadata".to_string());
        b.category = Category::Dining;

        // Same (date, amount, vendor) triple -> same key, whatever else differs.
        assert_eq!(a.dedup_hash(), b.dedup_hash());

        let c = create_test_expense("2024-12-26", 45.99, "REWE", RecordSource::ReceiptScan);
        assert_ne!(a.dedup_hash(), c.dedup_hash());
    }

    #[test]
    fn test_line_items_cascade_on_delete() {
        let mut conn = test_conn();

        let mut record =
            create_test_expense("2024-12-25", 12.50, "Kiosk", RecordSource::ReceiptScan);
        record.line_items = vec![LineItem {
            name: "Coffee".to_string(),
            quantity: 1.0,
            price: 12.50,
        }];
        insert_expenses(&mut conn, &[record]).unwrap();

        let stored = get_all_expenses(&conn).unwrap();
        assert!(delete_expense(&conn, stored[0].id).unwrap());

        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM line_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0, "line items must cascade with their parent");
    }

    #[test]
    fn test_delete_missing_expense_reports_false() {
        let conn = test_conn();
        assert!(!delete_expense(&conn, 999).unwrap());
    }

    #[test]
    fn test_count_expenses() {
        let mut conn = test_conn();
        assert_eq!(count_expenses(&conn).unwrap(), 0);

        let records = vec![
            create_test_expense("2024-12-25", 45.99, "REWE", RecordSource::StatementImport),
            create_test_expense("2024-12-26", 9.80, "Aldi", RecordSource::StatementImport),
        ];
        insert_expenses(&mut conn, &records).unwrap();
        assert_eq!(count_expenses(&conn).unwrap(), 2);
    }
}
