// Deduplication & Commit Engine - exact-key duplicate detection
// Two layers (intra-batch, then persisted history), then one atomic commit.

use std::collections::HashSet;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::debug;

use crate::db::{self, ExpenseRecord};

// ============================================================================
// DUPLICATE KEY
// ============================================================================

/// The duplicate key: (date_incurred, amount at cent precision, vendor).
/// Exact equality, no fuzzing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub date_incurred: NaiveDate,
    pub amount_cents: i64,
    pub vendor: String,
}

impl RecordKey {
    pub fn of(record: &ExpenseRecord) -> Self {
        RecordKey {
            date_incurred: record.date_incurred,
            amount_cents: record.amount_cents(),
            vendor: record.vendor.clone(),
        }
    }
}

// ============================================================================
// COMMIT OUTCOME
// ============================================================================

/// What the engine did with a batch of candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub inserted: usize,
    pub duplicates_skipped: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Deduplicate a batch against itself and against history, then commit the
/// survivors in a single transaction.
///
/// Intra-batch: candidates are walked in input order and the first occurrence
/// of a key wins. Cross-history: each surviving candidate is checked against
/// the store with a zero-or-one predicate query; a match skips it. Duplicates
/// are a reported outcome, never an error.
///
/// The history check is best-effort: two concurrent imports of the same
/// logical expense can both pass it and both commit (accepted limitation).
pub fn dedup_and_commit(
    conn: &mut Connection,
    candidates: Vec<ExpenseRecord>,
) -> Result<CommitOutcome> {
    let mut seen: HashSet<RecordKey> = HashSet::new();
    let mut survivors: Vec<ExpenseRecord> = Vec::new();
    let mut duplicates_skipped = 0;

    for candidate in candidates {
        let key = RecordKey::of(&candidate);

        if seen.contains(&key) {
            debug!(vendor = %candidate.vendor, date = %candidate.date_incurred,
                   "intra-batch duplicate skipped");
            duplicates_skipped += 1;
            continue;
        }

        if db::expense_exists(conn, &candidate.dedup_hash())? {
            debug!(vendor = %candidate.vendor, date = %candidate.date_incurred,
                   "already in ledger, skipped");
            seen.insert(key);
            duplicates_skipped += 1;
            continue;
        }

        seen.insert(key);
        survivors.push(candidate);
    }

    let inserted = if survivors.is_empty() {
        0
    } else {
        db::insert_expenses(conn, &survivors)?
    };

    Ok(CommitOutcome {
        inserted,
        duplicates_skipped,
    })
}

// ============================================================================
// TESTS
// ============================================================================
