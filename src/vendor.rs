// Vendor/Category Normalizer - per-batch vendor canonicalization
// One batched gateway call per import; the resulting map is applied per row.

use std::collections::{HashMap, HashSet};

use crate::category::Category;

// ============================================================================
// VENDOR MAP
// ============================================================================

/// Canonical form and category for one raw vendor string.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorInfo {
    pub vendor: String,
    pub category: Category,
}

/// Ephemeral dictionary from raw vendor string to its normalized form,
/// computed once per batch and reused for every row sharing that raw string.
///
/// Lookup is by exact raw string; a miss degrades to the raw string verbatim
/// with category `Uncategorized`, so a partial (or entirely failed) mapping
/// call can never block a row.
#[derive(Debug, Clone, Default)]
pub struct VendorMap {
    entries: HashMap<String, VendorInfo>,
}

impl VendorMap {
    /// The degraded map: every lookup falls back.
    pub fn empty() -> Self {
        VendorMap::default()
    }

    pub fn insert(&mut self, raw: String, info: VendorInfo) {
        self.entries.insert(raw, info);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a raw vendor string to (normalized vendor, category).
    pub fn resolve(&self, raw: &str) -> (String, Category) {
        match self.entries.get(raw) {
            Some(info) => (info.vendor.clone(), info.category),
            None => (raw.to_string(), Category::Uncategorized),
        }
    }
}

/// Collect the unique raw vendor strings of a batch in first-seen order.
///
/// First-seen order keeps the gateway prompt deterministic for a given input
/// file. Blank cells are not vendors and are not sent to the provider.
pub fn unique_vendors<'a, I>(raw_values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for raw in raw_values {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            ordered.push(trimmed.to_string());
        }
    }

    ordered
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_vendor() {
        let mut map = VendorMap::empty();
        map.insert(
            "REWE Markt GmbH".to_string(),
            VendorInfo {
                vendor: "REWE".to_string(),
                category: Category::Groceries,
            },
        );

        let (vendor, category) = map.resolve("REWE Markt GmbH");
        assert_eq!(vendor, "REWE");
        assert_eq!(category, Category::Groceries);
    }

    #[test]
    fn test_resolve_unknown_vendor_falls_back_verbatim() {
        let map = VendorMap::empty();
        let (vendor, category) = map.resolve("MYSTERY SHOP 042");
        assert_eq!(vendor, "MYSTERY SHOP 042");
        assert_eq!(category, Category::Uncategorized);
    }

    #[test]
    fn test_resolve_is_exact_not_fuzzy() {
        let mut map = VendorMap::empty();
        map.insert(
            "Starbucks #4521".to_string(),
            VendorInfo {
                vendor: "Starbucks".to_string(),
                category: Category::Dining,
            },
        );

        // A near-miss raw string is a miss: per-batch maps are keyed on the
        // exact strings that were collected from this batch.
        let (vendor, category) = map.resolve("Starbucks #9999");
        assert_eq!(vendor, "Starbucks #9999");
        assert_eq!(category, Category::Uncategorized);
    }

    #[test]
    fn test_unique_vendors_first_seen_order() {
        let raws = ["REWE", "Aldi", "REWE", "Shell", "Aldi"];
        assert_eq!(
            unique_vendors(raws.iter().copied()),
            vec!["REWE", "Aldi", "Shell"]
        );
    }

    #[test]
    fn test_unique_vendors_skips_blank_and_trims() {
        let raws = ["  REWE ", "", "   ", "REWE"];
        assert_eq!(unique_vendors(raws.iter().copied()), vec!["REWE"]);
    }
}
