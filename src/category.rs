// Category - closed expense category set
// Extraction output is constrained to this set; anything else is coerced.

use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORY
// ============================================================================

/// The closed category set expense records are constrained to.
///
/// `Uncategorized` is deliberately NOT part of the set the extraction provider
/// may choose from: it marks rows for which no category information existed at
/// all (statement rows whose vendor the provider failed to map). Coercion of
/// unknown provider output lands on `Other`, never on `Uncategorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Groceries,
    Dining,
    Transport,
    Utilities,
    Shopping,
    Entertainment,
    Health,
    Travel,
    Home,
    Other,
    Uncategorized,
}

/// Categories the extraction provider is allowed to answer with,
/// in the order they are listed in the prompt.
pub const EXTRACTION_CATEGORIES: [Category; 10] = [
    Category::Groceries,
    Category::Dining,
    Category::Transport,
    Category::Utilities,
    Category::Shopping,
    Category::Entertainment,
    Category::Health,
    Category::Travel,
    Category::Home,
    Category::Other,
];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Groceries => "Groceries",
            Category::Dining => "Dining",
            Category::Transport => "Transport",
            Category::Utilities => "Utilities",
            Category::Shopping => "Shopping",
            Category::Entertainment => "Entertainment",
            Category::Health => "Health",
            Category::Travel => "Travel",
            Category::Home => "Home",
            Category::Other => "Other",
            Category::Uncategorized => "Uncategorized",
        }
    }

    /// Parse a stored category string. Unknown values map to `Other` so old
    /// rows survive taxonomy changes.
    pub fn parse(s: &str) -> Category {
        match s.trim() {
            "Groceries" => Category::Groceries,
            "Dining" => Category::Dining,
            "Transport" => Category::Transport,
            "Utilities" => Category::Utilities,
            "Shopping" => Category::Shopping,
            "Entertainment" => Category::Entertainment,
            "Health" => Category::Health,
            "Travel" => Category::Travel,
            "Home" => Category::Home,
            "Uncategorized" => Category::Uncategorized,
            _ => Category::Other,
        }
    }

    /// Constrain extraction-provider output to the closed set.
    ///
    /// Matching is case-insensitive on the canonical names; anything the
    /// provider invents outside the set is coerced to `Other`. Absent input
    /// also lands on `Other` (the provider was asked and gave nothing usable).
    pub fn from_provider(raw: Option<&str>) -> Category {
        let raw = match raw {
            Some(r) if !r.trim().is_empty() => r.trim(),
            _ => return Category::Other,
        };

        for category in EXTRACTION_CATEGORIES {
            if raw.eq_ignore_ascii_case(category.as_str()) {
                return category;
            }
        }

        Category::Other
    }

    /// Prompt fragment listing the allowed categories.
    pub fn prompt_list() -> String {
        EXTRACTION_CATEGORIES
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
