//! Thread categories assigned by the rule engine or the user.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AccountId, ThreadId};

/// Inbox category for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Personal mail and anything unmatched.
    Primary,
    /// Automated notifications and receipts.
    Updates,
    /// Marketing and promotional mail.
    Promotions,
    /// Social network notifications.
    Social,
    /// Mailing lists and newsletter platforms.
    Newsletters,
}

/// Every category, in display order.
pub const ALL_CATEGORIES: [Category; 5] = [
    Category::Primary,
    Category::Updates,
    Category::Promotions,
    Category::Social,
    Category::Newsletters,
];

impl Category {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Primary => "Primary",
            Category::Updates => "Updates",
            Category::Promotions => "Promotions",
            Category::Social => "Social",
            Category::Newsletters => "Newsletters",
        }
    }

    /// Parses the database string form; unknown values fall back to Primary.
    pub fn parse(s: &str) -> Self {
        match s {
            "Updates" => Category::Updates,
            "Promotions" => Category::Promotions,
            "Social" => Category::Social,
            "Newsletters" => Category::Newsletters,
            _ => Category::Primary,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category assignment for a thread.
///
/// `is_manual` marks a user override that automated re-classification must
/// never overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadCategory {
    /// Account the thread belongs to.
    pub account_id: AccountId,
    /// The categorized thread.
    pub thread_id: ThreadId,
    /// Assigned category.
    pub category: Category,
    /// True if the user pinned this category by hand.
    pub is_manual: bool,
}
