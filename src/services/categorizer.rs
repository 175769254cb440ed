//! Deterministic categorization rules.
//!
//! A priority cascade, not a scoring system: the first layer that matches
//! wins. Runs synchronously inside message ingestion, so it does no I/O.
//!
//! 1. Provider-native category labels.
//! 2. Sender heuristics: social domains, newsletter platforms, then
//!    promotional and notification local-part prefixes.
//! 3. List-Unsubscribe header presence.
//! 4. Default.

use crate::domain::Category;

const SOCIAL_DOMAINS: &[&str] = &[
    "facebookmail.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "pinterest.com",
    "tiktok.com",
    "reddit.com",
    "snapchat.com",
    "tumblr.com",
    "nextdoor.com",
    "meetup.com",
    "discord.com",
    "mastodon.social",
];

const NEWSLETTER_DOMAINS: &[&str] = &[
    "substack.com",
    "mailchimp.com",
    "convertkit.com",
    "beehiiv.com",
    "buttondown.email",
    "revue.email",
    "ghost.io",
    "tinyletter.com",
    "sendinblue.com",
    "mailerlite.com",
    "campaignmonitor.com",
    "constantcontact.com",
    "getresponse.com",
    "aweber.com",
];

const PROMO_PREFIXES: &[&str] = &[
    "marketing",
    "promo",
    "promotions",
    "deals",
    "offers",
    "sales",
    "shop",
    "store",
    "newsletter",
    "info",
    "hello",
];

const UPDATE_PREFIXES: &[&str] = &[
    "noreply",
    "no-reply",
    "notifications",
    "notification",
    "notify",
    "alerts",
    "alert",
    "donotreply",
    "do-not-reply",
    "mailer-daemon",
    "postmaster",
    "support",
    "billing",
    "account",
    "security",
    "verify",
    "confirm",
];

/// Categorizes a message from its labels, sender and unsubscribe header.
pub fn categorize(
    labels: &[String],
    from_address: Option<&str>,
    list_unsubscribe: Option<&str>,
) -> Category {
    // Layer 1: provider-native category labels.
    for label in labels {
        match label.as_str() {
            "CATEGORY_PROMOTIONS" => return Category::Promotions,
            "CATEGORY_SOCIAL" => return Category::Social,
            "CATEGORY_UPDATES" => return Category::Updates,
            // Forums and personal both collapse to the default category.
            "CATEGORY_FORUMS" | "CATEGORY_PERSONAL" => return Category::Primary,
            _ => {}
        }
    }

    // Layer 2: sender heuristics, domain checks before local-part checks.
    if let Some(from) = from_address {
        let domain = domain_of(from);
        let local = local_part_of(from);

        if let Some(domain) = &domain {
            if SOCIAL_DOMAINS.contains(&domain.as_str()) {
                return Category::Social;
            }
            if NEWSLETTER_DOMAINS.contains(&domain.as_str()) {
                return Category::Newsletters;
            }
        }

        if let Some(local) = &local {
            if PROMO_PREFIXES.contains(&local.as_str()) {
                return Category::Promotions;
            }
            if UPDATE_PREFIXES.contains(&local.as_str()) {
                return Category::Updates;
            }
        }
    }

    // Layer 3: unsubscribe header.
    if list_unsubscribe.is_some() {
        if let Some(domain) = from_address.and_then(|from| domain_of(from)) {
            if NEWSLETTER_DOMAINS.contains(&domain.as_str()) {
                return Category::Newsletters;
            }
        }
        return Category::Promotions;
    }

    // Layer 4: default.
    Category::Primary
}

fn domain_of(email: &str) -> Option<String> {
    let at = email.rfind('@')?;
    Some(email[at + 1..].to_lowercase())
}

fn local_part_of(email: &str) -> Option<String> {
    let at = email.rfind('@')?;
    Some(email[..at].to_lowercase())
}
