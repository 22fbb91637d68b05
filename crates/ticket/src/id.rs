//! Ticket id generation and redaction.
//!
//! Ids look like `ST-42-k3Jd9…-node1`: the kind prefix, a per-process
//! counter, a random alphanumeric body, and an optional node suffix. Only
//! the prefix is a contract; everything after the first dash is opaque.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::{Rng, distr::Alphanumeric};

/// Default length of the random part of an id.
pub const DEFAULT_RANDOM_LENGTH: usize = 32;

/// Number of characters after the prefix that survive redaction.
const VISIBLE_CHARS: usize = 6;

/// Produces globally unique ticket ids.
pub trait TicketIdGenerator: Send + Sync {
    /// Returns a fresh id starting with `prefix` followed by `-`.
    fn new_ticket_id(&self, prefix: &str) -> String;
}

/// Counter plus random string plus optional node suffix.
#[derive(Debug)]
pub struct UniqueTicketIdGenerator {
    counter: AtomicU64,
    random_length: usize,
    suffix: Option<String>,
}

impl UniqueTicketIdGenerator {
    pub fn new(random_length: usize, suffix: Option<String>) -> Self {
        Self { counter: AtomicU64::new(1), random_length, suffix: suffix.filter(|s| !s.is_empty()) }
    }
}

impl Default for UniqueTicketIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_RANDOM_LENGTH, None)
    }
}

impl TicketIdGenerator for UniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let random: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.random_length)
            .map(char::from)
            .collect();
        match &self.suffix {
            Some(suffix) => format!("{prefix}-{sequence}-{random}-{suffix}"),
            None => format!("{prefix}-{sequence}-{random}"),
        }
    }
}

/// Masks a ticket id for logs: `ST-1-abcdefghijk` becomes `ST-1-abcd****`.
///
/// The prefix and at most the first six characters of the body stay
/// readable. At least half of the body is always masked.
pub fn redact(id: &str) -> String {
    let Some((prefix, body)) = id.split_once('-') else {
        return "****".to_owned();
    };
    let visible: String = body.chars().take(VISIBLE_CHARS.min(body.chars().count() / 2)).collect();
    if visible.is_empty() {
        return format!("{prefix}-****");
    }
    format!("{prefix}-{visible}****")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ids_carry_prefix_and_suffix() {
        let generator = UniqueTicketIdGenerator::new(16, Some("node1".into()));
        let id = generator.new_ticket_id("TGT");
        assert!(id.starts_with("TGT-1-"), "{id}");
        assert!(id.ends_with("-node1"), "{id}");
        assert_eq!(id.len(), "TGT-1-".len() + 16 + "-node1".len());
    }

    #[test]
    fn ids_are_unique() {
        let generator = UniqueTicketIdGenerator::default();
        let ids: HashSet<String> = (0..1_000).map(|_| generator.new_ticket_id("ST")).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn redaction_keeps_prefix_only_partially() {
        assert_eq!(redact("ST-1-abcdefghijk"), "ST-1-abcd****");
        assert_eq!(redact("TGT-1"), "TGT-****");
        assert_eq!(redact("nodash"), "****");
    }

    #[test]
    fn short_bodies_stay_mostly_masked() {
        assert_eq!(redact("ST-abcd"), "ST-ab****");
        assert_eq!(redact("PT-abcdef"), "PT-abc****");
        assert_eq!(redact("ST-a"), "ST-****");
    }

    proptest! {
        #[test]
        fn redacted_ids_never_contain_the_full_body(body in "[A-Za-z0-9]{1,40}") {
            let id = format!("TGT-{body}");
            let redacted = redact(&id);
            let masked = redacted.strip_prefix("TGT-");
            prop_assert!(masked.is_some());
            let masked = masked.unwrap_or_default();
            prop_assert!(!masked.contains(&body));
            prop_assert!(masked.trim_end_matches('*').len() <= body.len() / 2);
        }
    }
}
