//! Expiration policies.
//!
//! A policy is an immutable value chosen when a ticket is created. It reads
//! a [`TicketState`] snapshot and the current instant and answers with an
//! [`ExpirationDecision`]; it never reads the clock or mutates the ticket,
//! so one policy value can be shared by any number of tickets.
//!
//! Throttling is a separate outcome from expiry. A throttled ticket rejects
//! the current use but stays valid for a later one, while an expired ticket
//! never becomes valid again.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{authentication::Authentication, clock::elapsed};

/// Delegate used for remember-me authentications.
pub const REMEMBER_ME_DELEGATE: &str = "rememberMe";
/// Delegate used for everything else.
pub const DEFAULT_DELEGATE: &str = "default";

/// The read-only view of a ticket that policies evaluate.
pub trait TicketState {
    /// Number of times the ticket has been used.
    fn count_of_uses(&self) -> u32;
    /// When the ticket was created.
    fn creation_time(&self) -> DateTime<Utc>;
    /// When the ticket was last used (creation time if never used).
    fn last_time_used(&self) -> DateTime<Utc>;
    /// The use before the last one, if any.
    fn previous_time_used(&self) -> Option<DateTime<Utc>>;
    /// The authentication the ticket carries, if it carries one directly.
    fn authentication(&self) -> Option<&Authentication>;
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationDecision {
    /// Usable now.
    Valid,
    /// Not usable right now because it was used too recently. Not expired.
    Throttled,
    /// Permanently unusable.
    Expired,
}

impl ExpirationDecision {
    #[must_use]
    pub fn is_expired(self) -> bool {
        self == Self::Expired
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

/// Every supported expiration algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Never expires.
    NeverExpires,
    /// Always expired. Used when configuration cannot be interpreted.
    AlwaysExpires,
    /// Expires once `max_time_to_live` has passed since creation.
    Timeout {
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
    },
    /// Expires once `time_to_kill` has passed since creation.
    HardTimeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
    /// Expires at `max_time_to_live` since creation or after `time_to_kill`
    /// of inactivity, whichever comes first.
    TicketGranting {
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
    /// Expires after `time_to_kill` without use; throttles a used ticket
    /// that is presented again within `time_in_between_uses`.
    ThrottledUseAndTimeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
        #[serde(with = "humantime_serde")]
        time_in_between_uses: Duration,
    },
    /// Expires after `number_of_uses` uses or `time_to_kill` since creation.
    MultiTimeUseOrTimeout {
        number_of_uses: u32,
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
    /// Chooses between named delegates based on the ticket's authentication.
    RememberMeDelegating(RememberMeDelegatingPolicy),
}

impl ExpirationPolicy {
    /// Evaluates the policy for `state` at instant `now`.
    pub fn evaluate<S: TicketState + ?Sized>(&self, state: &S, now: DateTime<Utc>) -> ExpirationDecision {
        use ExpirationDecision::{Expired, Throttled, Valid};

        let since_creation = elapsed(state.creation_time(), now);
        let since_last_use = elapsed(state.last_time_used(), now);

        match self {
            Self::NeverExpires => Valid,
            Self::AlwaysExpires => Expired,
            Self::Timeout { max_time_to_live: ttl } | Self::HardTimeout { time_to_kill: ttl } => {
                if since_creation > *ttl { Expired } else { Valid }
            },
            Self::TicketGranting { max_time_to_live, time_to_kill } => {
                if since_creation > *max_time_to_live || since_last_use > *time_to_kill {
                    Expired
                } else {
                    Valid
                }
            },
            Self::ThrottledUseAndTimeout { time_to_kill, time_in_between_uses } => {
                if since_last_use > *time_to_kill {
                    Expired
                } else if state.count_of_uses() > 0 && since_last_use < *time_in_between_uses {
                    Throttled
                } else {
                    Valid
                }
            },
            Self::MultiTimeUseOrTimeout { number_of_uses, time_to_kill } => {
                if state.count_of_uses() >= *number_of_uses || since_creation > *time_to_kill {
                    Expired
                } else {
                    Valid
                }
            },
            Self::RememberMeDelegating(policy) => policy.evaluate(state, now),
        }
    }

    /// Shorthand for `evaluate(..).is_expired()`.
    pub fn is_expired<S: TicketState + ?Sized>(&self, state: &S, now: DateTime<Utc>) -> bool {
        self.evaluate(state, now).is_expired()
    }

    /// Returns the policy a new ticket carrying `authentication` should own.
    ///
    /// For a remember-me policy this freezes the delegate choice; every other
    /// policy is returned unchanged.
    #[must_use]
    pub fn bind(&self, authentication: &Authentication) -> Self {
        match self {
            Self::RememberMeDelegating(policy) => {
                Self::RememberMeDelegating(policy.select_for(authentication))
            },
            other => other.clone(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NeverExpires => "never_expires",
            Self::AlwaysExpires => "always_expires",
            Self::Timeout { .. } => "timeout",
            Self::HardTimeout { .. } => "hard_timeout",
            Self::TicketGranting { .. } => "ticket_granting",
            Self::ThrottledUseAndTimeout { .. } => "throttled_use_and_timeout",
            Self::MultiTimeUseOrTimeout { .. } => "multi_time_use_or_timeout",
            Self::RememberMeDelegating(_) => "remember_me_delegating",
        }
    }
}

/// Named delegates plus the choice made for one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberMeDelegatingPolicy {
    delegates: BTreeMap<String, ExpirationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected: Option<String>,
}

impl RememberMeDelegatingPolicy {
    /// Builds an unbound policy from the two standard delegates.
    pub fn new(remember_me: ExpirationPolicy, default: ExpirationPolicy) -> Self {
        let mut delegates = BTreeMap::new();
        delegates.insert(REMEMBER_ME_DELEGATE.to_owned(), remember_me);
        delegates.insert(DEFAULT_DELEGATE.to_owned(), default);
        Self { delegates, selected: None }
    }

    /// The delegate name chosen for this ticket, if bound.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn delegate(&self, name: &str) -> Option<&ExpirationPolicy> {
        self.delegates.get(name)
    }

    #[must_use]
    fn select_for(&self, authentication: &Authentication) -> Self {
        let name = if authentication.is_remember_me() { REMEMBER_ME_DELEGATE } else { DEFAULT_DELEGATE };
        Self { delegates: self.delegates.clone(), selected: Some(name.to_owned()) }
    }

    fn evaluate<S: TicketState + ?Sized>(&self, state: &S, now: DateTime<Utc>) -> ExpirationDecision {
        let name = self.selected.as_deref().unwrap_or(DEFAULT_DELEGATE);
        match self.delegates.get(name) {
            Some(delegate) => delegate.evaluate(state, now),
            None => {
                tracing::warn!(delegate = name, "missing expiration delegate, treating ticket as expired");
                ExpirationDecision::Expired
            },
        }
    }
}
