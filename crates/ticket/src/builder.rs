//! Chooses an [`ExpirationPolicy`] from configuration.
//!
//! Selection happens once, when the ticket factory is built; every ticket of
//! a kind then receives a clone of the same policy value (bound to its
//! authentication for remember-me).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expiration::{ExpirationPolicy, RememberMeDelegatingPolicy};

/// Expiration settings for granting tickets (TGT and PGT).
///
/// The sub-sections are alternatives consulted in a fixed order by
/// [`select_granting_policy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantingExpirationConfig {
    /// Hard lifetime of the default dual-timeout policy.
    #[serde(with = "humantime_serde")]
    pub max_time_to_live: Duration,
    /// Idle lifetime of the default dual-timeout policy.
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
    pub timeout: TimeoutConfig,
    pub throttle: ThrottleConfig,
    pub hard_timeout: HardTimeoutConfig,
    pub remember_me: RememberMeConfig,
}

impl Default for GrantingExpirationConfig {
    fn default() -> Self {
        Self {
            max_time_to_live: Duration::from_secs(8 * 60 * 60),
            time_to_kill: Duration::from_secs(2 * 60 * 60),
            timeout: TimeoutConfig::default(),
            throttle: ThrottleConfig::default(),
            hard_timeout: HardTimeoutConfig::default(),
            remember_me: RememberMeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub max_time_to_live: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
    #[serde(with = "humantime_serde")]
    pub time_in_between_uses: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardTimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

/// Long-lived sessions for users who ticked "remember me".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RememberMeConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

impl Default for RememberMeConfig {
    fn default() -> Self {
        Self { enabled: false, time_to_kill: Duration::from_secs(14 * 24 * 60 * 60) }
    }
}

/// Expiration settings for use-limited tickets (ST, PT, OAuth code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UseLimitedExpirationConfig {
    pub number_of_uses: u32,
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

impl Default for UseLimitedExpirationConfig {
    fn default() -> Self {
        Self { number_of_uses: 1, time_to_kill: Duration::from_secs(10) }
    }
}

/// Picks the granting-ticket policy.
///
/// Precedence:
/// 1. `max_time_to_live` and `time_to_kill` both zero: never expires.
/// 2. `timeout.max_time_to_live` set: plain timeout.
/// 3. Both throttle values set: throttled use.
/// 4. `hard_timeout.time_to_kill` set: hard timeout.
/// 5. `max_time_to_live` and `time_to_kill` both set: dual timeout.
/// 6. Anything else: always expires.
///
/// With remember-me enabled, the result of steps 2-6 becomes the `default`
/// delegate of a remember-me policy.
pub fn select_granting_policy(config: &GrantingExpirationConfig) -> ExpirationPolicy {
    if config.max_time_to_live.is_zero() && config.time_to_kill.is_zero() {
        tracing::warn!(
            "granting tickets are configured to never expire; sessions live until explicit logout"
        );
        return ExpirationPolicy::NeverExpires;
    }

    let base = if !config.timeout.max_time_to_live.is_zero() {
        ExpirationPolicy::Timeout { max_time_to_live: config.timeout.max_time_to_live }
    } else if !config.throttle.time_to_kill.is_zero()
        && !config.throttle.time_in_between_uses.is_zero()
    {
        ExpirationPolicy::ThrottledUseAndTimeout {
            time_to_kill: config.throttle.time_to_kill,
            time_in_between_uses: config.throttle.time_in_between_uses,
        }
    } else if !config.hard_timeout.time_to_kill.is_zero() {
        ExpirationPolicy::HardTimeout { time_to_kill: config.hard_timeout.time_to_kill }
    } else if !config.max_time_to_live.is_zero() && !config.time_to_kill.is_zero() {
        ExpirationPolicy::TicketGranting {
            max_time_to_live: config.max_time_to_live,
            time_to_kill: config.time_to_kill,
        }
    } else {
        tracing::warn!("granting ticket expiration settings are incomplete; every ticket will expire");
        ExpirationPolicy::AlwaysExpires
    };

    if config.remember_me.enabled {
        ExpirationPolicy::RememberMeDelegating(RememberMeDelegatingPolicy::new(
            ExpirationPolicy::HardTimeout { time_to_kill: config.remember_me.time_to_kill },
            base,
        ))
    } else {
        base
    }
}

/// Picks the policy for a use-limited ticket kind.
pub fn select_use_limited_policy(config: &UseLimitedExpirationConfig) -> ExpirationPolicy {
    ExpirationPolicy::MultiTimeUseOrTimeout {
        number_of_uses: config.number_of_uses,
        time_to_kill: config.time_to_kill,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::{DEFAULT_DELEGATE, REMEMBER_ME_DELEGATE};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn zeroed() -> GrantingExpirationConfig {
        GrantingExpirationConfig {
            max_time_to_live: Duration::ZERO,
            time_to_kill: Duration::ZERO,
            ..GrantingExpirationConfig::default()
        }
    }

    #[test]
    fn both_zero_never_expires_even_with_alternatives() {
        let mut config = zeroed();
        config.timeout.max_time_to_live = secs(30);
        assert_eq!(select_granting_policy(&config), ExpirationPolicy::NeverExpires);
    }

    #[test]
    fn default_config_is_dual_timeout() {
        assert_eq!(
            select_granting_policy(&GrantingExpirationConfig::default()),
            ExpirationPolicy::TicketGranting { max_time_to_live: secs(28_800), time_to_kill: secs(7_200) }
        );
    }

    #[test]
    fn precedence_order() {
        let mut config = GrantingExpirationConfig::default();
        config.hard_timeout.time_to_kill = secs(40);
        assert_eq!(
            select_granting_policy(&config),
            ExpirationPolicy::HardTimeout { time_to_kill: secs(40) }
        );

        config.throttle = ThrottleConfig { time_to_kill: secs(60), time_in_between_uses: secs(5) };
        assert!(matches!(
            select_granting_policy(&config),
            ExpirationPolicy::ThrottledUseAndTimeout { .. }
        ));

        config.timeout.max_time_to_live = secs(30);
        assert_eq!(
            select_granting_policy(&config),
            ExpirationPolicy::Timeout { max_time_to_live: secs(30) }
        );
    }

    #[test]
    fn half_configured_throttle_is_ignored() {
        let mut config = GrantingExpirationConfig::default();
        config.throttle.time_to_kill = secs(60);
        assert!(matches!(select_granting_policy(&config), ExpirationPolicy::TicketGranting { .. }));
    }

    #[test]
    fn incomplete_dual_timeout_fails_closed() {
        let config = GrantingExpirationConfig { time_to_kill: Duration::ZERO, ..Default::default() };
        assert_eq!(select_granting_policy(&config), ExpirationPolicy::AlwaysExpires);
    }

    #[test]
    fn remember_me_wraps_selected_policy_as_default() {
        let mut config = GrantingExpirationConfig::default();
        config.remember_me.enabled = true;

        let ExpirationPolicy::RememberMeDelegating(policy) = select_granting_policy(&config) else {
            panic!("expected remember-me policy");
        };
        assert!(matches!(policy.delegate(DEFAULT_DELEGATE), Some(ExpirationPolicy::TicketGranting { .. })));
        assert_eq!(
            policy.delegate(REMEMBER_ME_DELEGATE),
            Some(&ExpirationPolicy::HardTimeout { time_to_kill: secs(1_209_600) })
        );
    }

    #[test]
    fn remember_me_does_not_wrap_never_expires() {
        let mut config = zeroed();
        config.remember_me.enabled = true;
        assert_eq!(select_granting_policy(&config), ExpirationPolicy::NeverExpires);
    }

    #[test]
    fn config_parses_humantime() {
        let config: GrantingExpirationConfig =
            serde_json::from_str(r#"{"max_time_to_live":"10s","time_to_kill":"5s"}"#).unwrap();
        assert_eq!(config.max_time_to_live, secs(10));
        assert_eq!(config.time_to_kill, secs(5));
        assert!(!config.remember_me.enabled);
    }
}
