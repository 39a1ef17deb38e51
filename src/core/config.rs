//! # Engine configuration.
//!
//! Provides [`Config`] centralized settings for the engine.
//!
//! Config is deserializable (every field has a default) so hosts can embed it in
//! their own configuration files.
//!
//! ## Sentinel values
//! - `cache_size = 0` → no pre-warming and no refill after checkout
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// When rooms spawn their mobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationPolicy {
    /// On the first player entry into the room.
    #[default]
    OnEntry,
    /// Every room at checkout.
    OnActivation,
}

/// How dropped keys reach the instance's key counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum KeyPickup {
    /// A dropped key is collected at once.
    #[default]
    Immediate,
    /// Players may pick keys up; leftovers are collected after `secs`.
    Delayed { secs: u64 },
    /// Only explicit pickups collect keys.
    Manual,
}

impl KeyPickup {
    /// Auto-collection delay used by the classic item-drop behaviour.
    pub const CLASSIC: KeyPickup = KeyPickup::Delayed { secs: 15 };

    /// Auto-collection delay, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            KeyPickup::Delayed { secs } => Some(Duration::from_secs(*secs)),
            KeyPickup::Immediate | KeyPickup::Manual => None,
        }
    }
}

/// What checkout does with an empty pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPolicy {
    /// Report [`Checkout::Exhausted`](crate::Checkout::Exhausted) right away.
    #[default]
    Exhausted,
    /// Build one instance on demand and wait for it.
    BuildOnDemand,
}

/// Global configuration for the engine.
///
/// ## Field semantics
/// - `cache_size`: cached instances kept per format (`0` = none, must be below [`Config::CACHE_SIZE_LIMIT`])
/// - `grid_size`: spacing between instance paste origins
/// - `population`: when rooms spawn their mobs
/// - `key_pickup`: how dropped keys are collected
/// - `checkout`: behaviour on an empty pool
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
///
/// ## Notes
/// All fields are public for flexibility. Call [`Config::validate`] (the builder
/// does) before use.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_size: usize,
    /// Distance between neighbouring paste origins on the spiral grid.
    pub grid_size: u32,
    pub population: PopulationPolicy,
    pub key_pickup: KeyPickup,
    pub checkout: CheckoutPolicy,
    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    /// Exclusive upper bound for `cache_size`.
    pub const CACHE_SIZE_LIMIT: usize = 10;

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Per-format refill target, `None` when pre-warming is off.
    #[inline]
    pub fn refill_target(&self) -> Option<usize> {
        if self.cache_size == 0 {
            None
        } else {
            Some(self.cache_size)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size >= Self::CACHE_SIZE_LIMIT {
            return Err(ConfigError::CacheSizeTooLarge {
                size: self.cache_size,
                limit: Self::CACHE_SIZE_LIMIT,
            });
        }
        if self.grid_size == 0 {
            return Err(ConfigError::ZeroGridSize);
        }
        Ok(())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `cache_size = 1`
    /// - `grid_size = 1000`
    /// - `population = OnEntry`
    /// - `key_pickup = Immediate`
    /// - `checkout = Exhausted`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            cache_size: 1,
            grid_size: 1000,
            population: PopulationPolicy::default(),
            key_pickup: KeyPickup::default(),
            checkout: CheckoutPolicy::default(),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_cache_size_limit() {
        let cfg = Config {
            cache_size: 10,
            ..Config::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CacheSizeTooLarge { size: 10, limit: 10 })
        );

        let cfg = Config {
            cache_size: 9,
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_grid_rejected() {
        let cfg = Config {
            grid_size: 0,
            ..Config::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroGridSize));
    }

    #[test]
    fn test_sentinels() {
        let cfg = Config {
            cache_size: 0,
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.refill_target(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: Config = serde_json::from_str(
            r#"{"cache_size":3,"population":"on_activation","key_pickup":{"mode":"delayed","secs":15}}"#,
        )
        .unwrap();
        assert_eq!(cfg.cache_size, 3);
        assert_eq!(cfg.grid_size, 1000);
        assert_eq!(cfg.population, PopulationPolicy::OnActivation);
        assert_eq!(cfg.key_pickup, KeyPickup::CLASSIC);
        assert_eq!(cfg.key_pickup.delay(), Some(Duration::from_secs(15)));
        assert_eq!(cfg.checkout, CheckoutPolicy::Exhausted);
    }

    #[test]
    fn test_checkout_policy_names() {
        for (name, policy) in [
            ("exhausted", CheckoutPolicy::Exhausted),
            ("build_on_demand", CheckoutPolicy::BuildOnDemand),
        ] {
            let cfg: Config =
                serde_json::from_str(&format!(r#"{{"checkout":"{name}"}}"#)).unwrap();
            assert_eq!(cfg.checkout, policy);
        }
    }
}
