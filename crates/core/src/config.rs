use std::collections::BTreeSet;
use std::path::PathBuf;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// ISO-2 country codes the exchange races we cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Country {
    Gb,
    Ie,
    Za,
    Fr,
}

impl Country {
    pub const ALL: [Country; 4] = [Country::Gb, Country::Ie, Country::Za, Country::Fr];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Country::Gb => "GB",
            Country::Ie => "IE",
            Country::Za => "ZA",
            Country::Fr => "FR",
        }
    }

    /// Parses an ISO-2 code, rejecting anything outside the allowed set.
    ///
    /// # Errors
    /// Returns `CoreError::UnknownCountry` for any code not in `ALL`.
    pub fn parse(code: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| CoreError::UnknownCountry(code.to_string()))
    }
}

/// The stake multiplier applied to a rule's base point count. Restricted to
/// the exchange's enumerated set; never an arbitrary decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointValue(u32);

impl PointValue {
    pub const ALLOWED: [u32; 6] = [1, 2, 5, 10, 20, 50];

    /// Validates `value` against the allowed enumerated set.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidPointValue` if `value` is not one of
    /// `ALLOWED`.
    pub fn new(value: u32) -> Result<Self, CoreError> {
        if Self::ALLOWED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidPointValue(value.to_string()))
        }
    }

    #[must_use]
    pub fn as_decimal(self) -> Decimal {
        Decimal::from(self.0)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Scheduler-wide, hot-swappable configuration (spec §3 `Config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub dry_run: bool,
    pub poll_interval_seconds: u64,
    pub process_window_minutes: u32,
    pub countries: BTreeSet<Country>,
    pub point_value: PointValue,
    pub spread_control_enabled: bool,
    pub jofs_enabled: bool,
    pub min_odds: Decimal,
    pub max_lay_odds: Decimal,
}

impl EngineConfig {
    /// Validates and installs a new processing window.
    ///
    /// # Errors
    /// Returns `CoreError::WindowOutOfRange` if `minutes` is outside `1..=60`.
    pub fn set_process_window(&mut self, minutes: u32) -> Result<(), CoreError> {
        if (1..=60).contains(&minutes) {
            self.process_window_minutes = minutes;
            Ok(())
        } else {
            Err(CoreError::WindowOutOfRange(minutes))
        }
    }

    /// Validates and installs a new point value.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidPointValue` if `value` is not allowed.
    pub fn set_point_value(&mut self, value: u32) -> Result<(), CoreError> {
        self.point_value = PointValue::new(value)?;
        Ok(())
    }

    /// Validates and installs a new country set.
    ///
    /// # Errors
    /// Returns `CoreError::EmptyCountrySet` if `countries` is empty.
    pub fn set_countries(&mut self, countries: BTreeSet<Country>) -> Result<(), CoreError> {
        if countries.is_empty() {
            Err(CoreError::EmptyCountrySet)
        } else {
            self.countries = countries;
            Ok(())
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            poll_interval_seconds: 30,
            process_window_minutes: 12,
            countries: BTreeSet::from([Country::Gb, Country::Ie]),
            point_value: PointValue::new(1).expect("1 is always a valid point value"),
            spread_control_enabled: true,
            jofs_enabled: true,
            min_odds: dec!(2.0),
            max_lay_odds: dec!(50.0),
        }
    }
}

/// Opaque exchange credentials. The engine passes these through to the
/// exchange client without interpreting them further (authentication beyond
/// this is a non-goal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeCredentials {
    pub app_key: String,
    pub username: String,
    pub password: String,
    pub base_url: String,
}

impl Default for ExchangeCredentials {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            username: String::new(),
            password: String::new(),
            base_url: "https://api.betfair.com/exchange".to_string(),
        }
    }
}

/// File paths and object-store coordinates for the two persistence tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub hot_state_path: PathBuf,
    pub object_store_bucket: String,
    pub object_store_prefix: String,
    pub flush_interval_seconds: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            hot_state_path: PathBuf::from("state/engine_state.json"),
            object_store_bucket: "layline-state".to_string(),
            object_store_prefix: "engine".to_string(),
            flush_interval_seconds: 150,
        }
    }
}

/// Top-level process configuration: everything read at startup (spec §6
/// "Environment/config inputs"), thereafter mutable only via the Control
/// Surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopLevelConfig {
    pub engine: EngineConfig,
    pub exchange: ExchangeCredentials,
    pub persistence: PersistenceConfig,
}
