use std::env;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};

use super::{parse_or, required, ConfigError};
use crate::optimizer::MAX_CHARGE_AMPS;

/// Tunables consumed by the scheduling components.
///
/// A snapshot is taken at the top of every control cycle and never changes while the
/// cycle runs.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Safety margin in watts subtracted from available production.
    pub watt_buffer: f64,
    pub default_charger_voltage: u32,
    /// Battery level at or below which a stopped vehicle charges regardless of production.
    pub charge_override_percentage: u8,
    pub charge_override_amps: u32,
    /// Minimum projected W/m² that justifies active monitoring.
    pub irradiance_sleep_threshold: f64,
    /// Optional afternoon threshold; mornings keep using `irradiance_sleep_threshold`.
    pub irradiance_sleep_threshold_pm: Option<f64>,
    /// Offset from UTC used to tell local morning from afternoon.
    pub utc_offset_hours: i32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            watt_buffer: 250.0,
            default_charger_voltage: 240,
            charge_override_percentage: 20,
            charge_override_amps: 10,
            irradiance_sleep_threshold: 100.0,
            irradiance_sleep_threshold_pm: None,
            utc_offset_hours: 0,
        }
    }
}

impl EngineSettings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let default_charger_voltage = parse_or(
            &lookup,
            "OPTIMIZER_DEFAULT_CHARGER_VOLTAGE",
            defaults.default_charger_voltage,
        )?;
        if default_charger_voltage == 0 {
            return Err(ConfigError::InvalidValue {
                key: "OPTIMIZER_DEFAULT_CHARGER_VOLTAGE",
                value: "0".to_string(),
            });
        }

        let charge_override_percentage = parse_or(
            &lookup,
            "OPTIMIZER_CHARGE_OVERRIDE_PERCENTAGE",
            defaults.charge_override_percentage,
        )?;
        if charge_override_percentage > 100 {
            return Err(ConfigError::InvalidValue {
                key: "OPTIMIZER_CHARGE_OVERRIDE_PERCENTAGE",
                value: charge_override_percentage.to_string(),
            });
        }

        let charge_override_amps = parse_or(
            &lookup,
            "OPTIMIZER_CHARGE_OVERRIDE_AMPS",
            defaults.charge_override_amps,
        )?;
        if charge_override_amps > MAX_CHARGE_AMPS {
            return Err(ConfigError::InvalidValue {
                key: "OPTIMIZER_CHARGE_OVERRIDE_AMPS",
                value: charge_override_amps.to_string(),
            });
        }

        let irradiance_sleep_threshold_pm = match lookup("OPTIMIZER_IRRADIANCE_SLEEP_THRESHOLD_PM")
        {
            Some(raw) if !raw.trim().is_empty() => {
                Some(raw.trim().parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                    key: "OPTIMIZER_IRRADIANCE_SLEEP_THRESHOLD_PM",
                    value: raw,
                })?)
            }
            _ => None,
        };

        Ok(Self {
            watt_buffer: parse_or(&lookup, "OPTIMIZER_WATT_BUFFER", defaults.watt_buffer)?,
            default_charger_voltage,
            charge_override_percentage,
            charge_override_amps,
            irradiance_sleep_threshold: parse_or(
                &lookup,
                "OPTIMIZER_IRRADIANCE_SLEEP_THRESHOLD",
                defaults.irradiance_sleep_threshold,
            )?,
            irradiance_sleep_threshold_pm,
            utc_offset_hours: parse_or(
                &lookup,
                "OPTIMIZER_UTC_OFFSET_HOURS",
                defaults.utc_offset_hours,
            )?,
        })
    }

    /// Irradiance threshold that applies at `now`, honoring the afternoon override.
    pub fn irradiance_threshold_at(&self, now: DateTime<Utc>) -> f64 {
        let local = now + ChronoDuration::hours(i64::from(self.utc_offset_hours));
        match self.irradiance_sleep_threshold_pm {
            Some(pm) if local.hour() >= 12 => pm,
            _ => self.irradiance_sleep_threshold,
        }
    }
}

type SettingsLoader = dyn Fn() -> Result<EngineSettings, ConfigError> + Send + Sync;

/// Shared, hot-reloadable view of the current [`EngineSettings`].
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<EngineSettings>>>,
    loader: Option<Arc<SettingsLoader>>,
}

impl SettingsHandle {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
            loader: None,
        }
    }

    /// Handle whose [`refresh`](Self::refresh) re-runs `loader`.
    pub fn with_loader<F>(settings: EngineSettings, loader: F) -> Self
    where
        F: Fn() -> Result<EngineSettings, ConfigError> + Send + Sync + 'static,
    {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
            loader: Some(Arc::new(loader)),
        }
    }

    pub fn snapshot(&self) -> Arc<EngineSettings> {
        self.current
            .read()
            .expect("settings lock poisoned")
            .clone()
    }

    pub fn replace(&self, settings: EngineSettings) {
        *self.current.write().expect("settings lock poisoned") = Arc::new(settings);
    }

    /// Reloads settings through the loader. Returns whether the snapshot changed; on
    /// failure the previous snapshot is kept.
    pub fn refresh(&self) -> Result<bool, ConfigError> {
        let Some(loader) = &self.loader else {
            return Ok(false);
        };

        let fresh = loader()?;
        let mut guard = self.current.write().expect("settings lock poisoned");
        if **guard == fresh {
            return Ok(false);
        }
        *guard = Arc::new(fresh);
        Ok(true)
    }
}

impl fmt::Debug for SettingsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsHandle")
            .field("current", &self.snapshot())
            .field("reloadable", &self.loader.is_some())
            .finish()
    }
}

/// Cadence of the background refreshers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub vehicle_state: Duration,
    pub priority: Duration,
    pub production: Duration,
    pub monitor: Duration,
    /// How often stale vehicles are re-fetched between full state refreshes.
    pub stale_poll: Duration,
    /// Poll-wait used while the first charge states are still outstanding.
    pub startup_poll: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            vehicle_state: Duration::from_secs(15 * 60),
            priority: Duration::from_secs(30 * 60),
            production: Duration::from_secs(60),
            monitor: Duration::from_secs(60),
            stale_poll: Duration::from_secs(15),
            startup_poll: Duration::from_secs(1),
        }
    }
}

impl RefreshIntervals {
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let minutes = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            let value: u64 = parse_or(lookup, key, default)?;
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_string(),
                });
            }
            Ok(Duration::from_secs(value * 60))
        };
        let seconds = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            let value: u64 = parse_or(lookup, key, default)?;
            Ok(Duration::from_secs(value.max(1)))
        };

        Ok(Self {
            vehicle_state: minutes("OPTIMIZER_VEHICLE_STATE_INTERVAL_MINS", 15)?,
            priority: minutes("OPTIMIZER_PRIORITY_INTERVAL_MINS", 30)?,
            production: minutes("OPTIMIZER_PRODUCTION_INTERVAL_MINS", 1)?,
            monitor: minutes("OPTIMIZER_MONITOR_INTERVAL_MINS", 1)?,
            stale_poll: seconds("OPTIMIZER_STALE_POLL_SECS", 15)?,
            startup_poll: seconds("OPTIMIZER_STARTUP_POLL_SECS", 1)?,
        })
    }
}

/// Identity of a configured vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleConfig {
    pub id: String,
    pub name: String,
}

impl VehicleConfig {
    /// Parses `id:name` pairs separated by commas. A missing name falls back to the id.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ConfigError> {
        let mut vehicles = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (id, name) = match entry.split_once(':') {
                Some((id, name)) => (id.trim(), name.trim()),
                None => (entry, entry),
            };
            if id.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "OPTIMIZER_VEHICLES",
                    value: entry.to_string(),
                });
            }
            let name = if name.is_empty() { id } else { name };
            vehicles.push(Self {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(vehicles)
    }
}

/// Endpoints and limits for the external collaborators.
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub vehicle_api_base_url: String,
    pub vehicle_api_token: Option<String>,
    pub power_meter_url: String,
    pub forecast_base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl CollaboratorConfig {
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let timeout_secs: u64 = parse_or(lookup, "COLLABORATOR_TIMEOUT_SECS", 8)?;
        if !(1..=9).contains(&timeout_secs) {
            return Err(ConfigError::InvalidValue {
                key: "COLLABORATOR_TIMEOUT_SECS",
                value: timeout_secs.to_string(),
            });
        }

        Ok(Self {
            vehicle_api_base_url: required(lookup, "VEHICLE_API_BASE_URL")?,
            vehicle_api_token: lookup("VEHICLE_API_TOKEN").filter(|token| !token.is_empty()),
            power_meter_url: required(lookup, "POWER_METER_URL")?,
            forecast_base_url: required(lookup, "FORECAST_BASE_URL")?,
            timeout: Duration::from_secs(timeout_secs),
            max_retries: parse_or(lookup, "COLLABORATOR_MAX_RETRIES", 5)?,
        })
    }
}

/// Everything the scheduling engine needs at startup.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub vehicles: Vec<VehicleConfig>,
    pub settings: EngineSettings,
    pub intervals: RefreshIntervals,
    pub collaborators: CollaboratorConfig,
}

impl OptimizerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let vehicles = VehicleConfig::parse_list(&lookup("OPTIMIZER_VEHICLES").unwrap_or_default())?;
        if vehicles.is_empty() {
            return Err(ConfigError::NoVehicles);
        }

        Ok(Self {
            vehicles,
            settings: EngineSettings::from_lookup(&lookup)?,
            intervals: RefreshIntervals::from_lookup(&lookup)?,
            collaborators: CollaboratorConfig::from_lookup(&lookup)?,
        })
    }
}
