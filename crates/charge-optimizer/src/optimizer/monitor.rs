use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::commands::stop_all;
use super::domain::SharedFleet;
use crate::collaborators::{Forecast, VehicleControl};
use crate::config::EngineSettings;

/// Wake this long before the forecast says irradiance recovers.
pub const EARLY_WAKE_MARGIN_MINUTES: i64 = 30;
/// Assumed time until irradiance recovers when the forecast cannot answer.
pub const FORECAST_FALLBACK_MINUTES: i64 = 60;
/// A fleet with no priority vehicle backs off this many monitor intervals.
pub const NO_PRIORITY_BACKOFF_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Active,
    PausedLowIrradiance,
    PausedNoPriority,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PausePlan {
    pub state: MonitorState,
    pub duration: Duration,
    pub resume_at: DateTime<Utc>,
    pub reason: String,
}

impl PausePlan {
    pub fn minutes(&self) -> u64 {
        self.duration.as_secs() / 60
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorDecision {
    Continue,
    Pause(PausePlan),
}

/// Decides between active polling and sleeping.
pub struct MonitorScheduler {
    state: MonitorState,
    forecast: Arc<dyn Forecast>,
    vehicles: Arc<dyn VehicleControl>,
    fleet: SharedFleet,
    interval: Duration,
}

impl MonitorScheduler {
    pub fn new(
        fleet: SharedFleet,
        forecast: Arc<dyn Forecast>,
        vehicles: Arc<dyn VehicleControl>,
        interval: Duration,
    ) -> Self {
        Self {
            state: MonitorState::Active,
            forecast,
            vehicles,
            fleet,
            interval,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Back to `Active` once a pause has elapsed.
    pub fn resume(&mut self) {
        self.state = MonitorState::Active;
    }

    /// Evaluates the pause rules. Entering a pause stops every vehicle first.
    pub async fn tick(&mut self, settings: &EngineSettings, now: DateTime<Utc>) -> MonitorDecision {
        if self.state != MonitorState::Active {
            return MonitorDecision::Continue;
        }

        let plan = match self.low_irradiance_pause(settings, now).await {
            Some(plan) => Some(plan),
            None => self.no_priority_pause(now),
        };

        let Some(plan) = plan else {
            debug!("monitor tick: staying active");
            return MonitorDecision::Continue;
        };

        info!(
            state = ?plan.state,
            sleep_minutes = plan.minutes(),
            resume_at = %plan.resume_at,
            reason = %plan.reason,
            "entering pause"
        );
        stop_all(self.vehicles.as_ref(), &self.fleet).await;
        self.state = plan.state;
        MonitorDecision::Pause(plan)
    }

    async fn low_irradiance_pause(
        &self,
        settings: &EngineSettings,
        now: DateTime<Utc>,
    ) -> Option<PausePlan> {
        let threshold = settings.irradiance_threshold_at(now);
        let projected = match self.forecast.irradiance_next_hour().await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "forecast unavailable, skipping irradiance check");
                return None;
            }
        };
        if projected >= threshold {
            debug!(projected, threshold, "irradiance sufficient");
            return None;
        }

        let next_met = match self.forecast.irradiance_threshold_next_met(threshold).await {
            Ok(at) => at,
            Err(err) => {
                warn!(
                    error = %err,
                    fallback_minutes = FORECAST_FALLBACK_MINUTES,
                    "threshold lookup failed, assuming irradiance recovers soon"
                );
                now + ChronoDuration::minutes(FORECAST_FALLBACK_MINUTES)
            }
        };

        let minutes = ((next_met - now).num_minutes() - EARLY_WAKE_MARGIN_MINUTES).max(0);
        if minutes == 0 {
            info!(projected, threshold, %next_met, "irradiance recovers within the wake margin, staying active");
            return None;
        }

        Some(PausePlan {
            state: MonitorState::PausedLowIrradiance,
            duration: Duration::from_secs(minutes as u64 * 60),
            resume_at: now + ChronoDuration::minutes(minutes),
            reason: format!(
                "projected irradiance {projected:.0} W/m² below threshold {threshold:.0} W/m² until {next_met}"
            ),
        })
    }

    fn no_priority_pause(&self, now: DateTime<Utc>) -> Option<PausePlan> {
        let has_priority = self
            .fleet
            .lock()
            .expect("fleet mutex poisoned")
            .priority_vehicle()
            .is_some();
        if has_priority {
            return None;
        }

        let duration = self.interval * NO_PRIORITY_BACKOFF_FACTOR;
        let resume_at = now
            + ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::minutes(3));
        Some(PausePlan {
            state: MonitorState::PausedNoPriority,
            duration,
            resume_at,
            reason: "no vehicle eligible for priority".to_string(),
        })
    }
}
