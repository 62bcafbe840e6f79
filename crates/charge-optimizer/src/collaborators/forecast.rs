use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::{CollaboratorError, Forecast};
use crate::config::CollaboratorConfig;

/// Forecast irradiance for the hour starting at `starts_at`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyIrradiance {
    pub starts_at: DateTime<Utc>,
    pub irradiance: f64,
}

/// The cached forecast is replaced once the fourth hour has started.
const REFRESH_AFTER_HOURS: usize = 4;

/// Whether `cached` should be re-downloaded at `now`.
pub fn needs_refresh(cached: &[HourlyIrradiance], now: DateTime<Utc>) -> bool {
    match cached
        .get(REFRESH_AFTER_HOURS - 1)
        .or_else(|| cached.last())
    {
        Some(marker) => now >= marker.starts_at,
        None => true,
    }
}

/// Irradiance of the first hour that starts after `now`.
pub fn irradiance_next_hour(hours: &[HourlyIrradiance], now: DateTime<Utc>) -> Option<f64> {
    hours
        .iter()
        .find(|hour| hour.starts_at > now)
        .map(|hour| hour.irradiance)
}

/// First upcoming hour reaching `threshold`. When no hour in the horizon qualifies, the
/// end of the horizon is returned so callers sleep until fresh data is available.
pub fn threshold_next_met(
    hours: &[HourlyIrradiance],
    threshold: f64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut upcoming = hours.iter().filter(|hour| hour.starts_at > now).peekable();
    upcoming.peek()?;

    let mut horizon_end = now;
    for hour in upcoming {
        if hour.irradiance >= threshold {
            return Some(hour.starts_at);
        }
        horizon_end = hour.starts_at + Duration::hours(1);
    }
    Some(horizon_end)
}

#[derive(Debug, Deserialize)]
struct HourlyDto {
    #[serde(rename = "DateTime")]
    date_time: DateTime<FixedOffset>,
    #[serde(rename = "SolarIrradiance")]
    solar_irradiance: MeasurementDto,
}

#[derive(Debug, Deserialize)]
struct MeasurementDto {
    #[serde(rename = "Value")]
    value: f64,
}

impl From<HourlyDto> for HourlyIrradiance {
    fn from(dto: HourlyDto) -> Self {
        Self {
            starts_at: dto.date_time.with_timezone(&Utc),
            irradiance: dto.solar_irradiance.value,
        }
    }
}

/// Hourly forecast client with a small in-process cache.
#[derive(Debug)]
pub struct HttpForecast {
    client: Client,
    url: String,
    retry: RetryPolicy,
    cache: Mutex<Vec<HourlyIrradiance>>,
}

impl HttpForecast {
    pub fn new(config: &CollaboratorConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| CollaboratorError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/hourly", config.forecast_base_url.trim_end_matches('/')),
            retry: RetryPolicy::default().with_max_attempts(config.max_retries.saturating_add(1)),
            cache: Mutex::new(Vec::new()),
        })
    }

    async fn download(&self) -> Result<Vec<HourlyIrradiance>, CollaboratorError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(status, body));
        }

        let hours: Vec<HourlyDto> = response
            .json()
            .await
            .map_err(|err| CollaboratorError::Decode(err.to_string()))?;
        let mut hours: Vec<HourlyIrradiance> = hours.into_iter().map(Into::into).collect();
        hours.sort_by_key(|hour| hour.starts_at);
        Ok(hours)
    }

    /// Returns the cached forecast, downloading a fresh one when it has gone stale.
    async fn hours(&self) -> Result<Vec<HourlyIrradiance>, CollaboratorError> {
        let mut cache = self.cache.lock().await;
        if needs_refresh(&cache, Utc::now()) {
            let fresh = retry_with_backoff(
                &self.retry,
                "forecast",
                CollaboratorError::is_retryable,
                || self.download(),
            )
            .await?;
            info!(hours = fresh.len(), "forecast refreshed");
            *cache = fresh;
        }
        Ok(cache.clone())
    }
}

#[async_trait]
impl Forecast for HttpForecast {
    async fn irradiance_next_hour(&self) -> Result<f64, CollaboratorError> {
        let hours = self.hours().await?;
        irradiance_next_hour(&hours, Utc::now())
            .ok_or_else(|| CollaboratorError::Decode("forecast has no upcoming hours".to_string()))
    }

    async fn irradiance_by_hour(&self) -> Result<Vec<HourlyIrradiance>, CollaboratorError> {
        self.hours().await
    }

    async fn irradiance_threshold_next_met(
        &self,
        threshold: f64,
    ) -> Result<DateTime<Utc>, CollaboratorError> {
        let hours = self.hours().await?;
        let met = threshold_next_met(&hours, threshold, Utc::now())
            .ok_or_else(|| CollaboratorError::Decode("forecast has no upcoming hours".to_string()))?;
        debug!(threshold, next_met = %met, "irradiance threshold lookup");
        Ok(met)
    }
}
