//! Boundaries to the outside world: vehicle control, the power meter, and the
//! irradiance forecast. The scheduling engine only ever talks to these traits.

mod forecast;
mod meter;
mod retry;
mod vehicle_api;

pub use forecast::{
    irradiance_next_hour, needs_refresh, threshold_next_met, HourlyIrradiance, HttpForecast,
};
pub use meter::HttpPowerProduction;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use vehicle_api::HttpVehicleControl;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;

use crate::optimizer::ChargeState;

/// Remote control of a single vehicle's charger.
#[async_trait]
pub trait VehicleControl: Send + Sync {
    async fn charge_state(&self, vehicle_id: &str) -> Result<ChargeState, CollaboratorError>;
    async fn start_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError>;
    async fn stop_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError>;
    async fn set_charging_amps(&self, vehicle_id: &str, amps: u32)
        -> Result<(), CollaboratorError>;
    async fn wake_up(&self, vehicle_id: &str) -> Result<(), CollaboratorError>;
}

/// Signed net site production in watts. Negative means the site is importing.
#[async_trait]
pub trait PowerProduction: Send + Sync {
    async fn net_power_production(&self) -> Result<f64, CollaboratorError>;
}

/// Hourly solar irradiance forecast in W/m².
#[async_trait]
pub trait Forecast: Send + Sync {
    async fn irradiance_next_hour(&self) -> Result<f64, CollaboratorError>;
    async fn irradiance_by_hour(&self) -> Result<Vec<HourlyIrradiance>, CollaboratorError>;
    /// Start of the first upcoming hour whose irradiance reaches `threshold`.
    async fn irradiance_threshold_next_met(
        &self,
        threshold: f64,
    ) -> Result<DateTime<Utc>, CollaboratorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("vehicle is asleep or unreachable")]
    VehicleUnavailable,
    #[error("credentials were rejected")]
    Unauthorized,
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl CollaboratorError {
    /// Maps a non-success HTTP status to an error.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized,
            _ => Self::Status { status, body },
        }
    }

    /// Timeouts, transport failures, 5xx, 408 and sleeping vehicles are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) | Self::VehicleUnavailable => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Unauthorized | Self::Rejected(_) | Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification_matches_transient_failures() {
        assert!(CollaboratorError::Timeout.is_retryable());
        assert!(CollaboratorError::VehicleUnavailable.is_retryable());
        assert!(CollaboratorError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(
            CollaboratorError::from_status(StatusCode::REQUEST_TIMEOUT, String::new())
                .is_retryable()
        );

        assert!(!CollaboratorError::from_status(StatusCode::NOT_FOUND, String::new()).is_retryable());
        assert!(matches!(
            CollaboratorError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            CollaboratorError::Unauthorized
        ));
        assert!(!CollaboratorError::Decode("bad".into()).is_retryable());
    }
}
