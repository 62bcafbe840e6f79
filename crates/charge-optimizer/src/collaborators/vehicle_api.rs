use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::{CollaboratorError, VehicleControl};
use crate::config::CollaboratorConfig;
use crate::optimizer::{ChargeState, ChargingState};

const WAKE_UP: &str = "wake_up";

/// Vehicle-control client for a REST fleet API.
///
/// Requests are `GET {base}/vehicles/{id}/charge_state` and
/// `POST {base}/vehicles/{id}/command/{command}`. A 408 from the API means the car is
/// asleep; the client sends `wake_up` before the next retry.
#[derive(Debug, Clone)]
pub struct HttpVehicleControl {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct ChargeStateDto {
    charging_state: String,
    battery_level: u8,
    charge_limit_soc: u8,
    #[serde(default)]
    charge_amps: Option<u32>,
    #[serde(default)]
    charger_voltage: Option<u32>,
}

impl From<ChargeStateDto> for ChargeState {
    fn from(dto: ChargeStateDto) -> Self {
        Self {
            charging_state: ChargingState::parse(&dto.charging_state),
            battery_level: dto.battery_level,
            charge_limit_soc: dto.charge_limit_soc,
            charge_amps: dto.charge_amps.unwrap_or_default(),
            charger_voltage: dto.charger_voltage.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandResult {
    result: bool,
    #[serde(default)]
    reason: String,
}

impl HttpVehicleControl {
    pub fn new(config: &CollaboratorConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| CollaboratorError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.vehicle_api_base_url.trim_end_matches('/').to_string(),
            token: config.vehicle_api_token.clone(),
            retry: RetryPolicy::default().with_max_attempts(config.max_retries.saturating_add(1)),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_charge_state(&self, vehicle_id: &str) -> Result<ChargeState, CollaboratorError> {
        let url = format!("{}/vehicles/{vehicle_id}/charge_state", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let envelope: Envelope<ChargeStateDto> = decode(response).await?;
        Ok(envelope.response.into())
    }

    async fn post_command(
        &self,
        vehicle_id: &str,
        command: &str,
        body: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/vehicles/{vehicle_id}/command/{command}", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        let envelope: Envelope<CommandResult> = decode(response).await?;
        if envelope.response.result {
            Ok(())
        } else {
            Err(CollaboratorError::Rejected(envelope.response.reason))
        }
    }

    /// On an unavailable vehicle, sends `wake_up` so the next retry can succeed.
    async fn wake_if_unavailable<T>(
        &self,
        vehicle_id: &str,
        result: Result<T, CollaboratorError>,
    ) -> Result<T, CollaboratorError> {
        if matches!(result, Err(CollaboratorError::VehicleUnavailable)) {
            info!(vehicle_id, "vehicle unavailable, sending wake_up");
            if let Err(err) = self.post_command(vehicle_id, WAKE_UP, &json!({})).await {
                debug!(vehicle_id, error = %err, "wake_up did not go through");
            }
        }
        result
    }

    async fn attempt_charge_state(&self, vehicle_id: &str) -> Result<ChargeState, CollaboratorError> {
        let result = self.fetch_charge_state(vehicle_id).await;
        self.wake_if_unavailable(vehicle_id, result).await
    }

    async fn attempt_command(
        &self,
        vehicle_id: &str,
        command: &'static str,
        body: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let result = self.post_command(vehicle_id, command, body).await;
        if command == WAKE_UP {
            return result;
        }
        self.wake_if_unavailable(vehicle_id, result).await
    }

    async fn send_command(
        &self,
        vehicle_id: &str,
        command: &'static str,
        body: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let outcome = retry_with_backoff(&self.retry, command, CollaboratorError::is_retryable, || {
            self.attempt_command(vehicle_id, command, &body)
        })
        .await;
        if outcome.is_ok() {
            debug!(vehicle_id, command, "command acknowledged");
        }
        outcome
    }
}

async fn decode<T>(response: reqwest::Response) -> Result<T, CollaboratorError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if status == StatusCode::REQUEST_TIMEOUT {
        return Err(CollaboratorError::VehicleUnavailable);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CollaboratorError::from_status(status, body));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| CollaboratorError::Decode(err.to_string()))
}

#[async_trait]
impl VehicleControl for HttpVehicleControl {
    async fn charge_state(&self, vehicle_id: &str) -> Result<ChargeState, CollaboratorError> {
        retry_with_backoff(
            &self.retry,
            "charge_state",
            CollaboratorError::is_retryable,
            || self.attempt_charge_state(vehicle_id),
        )
        .await
    }

    async fn start_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.send_command(vehicle_id, "charge_start", json!({})).await
    }

    async fn stop_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.send_command(vehicle_id, "charge_stop", json!({})).await
    }

    async fn set_charging_amps(
        &self,
        vehicle_id: &str,
        amps: u32,
    ) -> Result<(), CollaboratorError> {
        self.send_command(
            vehicle_id,
            "set_charging_amps",
            json!({ "charging_amps": amps }),
        )
        .await
    }

    async fn wake_up(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.send_command(vehicle_id, WAKE_UP, json!({})).await
    }
}
