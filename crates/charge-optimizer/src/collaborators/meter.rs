use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::retry::{retry_with_backoff, RetryPolicy};
use super::{CollaboratorError, PowerProduction};
use crate::config::CollaboratorConfig;

/// Reads net production from a meter endpoint answering `{"watts": <f64>}`.
#[derive(Debug, Clone)]
pub struct HttpPowerProduction {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Reading {
    watts: f64,
}

impl HttpPowerProduction {
    pub fn new(config: &CollaboratorConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| CollaboratorError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            url: config.power_meter_url.clone(),
            retry: RetryPolicy::default().with_max_attempts(config.max_retries.saturating_add(1)),
        })
    }

    async fn read_once(&self) -> Result<f64, CollaboratorError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(status, body));
        }

        let reading: Reading = response
            .json()
            .await
            .map_err(|err| CollaboratorError::Decode(err.to_string()))?;
        if !reading.watts.is_finite() {
            return Err(CollaboratorError::Decode(format!(
                "non-finite production reading {}",
                reading.watts
            )));
        }
        Ok(reading.watts)
    }
}

#[async_trait]
impl PowerProduction for HttpPowerProduction {
    async fn net_power_production(&self) -> Result<f64, CollaboratorError> {
        retry_with_backoff(
            &self.retry,
            "net_power_production",
            CollaboratorError::is_retryable,
            || self.read_once(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_accepts_negative_net_production() {
        let reading: Reading = serde_json::from_str(r#"{"watts": -1325.5}"#).expect("parses");
        assert_eq!(reading.watts, -1325.5);
    }
}
