use crate::app_config::AppConfig;
use crate::domain::Coordinate;
use crate::providers::{IpLocator, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Accuracy attributed to IP-based geolocation. City-level at best.
const IP_ACCURACY_METERS: f64 = 10_000.0;

/// ip-api.com client. No credentials, single call, no retries; a failure
/// here means fix acquisition falls through to the regional default.
pub struct IpApiLocator {
    client: Client,
    url: String,
    timeout: Duration,
}

impl IpApiLocator {
    pub fn new(client: Client, config: &AppConfig) -> IpApiLocator {
        IpApiLocator {
            client,
            url: config.providers().ip().url().to_string(),
            timeout: config.providers().request_timeout(),
        }
    }
}

#[async_trait]
impl IpLocator for IpApiLocator {
    #[instrument(skip(self))]
    async fn lookup(&self) -> Result<Coordinate, ProviderError> {
        let response = self
            .client
            .get(format!("{}/json", self.url))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<IpApiResponse>()
            .await?;

        if response.status != "success" {
            return Err(ProviderError::UnexpectedResponse(response.status));
        }

        debug!("IP lookup resolved to ({}, {})", response.lat, response.lon);
        Ok(Coordinate::with_accuracy(response.lat, response.lon, IP_ACCURACY_METERS))
    }
}

// API: https://ip-api.com/docs/api:json
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
}
