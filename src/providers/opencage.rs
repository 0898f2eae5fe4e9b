use crate::app_config::AppConfig;
use crate::domain::{Address, Coordinate, Prediction};
use crate::providers::{GeocodingProvider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// OpenCage geocoder, second in the fallback order.
pub struct OpenCageProvider {
    client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenCageProvider {
    pub fn new(client: Client, config: &AppConfig) -> OpenCageProvider {
        OpenCageProvider {
            client,
            url: config.providers().opencage().url().to_string(),
            api_key: config.providers().opencage().api_key().to_string(),
            timeout: config.providers().request_timeout(),
        }
    }

    async fn geocode(&self, query: String, bias: Option<&Coordinate>, limit: u8) -> Result<Vec<OpenCageResult>, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::MissingCredentials);
        }

        let mut params = vec![
            ("q", query),
            ("key", self.api_key.clone()),
            ("limit", limit.to_string()),
            ("no_annotations", "1".to_string()),
        ];
        if let Some(bias) = bias {
            params.push(("proximity", format!("{},{}", bias.lat, bias.lng)));
        }

        let response = self
            .client
            .get(format!("{}/geocode/v1/json", self.url))
            .query(&params)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<OpenCageResponse>()
            .await?;

        if response.results.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(response.results)
    }
}

#[async_trait]
impl GeocodingProvider for OpenCageProvider {
    fn name(&self) -> &'static str {
        "opencage"
    }

    fn confidence(&self) -> f64 {
        0.90
    }

    #[instrument(skip(self))]
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, ProviderError> {
        let results = self.geocode(format!("{}+{}", lat, lng), None, 1).await?;
        let result = results.into_iter().next().ok_or(ProviderError::EmptyResponse)?;

        Ok(Address {
            formatted_address: result.formatted.clone(),
            street_number: result.components.house_number.clone(),
            street_name: result.components.road.clone(),
            locality: result.components.locality(),
            region: result.components.state.clone(),
            subregion: result.components.county.clone(),
            country: result.components.country.clone(),
            postal_code: result.components.postcode.clone(),
            place_id: None, // OpenCage has no stable place identifiers
            coordinates: Coordinate::new(result.geometry.lat, result.geometry.lng),
            confidence: Some(self.confidence()),
            provider: self.name().to_string(),
        })
    }

    #[instrument(skip(self, bias))]
    async fn predict(&self, text: &str, bias: Option<&Coordinate>, _radius_meters: u32) -> Result<Vec<Prediction>, ProviderError> {
        let results = self.geocode(text.to_string(), bias, 5).await?;

        Ok(results
            .into_iter()
            .map(|result| {
                let (main_text, secondary_text) = split_description(&result.formatted);
                Prediction {
                    description: result.formatted.clone(),
                    // Coordinates stand in for the missing place id
                    place_id: format!("{:.6},{:.6}", result.geometry.lat, result.geometry.lng),
                    main_text,
                    secondary_text,
                    coordinates: Some(Coordinate::new(result.geometry.lat, result.geometry.lng)),
                }
            })
            .collect())
    }
}

fn split_description(formatted: &str) -> (String, String) {
    match formatted.split_once(", ") {
        Some((main, rest)) => (main.to_string(), rest.to_string()),
        None => (formatted.to_string(), String::new()),
    }
}

// API: https://opencagedata.com/api#response
#[derive(Debug, Deserialize)]
struct OpenCageResponse {
    #[serde(default)]
    results: Vec<OpenCageResult>,
}

#[derive(Debug, Deserialize)]
struct OpenCageResult {
    formatted: String,
    geometry: OpenCageGeometry,
    #[serde(default)]
    components: OpenCageComponents,
}

#[derive(Debug, Deserialize)]
struct OpenCageGeometry {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OpenCageComponents {
    house_number: Option<String>,
    road: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    county: Option<String>,
    country: Option<String>,
    postcode: Option<String>,
}

impl OpenCageComponents {
    fn locality(&self) -> Option<String> {
        self.city.clone().or_else(|| self.town.clone()).or_else(|| self.village.clone())
    }
}
