use crate::app_config::AppConfig;
use crate::domain::{Address, Coordinate, Prediction};
use crate::providers::{GeocodingProvider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// OpenStreetMap Nominatim, last in the fallback order. Keyless, but the
/// usage policy requires an identifying User-Agent on every request.
pub struct NominatimProvider {
    client: Client,
    url: String,
    user_agent: String,
    timeout: Duration,
}

impl NominatimProvider {
    pub fn new(client: Client, config: &AppConfig) -> NominatimProvider {
        NominatimProvider {
            client,
            url: config.providers().nominatim().url().to_string(),
            user_agent: config.providers().nominatim().user_agent().to_string(),
            timeout: config.providers().request_timeout(),
        }
    }
}

#[async_trait]
impl GeocodingProvider for NominatimProvider {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn confidence(&self) -> f64 {
        0.88
    }

    #[instrument(skip(self))]
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, ProviderError> {
        let place = self
            .client
            .get(format!("{}/reverse", self.url))
            .header(USER_AGENT, &self.user_agent)
            .query(&[("format", "jsonv2".to_string()), ("lat", lat.to_string()), ("lon", lng.to_string())])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<NominatimPlace>()
            .await?;

        if let Some(error) = place.error {
            return Err(ProviderError::UnexpectedResponse(error));
        }

        let coordinates = place.coordinates()?;
        let address = place.address.unwrap_or_default();

        Ok(Address {
            formatted_address: place.display_name.unwrap_or_default(),
            street_number: address.house_number,
            street_name: address.road,
            locality: address.city.or(address.town).or(address.village),
            region: address.state,
            subregion: address.county,
            country: address.country,
            postal_code: address.postcode,
            place_id: place.place_id.map(|id| id.to_string()),
            coordinates,
            confidence: Some(self.confidence()),
            provider: self.name().to_string(),
        })
    }

    #[instrument(skip(self, _bias))]
    async fn predict(&self, text: &str, _bias: Option<&Coordinate>, _radius_meters: u32) -> Result<Vec<Prediction>, ProviderError> {
        let places = self
            .client
            .get(format!("{}/search", self.url))
            .header(USER_AGENT, &self.user_agent)
            .query(&[("format", "jsonv2"), ("q", text), ("limit", "5")])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<NominatimPlace>>()
            .await?;

        Ok(places
            .into_iter()
            .filter_map(|place| {
                let coordinates = place.coordinates().ok()?;
                let description = place.display_name.unwrap_or_default();
                let (main_text, secondary_text) = match description.split_once(", ") {
                    Some((main, rest)) => (main.to_string(), rest.to_string()),
                    None => (description.clone(), String::new()),
                };
                Some(Prediction {
                    place_id: place.place_id.map(|id| id.to_string()).unwrap_or_default(),
                    description,
                    main_text,
                    secondary_text,
                    coordinates: Some(coordinates),
                })
            })
            .collect())
    }
}

// API: https://nominatim.org/release-docs/latest/api/Reverse/
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    error: Option<String>,
    place_id: Option<u64>,
    display_name: Option<String>,
    lat: Option<String>, // Nominatim serializes coordinates as strings
    lon: Option<String>,
    address: Option<NominatimAddress>,
}

impl NominatimPlace {
    fn coordinates(&self) -> Result<Coordinate, ProviderError> {
        let parse = |value: &Option<String>| {
            value
                .as_deref()
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| ProviderError::UnexpectedResponse("unparseable coordinates".to_string()))
        };
        Ok(Coordinate::new(parse(&self.lat)?, parse(&self.lon)?))
    }
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
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
