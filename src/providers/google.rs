use crate::app_config::AppConfig;
use crate::domain::{Address, Coordinate, Prediction};
use crate::providers::{GeocodingProvider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Google Maps geocoding and Places autocomplete. First in the fallback
/// order, so it carries the highest fixed confidence.
pub struct GoogleProvider {
    client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl GoogleProvider {
    pub fn new(client: Client, config: &AppConfig) -> GoogleProvider {
        GoogleProvider {
            client,
            url: config.providers().google().url().to_string(),
            api_key: config.providers().google().api_key().to_string(),
            timeout: config.providers().request_timeout(),
        }
    }

    fn require_key(&self) -> Result<&str, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::MissingCredentials);
        }
        Ok(&self.api_key)
    }
}

#[async_trait]
impl GeocodingProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn confidence(&self) -> f64 {
        0.95
    }

    #[instrument(skip(self))]
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, ProviderError> {
        let key = self.require_key()?;

        let response = self
            .client
            .get(format!("{}/maps/api/geocode/json", self.url))
            .query(&[("latlng", format!("{},{}", lat, lng)), ("key", key.to_string())])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<GeocodeResponse>()
            .await?;

        if response.status != "OK" {
            return match response.status.as_str() {
                "ZERO_RESULTS" => Err(ProviderError::EmptyResponse),
                status => Err(ProviderError::UnexpectedResponse(status.to_string())),
            };
        }

        let result = response.results.into_iter().next().ok_or(ProviderError::EmptyResponse)?;
        debug!("Resolved ({}, {}) to '{}'", lat, lng, result.formatted_address);

        Ok(map_address(result, self.name(), self.confidence()))
    }

    #[instrument(skip(self, bias))]
    async fn predict(&self, text: &str, bias: Option<&Coordinate>, radius_meters: u32) -> Result<Vec<Prediction>, ProviderError> {
        let key = self.require_key()?;

        let mut query = vec![("input", text.to_string()), ("key", key.to_string())];
        if let Some(bias) = bias {
            query.push(("location", format!("{},{}", bias.lat, bias.lng)));
            query.push(("radius", radius_meters.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/maps/api/place/autocomplete/json", self.url))
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<AutocompleteResponse>()
            .await?;

        match response.status.as_str() {
            "OK" | "ZERO_RESULTS" => {}
            status => return Err(ProviderError::UnexpectedResponse(status.to_string())),
        }

        Ok(response
            .predictions
            .into_iter()
            .map(|prediction| Prediction {
                description: prediction.description,
                place_id: prediction.place_id,
                main_text: prediction.structured_formatting.main_text,
                secondary_text: prediction.structured_formatting.secondary_text,
                coordinates: None,
            })
            .collect())
    }
}

fn map_address(result: GeocodeResult, provider: &str, confidence: f64) -> Address {
    let component = |kind: &str| {
        result
            .address_components
            .iter()
            .find(|component| component.types.iter().any(|t| t == kind))
            .map(|component| component.long_name.clone())
    };

    Address {
        street_number: component("street_number"),
        street_name: component("route"),
        locality: component("locality"),
        region: component("administrative_area_level_1"),
        subregion: component("administrative_area_level_2"),
        country: component("country"),
        postal_code: component("postal_code"),
        formatted_address: result.formatted_address,
        place_id: Some(result.place_id),
        coordinates: Coordinate::new(result.geometry.location.lat, result.geometry.location.lng),
        confidence: Some(confidence),
        provider: provider.to_string(),
    }
}

// API: https://developers.google.com/maps/documentation/geocoding/requests-reverse-geocoding
#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    place_id: String,
    geometry: Geometry,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    types: Vec<String>,
}

// API: https://developers.google.com/maps/documentation/places/web-service/autocomplete
#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    status: String,
    #[serde(default)]
    predictions: Vec<AutocompletePrediction>,
}

#[derive(Debug, Deserialize)]
struct AutocompletePrediction {
    description: String,
    place_id: String,
    structured_formatting: StructuredFormatting,
}

#[derive(Debug, Deserialize)]
struct StructuredFormatting {
    main_text: String,
    #[serde(default)]
    secondary_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfigBuilder;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn provider(url: String) -> GoogleProvider {
        let config = AppConfigBuilder::new().google_url(url).build();
        GoogleProvider::new(Client::new(), &config)
    }

    #[tokio::test]
    async fn reverse_geocode_maps_the_first_result_to_an_address() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/maps/api/geocode/json")
            .match_query(Matcher::UrlEncoded("key".to_string(), "key".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(include_str!("../../tests/resources/google_geocode_response.json"))
            .create_async()
            .await;

        let address = provider(server.url()).reverse_geocode(5.6037, -0.1870).await.unwrap();

        mock.assert();
        assert_eq!(
            address,
            Address {
                formatted_address: "Independence Ave, Accra, Ghana".to_string(),
                street_number: None,
                street_name: Some("Independence Avenue".to_string()),
                locality: Some("Accra".to_string()),
                region: Some("Greater Accra Region".to_string()),
                subregion: None,
                country: Some("Ghana".to_string()),
                postal_code: None,
                place_id: Some("ChIJd9Y2YQKb3w8RpPznxfoCs24".to_string()),
                coordinates: Coordinate::new(5.6038, -0.1871),
                confidence: Some(0.95),
                provider: "google".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn reverse_geocode_with_zero_results_is_an_empty_response_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/maps/api/geocode/json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{ "status": "ZERO_RESULTS", "results": [] }"#)
            .create_async()
            .await;

        let error = provider(server.url()).reverse_geocode(0.0, 0.0).await.unwrap_err();

        assert!(matches!(error, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn a_missing_api_key_fails_without_a_network_call() {
        let config = AppConfigBuilder::new().google_api_key(String::new()).build();
        let provider = GoogleProvider::new(Client::new(), &config);

        let error = provider.reverse_geocode(5.6037, -0.1870).await.unwrap_err();

        assert!(matches!(error, ProviderError::MissingCredentials));
    }

    #[tokio::test]
    async fn predict_sends_the_bias_location_and_maps_predictions() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/maps/api/place/autocomplete/json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("input".to_string(), "indep".to_string()),
                Matcher::UrlEncoded("location".to_string(), "5.6037,-0.187".to_string()),
                Matcher::UrlEncoded("radius".to_string(), "50000".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(include_str!("../../tests/resources/google_autocomplete_response.json"))
            .create_async()
            .await;

        let bias = Coordinate::new(5.6037, -0.187);
        let predictions = provider(server.url()).predict("indep", Some(&bias), 50_000).await.unwrap();

        mock.assert();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].main_text, "Independence Avenue");
        assert_eq!(predictions[0].secondary_text, "Accra, Ghana");
        assert_eq!(predictions[0].place_id, "ChIJd9Y2YQKb3w8RpPznxfoCs24");
    }
}
