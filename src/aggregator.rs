use crate::cache::{TtlCache, quantized_key};
use crate::domain::{Address, Coordinate, InvalidCoordinate, Prediction};
use crate::providers::GeocodingProvider;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Anything the engine caches, keyed by quantized coordinate or query text.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Fix(Coordinate),
    Address(Address),
    Predictions(Vec<Prediction>),
}

/// Queries the configured providers in priority order and stops at the first
/// success. Results carry their provider's name and fixed confidence and are
/// cached under the operation's TTL.
pub struct Aggregator {
    providers: Vec<Arc<dyn GeocodingProvider>>,
    cache: TtlCache<String, CachedValue>,
    address_ttl: Duration,
    prediction_ttl: Duration,
    prediction_radius_meters: u32,
    last_provider: Mutex<Option<&'static str>>,
}

impl Aggregator {
    pub fn new(
        providers: Vec<Arc<dyn GeocodingProvider>>,
        cache: TtlCache<String, CachedValue>,
        address_ttl: Duration,
        prediction_ttl: Duration,
        prediction_radius_meters: u32,
    ) -> Aggregator {
        Aggregator {
            providers,
            cache,
            address_ttl,
            prediction_ttl,
            prediction_radius_meters,
            last_provider: Mutex::new(None),
        }
    }

    /// Name of the provider that served the most recent successful call.
    pub fn last_provider(&self) -> Option<&'static str> {
        *self.last_provider.lock().unwrap()
    }

    /// Resolves a coordinate to an address via the provider chain. A provider
    /// failure advances to the next provider; only full exhaustion errors.
    #[instrument(skip(self))]
    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, GeocodeError> {
        Coordinate::validate(lat, lng)?;

        let key = quantized_key("rg", lat, lng);
        if let Some(CachedValue::Address(address)) = self.cache.get(&key) {
            debug!("Cache hit for reverse geocode {}", key);
            return Ok(address);
        }

        for provider in &self.providers {
            match provider.reverse_geocode(lat, lng).await {
                Ok(address) => {
                    info!("🗺️ Reverse geocoded ({}, {}) via '{}'", lat, lng, provider.name());
                    *self.last_provider.lock().unwrap() = Some(provider.name());
                    self.cache.set(key, CachedValue::Address(address.clone()), self.address_ttl);
                    return Ok(address);
                }
                Err(e) => {
                    warn!("⚠️ Provider '{}' failed to reverse geocode: {}", provider.name(), e);
                }
            }
        }

        Err(GeocodeError::AllProvidersFailed)
    }

    /// Autocomplete suggestions for a partial query. Queries shorter than two
    /// characters and full provider exhaustion both yield an empty list; "no
    /// suggestions" is a valid state, not an error.
    #[instrument(skip(self, bias))]
    pub async fn predict(&self, text: &str, bias: Option<&Coordinate>) -> Vec<Prediction> {
        let query = text.trim();
        if query.chars().count() < 2 {
            return Vec::new();
        }

        let key = match bias {
            Some(bias) => quantized_key(&format!("pr:{}", query.to_lowercase()), bias.lat, bias.lng),
            None => format!("pr:{}", query.to_lowercase()),
        };
        if let Some(CachedValue::Predictions(predictions)) = self.cache.get(&key) {
            debug!("Cache hit for prediction {}", key);
            return predictions;
        }

        for provider in &self.providers {
            match provider.predict(query, bias, self.prediction_radius_meters).await {
                Ok(predictions) if !predictions.is_empty() => {
                    info!("🗺️ Predicted {} candidate(s) for '{}' via '{}'", predictions.len(), query, provider.name());
                    *self.last_provider.lock().unwrap() = Some(provider.name());
                    self.cache.set(key, CachedValue::Predictions(predictions.clone()), self.prediction_ttl);
                    return predictions;
                }
                Ok(_) => {
                    debug!("Provider '{}' had no predictions for '{}'", provider.name(), query);
                }
                Err(e) => {
                    warn!("⚠️ Provider '{}' failed to predict: {}", provider.name(), e);
                }
            }
        }

        Vec::new()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum GeocodeError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidCoordinate),
    #[error("every configured provider failed")]
    AllProvidersFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        name: &'static str,
        succeeds: bool,
        predictions: Vec<Prediction>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn succeeding(name: &'static str) -> Arc<FakeProvider> {
            Arc::new(FakeProvider {
                name,
                succeeds: true,
                predictions: vec![Prediction {
                    description: format!("{} prediction", name),
                    place_id: "id".to_string(),
                    main_text: "main".to_string(),
                    secondary_text: "secondary".to_string(),
                    coordinates: None,
                }],
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<FakeProvider> {
            Arc::new(FakeProvider {
                name,
                succeeds: false,
                predictions: Vec::new(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl GeocodingProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn confidence(&self) -> f64 {
            0.9
        }

        async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.succeeds {
                Ok(Address {
                    formatted_address: format!("{} address", self.name),
                    coordinates: Coordinate::new(lat, lng),
                    confidence: Some(self.confidence()),
                    provider: self.name.to_string(),
                    ..Default::default()
                })
            } else {
                Err(ProviderError::EmptyResponse)
            }
        }

        async fn predict(&self, _text: &str, _bias: Option<&Coordinate>, _radius_meters: u32) -> Result<Vec<Prediction>, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.succeeds {
                Ok(self.predictions.clone())
            } else {
                Err(ProviderError::MissingCredentials)
            }
        }
    }

    fn aggregator(providers: Vec<Arc<FakeProvider>>) -> Aggregator {
        Aggregator::new(
            providers.into_iter().map(|p| p as Arc<dyn GeocodingProvider>).collect(),
            TtlCache::new(),
            Duration::from_secs(3600),
            Duration::from_secs(300),
            50_000,
        )
    }

    #[tokio::test]
    async fn the_first_successful_provider_wins_and_later_ones_are_never_queried() {
        let a = FakeProvider::failing("a");
        let b = FakeProvider::succeeding("b");
        let c = FakeProvider::succeeding("c");
        let aggregator = aggregator(vec![a.clone(), b.clone(), c.clone()]);

        let address = aggregator.reverse_geocode(5.6037, -0.1870).await.unwrap();

        assert_eq!(address.provider, "b");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
        assert_eq!(aggregator.last_provider(), Some("b"));
    }

    #[tokio::test]
    async fn a_repeated_lookup_within_the_ttl_hits_the_cache() {
        let a = FakeProvider::succeeding("a");
        let aggregator = aggregator(vec![a.clone()]);

        let first = aggregator.reverse_geocode(5.6037, -0.1870).await.unwrap();
        // Sub-centimeter jitter quantizes to the same key
        let second = aggregator.reverse_geocode(5.60370000004, -0.18700000002).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn exhausting_every_provider_is_an_error() {
        let a = FakeProvider::failing("a");
        let b = FakeProvider::failing("b");
        let aggregator = aggregator(vec![a, b]);

        let error = aggregator.reverse_geocode(5.6037, -0.1870).await.unwrap_err();

        assert_eq!(error, GeocodeError::AllProvidersFailed);
    }

    #[tokio::test]
    async fn an_out_of_range_coordinate_is_rejected_before_any_provider_call() {
        let a = FakeProvider::succeeding("a");
        let aggregator = aggregator(vec![a.clone()]);

        let error = aggregator.reverse_geocode(95.0, 0.0).await.unwrap_err();

        assert_eq!(error, GeocodeError::InvalidInput(InvalidCoordinate::Latitude(95.0)));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn a_single_character_query_returns_no_predictions_without_a_provider_call() {
        let a = FakeProvider::succeeding("a");
        let aggregator = aggregator(vec![a.clone()]);

        let predictions = aggregator.predict("a", None).await;

        assert!(predictions.is_empty());
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn prediction_fallback_skips_failing_providers() {
        let a = FakeProvider::failing("a");
        let b = FakeProvider::succeeding("b");
        let aggregator = aggregator(vec![a, b]);

        let predictions = aggregator.predict("independence", None).await;

        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].description, "b prediction");
    }

    #[tokio::test]
    async fn prediction_exhaustion_yields_an_empty_list_not_an_error() {
        let a = FakeProvider::failing("a");
        let aggregator = aggregator(vec![a]);

        let predictions = aggregator.predict("independence", None).await;

        assert!(predictions.is_empty());
    }

    #[tokio::test]
    async fn cached_predictions_are_keyed_by_query_and_bias() {
        let a = FakeProvider::succeeding("a");
        let aggregator = aggregator(vec![a.clone()]);
        let bias = Coordinate::new(5.6037, -0.1870);

        aggregator.predict("independence", Some(&bias)).await;
        aggregator.predict("independence", Some(&bias)).await;
        assert_eq!(a.calls(), 1);

        // A different bias is a different key
        let other_bias = Coordinate::new(6.6885, -1.6244);
        aggregator.predict("independence", Some(&other_bias)).await;
        assert_eq!(a.calls(), 2);
    }
}
