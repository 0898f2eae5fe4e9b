use crate::aggregator::{Aggregator, CachedValue, GeocodeError};
use crate::app_config::AppConfig;
use crate::cache::{TtlCache, spawn_sweeper};
use crate::domain::{Address, Coordinate, EngineStatus, Prediction};
use crate::fix::{self, FixSource};
use crate::providers::{GeocodingProvider, GoogleProvider, IpApiLocator, IpLocator, NominatimProvider, OpenCageProvider};
use crate::sensor::{PositionSensor, SensorError};
use crate::tracking::{LastKnown, SharedLastKnown, SubscriptionHandle, Tracker};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

const FIX_CACHE_KEY: &str = "fix";

/// The location engine: single fixes, continuous tracking, and geocoding /
/// autocomplete over a provider fallback chain, with one shared TTL cache.
///
/// Built from injected collaborators so tests can substitute fakes. Must be
/// constructed inside a tokio runtime; construction spawns the cache sweeper,
/// the engine's only persistent background task.
pub struct LocationEngine {
    sensor: Arc<dyn PositionSensor>,
    ip: Arc<dyn IpLocator>,
    aggregator: Aggregator,
    cache: TtlCache<String, CachedValue>,
    tracker: Tracker,
    config: AppConfig,
    last_known: SharedLastKnown,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl LocationEngine {
    pub fn new(
        sensor: Arc<dyn PositionSensor>,
        ip: Arc<dyn IpLocator>,
        providers: Vec<Arc<dyn GeocodingProvider>>,
        config: AppConfig,
    ) -> LocationEngine {
        let cache: TtlCache<String, CachedValue> = TtlCache::new();
        let last_known: SharedLastKnown = Arc::new(Mutex::new(None));

        let aggregator = Aggregator::new(
            providers,
            cache.clone(),
            config.cache().address_ttl(),
            config.cache().prediction_ttl(),
            config.providers().prediction_radius_meters(),
        );
        let tracker = Tracker::new(sensor.clone(), config.tracking(), last_known.clone());
        let sweeper = spawn_sweeper(cache.clone(), config.core().cache_sweep_interval());

        LocationEngine {
            sensor,
            ip,
            aggregator,
            cache,
            tracker,
            config,
            last_known,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Wires the engine to the real provider stack: Google, then OpenCage,
    /// then Nominatim, with ip-api.com as the coarse fallback locator.
    pub fn with_default_providers(sensor: Arc<dyn PositionSensor>, config: AppConfig) -> Result<LocationEngine, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        let providers: Vec<Arc<dyn GeocodingProvider>> = vec![
            Arc::new(GoogleProvider::new(client.clone(), &config)),
            Arc::new(OpenCageProvider::new(client.clone(), &config)),
            Arc::new(NominatimProvider::new(client.clone(), &config)),
        ];
        let ip = Arc::new(IpApiLocator::new(client, &config));
        Ok(LocationEngine::new(sensor, ip, providers, config))
    }

    /// Resolves a single high-confidence coordinate. Never fails; accuracy
    /// degrades through IP fallback down to the regional default instead.
    /// A fix acquired within the fix TTL is reused without touching the sensor.
    pub async fn acquire_fix(&self) -> Coordinate {
        let key = FIX_CACHE_KEY.to_string();
        if let Some(CachedValue::Fix(fix)) = self.cache.get(&key) {
            return fix;
        }

        let (fix, source) = fix::acquire_fix(self.sensor.as_ref(), self.ip.as_ref(), self.config.fix()).await;

        // The regional default is a placeholder, not a location worth
        // remembering or reusing
        if source != FixSource::RegionalDefault {
            self.cache.set(key, CachedValue::Fix(fix.clone()), self.config.cache().fix_ttl());
            *self.last_known.lock().unwrap() = Some(LastKnown {
                coordinate: fix.clone(),
                at: Utc::now(),
            });
        }

        fix
    }

    pub fn start_tracking(&self) -> Result<(), SensorError> {
        self.tracker.start()
    }

    pub fn stop_tracking(&self) {
        self.tracker.stop()
    }

    pub fn subscribe(&self, callback: impl Fn(Coordinate) + Send + Sync + 'static) -> SubscriptionHandle {
        self.tracker.subscribe(callback)
    }

    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, GeocodeError> {
        self.aggregator.reverse_geocode(lat, lng).await
    }

    pub async fn predict(&self, text: &str, bias: Option<&Coordinate>) -> Vec<Prediction> {
        self.aggregator.predict(text, bias).await
    }

    pub fn last_known_location(&self) -> Option<Coordinate> {
        self.last_known.lock().unwrap().as_ref().map(|last| last.coordinate.clone())
    }

    pub fn status(&self) -> EngineStatus {
        // One engine lock at a time: the sample pipeline takes the session
        // lock and then last_known, so holding last_known while asking the
        // tracker for its state would invert that order
        let is_tracking = self.tracker.is_active();
        let cache_size = self.cache.len();
        let provider = self.aggregator.last_provider().map(str::to_string);
        let last_known = self.last_known.lock().unwrap().clone();

        EngineStatus {
            is_tracking,
            last_update: last_known.as_ref().map(|last| last.at),
            cache_size,
            accuracy: last_known.and_then(|last| last.coordinate.accuracy),
            provider,
        }
    }

    /// Stops tracking and the background cache sweeper. The engine stays
    /// usable for one-shot calls afterwards.
    pub fn shutdown(&self) {
        self.tracker.stop();
        if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
            sweeper.abort();
            info!("🧹 Stopped cache sweeper");
        }
    }
}

impl Drop for LocationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
