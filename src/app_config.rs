use crate::domain::Coordinate;
use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    core: Core,
    cache: Cache,
    fix: Fix,
    tracking: Tracking,
    providers: Providers,
}

impl AppConfig {
    pub fn load() -> Self {
        Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(config::File::with_name("config_local").required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn fix(&self) -> &Fix {
        &self.fix
    }

    pub fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }
}

#[derive(Debug, Deserialize)]
pub struct Core {
    #[serde(with = "humantime_serde")]
    cache_sweep_interval: Duration,
}

impl Core {
    pub fn cache_sweep_interval(&self) -> Duration {
        self.cache_sweep_interval
    }
}

#[derive(Debug, Deserialize)]
pub struct Cache {
    #[serde(with = "humantime_serde")]
    fix_ttl: Duration,
    #[serde(with = "humantime_serde")]
    address_ttl: Duration,
    #[serde(with = "humantime_serde")]
    prediction_ttl: Duration,
}

impl Cache {
    pub fn fix_ttl(&self) -> Duration {
        self.fix_ttl
    }

    pub fn address_ttl(&self) -> Duration {
        self.address_ttl
    }

    pub fn prediction_ttl(&self) -> Duration {
        self.prediction_ttl
    }
}

#[derive(Debug, Deserialize)]
pub struct Fix {
    max_attempts: u32,
    target_accuracy_meters: f64,
    #[serde(with = "humantime_serde")]
    first_timeout: Duration,
    #[serde(with = "humantime_serde")]
    retry_timeout: Duration,
    retry_delay_ms: u64,
    default_lat: f64,
    default_lng: f64,
    default_accuracy_meters: f64,
}

impl Fix {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn target_accuracy_meters(&self) -> f64 {
        self.target_accuracy_meters
    }

    pub fn first_timeout(&self) -> Duration {
        self.first_timeout
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Regional default returned when both the sensor and the IP fallback
    /// fail. The engine never refuses to answer a fix request.
    pub fn default_coordinate(&self) -> Coordinate {
        Coordinate::with_accuracy(self.default_lat, self.default_lng, self.default_accuracy_meters)
    }
}

#[derive(Debug, Deserialize)]
pub struct Tracking {
    smoothing_factor: f64,
    movement_threshold_meters: f64,
    history_size: usize,
}

impl Tracking {
    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    pub fn movement_threshold_meters(&self) -> f64 {
        self.movement_threshold_meters
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }
}

#[derive(Debug, Deserialize)]
pub struct Providers {
    request_timeout_ms: u64,
    prediction_radius_meters: u32,
    google: Google,
    opencage: OpenCage,
    nominatim: Nominatim,
    ip: Ip,
}

impl Providers {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn prediction_radius_meters(&self) -> u32 {
        self.prediction_radius_meters
    }

    pub fn google(&self) -> &Google {
        &self.google
    }

    pub fn opencage(&self) -> &OpenCage {
        &self.opencage
    }

    pub fn nominatim(&self) -> &Nominatim {
        &self.nominatim
    }

    pub fn ip(&self) -> &Ip {
        &self.ip
    }
}

#[derive(Debug, Deserialize)]
pub struct Google {
    url: String,
    api_key: String,
}

impl Google {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenCage {
    url: String,
    api_key: String,
}

impl OpenCage {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

#[derive(Debug, Deserialize)]
pub struct Nominatim {
    url: String,
    user_agent: String,
}

impl Nominatim {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[derive(Debug, Deserialize)]
pub struct Ip {
    url: String,
}

impl Ip {
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn new() -> Self {
        AppConfigBuilder {
            config: AppConfig {
                core: Core {
                    cache_sweep_interval: Duration::from_secs(300),
                },
                cache: Cache {
                    fix_ttl: Duration::from_secs(60),
                    address_ttl: Duration::from_secs(3600),
                    prediction_ttl: Duration::from_secs(300),
                },
                fix: Fix {
                    max_attempts: 3,
                    target_accuracy_meters: 10.0,
                    first_timeout: Duration::from_millis(200),
                    retry_timeout: Duration::from_millis(100),
                    retry_delay_ms: 1,
                    default_lat: 5.6037,
                    default_lng: -0.1870,
                    default_accuracy_meters: 50_000.0,
                },
                tracking: Tracking {
                    smoothing_factor: 0.3,
                    movement_threshold_meters: 3.0,
                    history_size: 5,
                },
                providers: Providers {
                    request_timeout_ms: 1_000,
                    prediction_radius_meters: 50_000,
                    google: Google {
                        url: "https://maps.googleapis.com".to_string(),
                        api_key: "key".to_string(),
                    },
                    opencage: OpenCage {
                        url: "https://api.opencagedata.com".to_string(),
                        api_key: "key".to_string(),
                    },
                    nominatim: Nominatim {
                        url: "https://nominatim.openstreetmap.org".to_string(),
                        user_agent: "geofix-tests".to_string(),
                    },
                    ip: Ip {
                        url: "http://ip-api.com".to_string(),
                    },
                },
            },
        }
    }

    pub fn google_url(mut self, url: String) -> Self {
        self.config.providers.google.url = url;
        self
    }

    pub fn google_api_key(mut self, api_key: String) -> Self {
        self.config.providers.google.api_key = api_key;
        self
    }

    pub fn opencage_url(mut self, url: String) -> Self {
        self.config.providers.opencage.url = url;
        self
    }

    pub fn nominatim_url(mut self, url: String) -> Self {
        self.config.providers.nominatim.url = url;
        self
    }

    pub fn ip_url(mut self, url: String) -> Self {
        self.config.providers.ip.url = url;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}
