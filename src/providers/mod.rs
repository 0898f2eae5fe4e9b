mod google;
mod ip_api;
mod nominatim;
mod opencage;

pub use google::GoogleProvider;
pub use ip_api::IpApiLocator;
pub use nominatim::NominatimProvider;
pub use opencage::OpenCageProvider;

use crate::domain::{Address, Coordinate, Prediction};
use async_trait::async_trait;
use thiserror::Error;

/// One external geocoding/autocomplete service. The aggregator iterates a
/// priority-ordered list of these and takes the first success, so any error
/// returned here is non-fatal by construction.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fixed confidence assigned to this provider's results, reflecting its
    /// place in the fallback order.
    fn confidence(&self) -> f64;

    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Address, ProviderError>;

    async fn predict(&self, text: &str, bias: Option<&Coordinate>, radius_meters: u32) -> Result<Vec<Prediction>, ProviderError>;
}

/// Coarse IP-based location, used as the last network fallback for fix
/// acquisition. Single call, no retries.
#[async_trait]
pub trait IpLocator: Send + Sync {
    async fn lookup(&self) -> Result<Coordinate, ProviderError>;
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("no API credentials configured")]
    MissingCredentials,
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("provider returned no results")]
    EmptyResponse,
}
