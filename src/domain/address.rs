use crate::domain::Coordinate;
use serde::{Deserialize, Serialize};

/// The engine's provider-agnostic address shape. `provider` records which
/// client produced it; `confidence` is a score in [0, 1].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub formatted_address: String,
    pub street_number: Option<String>,
    pub street_name: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub subregion: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub place_id: Option<String>,
    pub coordinates: Coordinate,
    pub confidence: Option<f64>,
    pub provider: String,
}
