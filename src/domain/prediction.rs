use crate::domain::Coordinate;
use serde::{Deserialize, Serialize};

/// A single autocomplete candidate for a partial address query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub description: String,
    pub place_id: String,
    pub main_text: String,
    pub secondary_text: String,
    pub coordinates: Option<Coordinate>,
}
