use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A geographic position as reported by a sensor or provider. All fields
/// besides `lat` and `lng` depend on the source and may be absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>, // Radius in meters, lower is better
    pub altitude: Option<f64>,
    pub altitude_accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Coordinate {
        Coordinate {
            lat,
            lng,
            ..Default::default()
        }
    }

    pub fn with_accuracy(lat: f64, lng: f64, accuracy: f64) -> Coordinate {
        Coordinate {
            lat,
            lng,
            accuracy: Some(accuracy),
            ..Default::default()
        }
    }

    pub fn validate(lat: f64, lng: f64) -> Result<(), InvalidCoordinate> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(InvalidCoordinate::Latitude(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(InvalidCoordinate::Longitude(lng));
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum InvalidCoordinate {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}
