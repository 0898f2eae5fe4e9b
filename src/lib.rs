//! Client-resident location and geocoding aggregation engine.
//!
//! Turns noisy repeated position samples into a single high-confidence fix,
//! smooths a continuous stream of updates for live tracking, and fronts
//! several geocoding/autocomplete providers with ordered fallback and TTL
//! caching. External services are reached only through the [`sensor`] and
//! [`providers`] traits, so the whole engine runs against fakes in tests.

pub mod aggregator;
pub mod app_config;
pub mod cache;
pub mod domain;
pub mod engine;
pub mod fix;
pub mod geodesy;
pub mod providers;
pub mod sensor;
pub mod tracking;

pub use aggregator::GeocodeError;
pub use domain::{Address, Coordinate, EngineStatus, Prediction};
pub use engine::LocationEngine;
pub use sensor::{PositionSensor, SensorError};
pub use tracking::SubscriptionHandle;
