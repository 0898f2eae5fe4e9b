mod address;
mod coordinate;
mod prediction;
mod status;

pub use address::Address;
pub use coordinate::{Coordinate, InvalidCoordinate};
pub use prediction::Prediction;
pub use status::EngineStatus;
