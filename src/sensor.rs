use crate::domain::Coordinate;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

/// One delivery from a watch subscription: either a raw sample or a sensor
/// error the consumer is expected to recover from.
pub type SensorSample = Result<Coordinate, SensorError>;

/// Boundary to the platform positioning sensor. The engine only ever talks to
/// this trait, so tests substitute scripted fakes.
#[async_trait]
pub trait PositionSensor: Send + Sync {
    /// Whether a positioning sensor is present and permitted at all.
    fn is_available(&self) -> bool;

    /// Requests a single fresh reading; no cached reading is acceptable.
    async fn request_once(&self, high_accuracy: bool, timeout: Duration) -> Result<Coordinate, SensorError>;

    /// Starts a continuous sample subscription.
    fn watch(&self, high_accuracy: bool) -> Result<SensorWatch, SensorError>;
}

/// A live sample subscription. `samples` yields readings until the
/// subscription is cancelled; `handle.cancel()` releases the underlying
/// sensor synchronously.
pub struct SensorWatch {
    pub samples: Receiver<SensorSample>,
    pub handle: WatchHandle,
}

#[derive(Clone)]
pub struct WatchHandle {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl WatchHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> WatchHandle {
        WatchHandle { cancel: Arc::new(cancel) }
    }

    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchHandle")
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("positioning permission denied")]
    Denied,
    #[error("sensor read timed out after {0:?}")]
    Timeout(Duration),
    #[error("no positioning sensor available")]
    Unavailable,
}
