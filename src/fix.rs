use crate::app_config::Fix;
use crate::domain::Coordinate;
use crate::geodesy::weighted_average;
use crate::providers::IpLocator;
use crate::sensor::PositionSensor;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, instrument, warn};

/// Where an acquired fix ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixSource {
    Sensor { samples: usize },
    IpFallback,
    RegionalDefault,
}

/// Obtains a single high-confidence coordinate.
///
/// Samples the sensor up to the attempt budget, stopping early once a sample
/// meets the target accuracy, and averages what it collected weighted by
/// accuracy. Falls back to IP-based coarse location when the sensor yields
/// nothing, and to the configured regional default when that fails too. This
/// call never refuses to answer; accuracy degrades instead.
#[instrument(skip_all)]
pub async fn acquire_fix(sensor: &dyn PositionSensor, ip: &dyn IpLocator, config: &Fix) -> (Coordinate, FixSource) {
    if sensor.is_available() {
        let samples = collect_samples(sensor, config).await;
        if let Some(fix) = weighted_average(&samples) {
            info!("📍 Acquired fix from {} sensor sample(s), accuracy {:?}", samples.len(), fix.accuracy);
            return (fix, FixSource::Sensor { samples: samples.len() });
        }
    } else {
        warn!("⚠️ No positioning sensor available, falling back to IP location");
    }

    match ip.lookup().await {
        Ok(coordinate) => {
            info!("📍 Acquired coarse fix from IP lookup, accuracy {:?}", coordinate.accuracy);
            (coordinate, FixSource::IpFallback)
        }
        Err(e) => {
            warn!("⚠️ IP lookup failed: {}. Returning the regional default", e);
            (config.default_coordinate(), FixSource::RegionalDefault)
        }
    }
}

/// Gathers up to `max_attempts` fresh high-accuracy readings. Sensor errors
/// are retried on their own counter with the same budget; exhausting it ends
/// sampling with whatever was collected so far.
async fn collect_samples(sensor: &dyn PositionSensor, config: &Fix) -> Vec<Coordinate> {
    let mut samples: Vec<Coordinate> = Vec::new();
    let mut best_accuracy = f64::INFINITY;
    let requests = AtomicU32::new(0);

    for attempt in 0..config.max_attempts() {
        let strategy = FixedInterval::new(config.retry_delay()).take(config.max_attempts().saturating_sub(1) as usize);
        let result = Retry::spawn(strategy, || {
            // The very first read gets the long timeout, every later one the short one
            let timeout = if requests.fetch_add(1, Ordering::Relaxed) == 0 {
                config.first_timeout()
            } else {
                config.retry_timeout()
            };
            sensor.request_once(true, timeout)
        })
        .await;

        match result {
            Ok(sample) => {
                debug!(attempt, "Sensor sample at ({}, {}), accuracy {:?}", sample.lat, sample.lng, sample.accuracy);
                best_accuracy = best_accuracy.min(sample.accuracy.unwrap_or(f64::INFINITY));
                samples.push(sample);
                if best_accuracy <= config.target_accuracy_meters() {
                    debug!("Target accuracy {} m reached, stopping early", config.target_accuracy_meters());
                    break;
                }
            }
            Err(e) => {
                warn!(attempt, "⚠️ Sensor read failed after retries: {}", e);
                break;
            }
        }
    }

    samples
}
