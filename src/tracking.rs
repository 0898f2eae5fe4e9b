use crate::app_config::Tracking;
use crate::domain::Coordinate;
use crate::geodesy::distance_meters;
use crate::sensor::{PositionSensor, SensorError, SensorSample, WatchHandle};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackingStatus {
    Stopped,
    Starting,
    Active,
}

/// The most recent position the engine resolved, shared between fix
/// acquisition and tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct LastKnown {
    pub coordinate: Coordinate,
    pub at: DateTime<Utc>,
}

pub type SharedLastKnown = Arc<Mutex<Option<LastKnown>>>;

type Subscriber = Box<dyn Fn(Coordinate) + Send + Sync>;

/// Follows a live stream of sensor samples, smooths it, and fans updates out
/// to subscribers, suppressing jitter below the movement threshold.
///
/// Subscribers survive stop/start; only `SubscriptionHandle::unsubscribe`
/// removes one.
pub struct Tracker {
    sensor: Arc<dyn PositionSensor>,
    smoothing_factor: f64,
    movement_threshold_meters: f64,
    history_size: usize,
    session: Arc<Mutex<Session>>,
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
    next_subscriber_id: AtomicU64,
    last_known: SharedLastKnown,
}

struct Session {
    status: TrackingStatus,
    history: VecDeque<Coordinate>,
    smoothed: Option<Coordinate>,
    last_published: Option<Coordinate>,
    watch_handle: Option<WatchHandle>,
    consumer: Option<JoinHandle<()>>,
}

impl Session {
    fn new() -> Session {
        Session {
            status: TrackingStatus::Stopped,
            history: VecDeque::new(),
            smoothed: None,
            last_published: None,
            watch_handle: None,
            consumer: None,
        }
    }
}

impl Tracker {
    pub fn new(sensor: Arc<dyn PositionSensor>, config: &Tracking, last_known: SharedLastKnown) -> Tracker {
        Tracker {
            sensor,
            smoothing_factor: config.smoothing_factor(),
            movement_threshold_meters: config.movement_threshold_meters(),
            history_size: config.history_size(),
            session: Arc::new(Mutex::new(Session::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(0),
            last_known,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().unwrap().status == TrackingStatus::Active
    }

    /// Starts a tracking session. A no-op when one is already active.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), SensorError> {
        let mut session = self.session.lock().unwrap();
        if session.status == TrackingStatus::Active {
            debug!("Tracking already active, ignoring start");
            return Ok(());
        }

        info!("🛰️ Starting tracking session...");
        session.status = TrackingStatus::Starting;

        let watch = match self.sensor.watch(true) {
            Ok(watch) => watch,
            Err(e) => {
                warn!("🛰️ Starting tracking session... failed, {}", e);
                session.status = TrackingStatus::Stopped;
                return Err(e);
            }
        };

        session.watch_handle = Some(watch.handle);

        let pipeline = SamplePipeline {
            session: self.session.clone(),
            subscribers: self.subscribers.clone(),
            last_known: self.last_known.clone(),
            smoothing_factor: self.smoothing_factor,
            movement_threshold_meters: self.movement_threshold_meters,
            history_size: self.history_size,
        };
        let mut samples = ReceiverStream::new(watch.samples);
        session.consumer = Some(tokio::spawn(async move {
            while let Some(sample) = samples.next().await {
                pipeline.handle_sample(sample);
            }
            debug!("🛰️ Sensor watch stream ended");
        }));

        session.status = TrackingStatus::Active;
        info!("🛰️ Starting tracking session... OK");
        Ok(())
    }

    /// Stops the session and releases the sensor watch. No publish can fire
    /// after this returns: the state flip and the publish path share the
    /// session lock.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let mut session = self.session.lock().unwrap();
        if session.status == TrackingStatus::Stopped {
            return;
        }

        if let Some(handle) = session.watch_handle.take() {
            handle.cancel();
        }
        if let Some(consumer) = session.consumer.take() {
            consumer.abort();
        }
        session.status = TrackingStatus::Stopped;
        session.history.clear();
        session.smoothed = None;
        session.last_published = None;
        info!("🛰️ Stopped tracking session");
    }

    /// Registers a callback for published positions. The returned handle is
    /// the only way to remove it again.
    pub fn subscribe(&self, callback: impl Fn(Coordinate) + Send + Sync + 'static) -> SubscriptionHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, Box::new(callback));
        SubscriptionHandle {
            id,
            subscribers: self.subscribers.clone(),
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.lock() {
            if let Some(handle) = session.watch_handle.take() {
                handle.cancel();
            }
            if let Some(consumer) = session.consumer.take() {
                consumer.abort();
            }
        }
    }
}

pub struct SubscriptionHandle {
    id: u64,
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.subscribers.lock().unwrap().remove(&self.id);
    }
}

/// The per-sample path, extracted so the consumer task owns no `&Tracker`.
struct SamplePipeline {
    session: Arc<Mutex<Session>>,
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
    last_known: SharedLastKnown,
    smoothing_factor: f64,
    movement_threshold_meters: f64,
    history_size: usize,
}

impl SamplePipeline {
    /// Single synchronous entry point for every sensor delivery. Publishing
    /// happens under the session lock, so `stop()` cannot return while a
    /// publish is in flight. Subscriber callbacks must not call back into the
    /// tracker.
    fn handle_sample(&self, sample: SensorSample) {
        let mut session = self.session.lock().unwrap();
        if session.status != TrackingStatus::Active {
            return;
        }

        let raw = match sample {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ Sensor error mid-session: {}. Continuing", e);
                // Keep subscribers fed with the last point rather than starving them
                if let Some(last) = session.last_published.clone() {
                    self.publish(&last);
                }
                return;
            }
        };

        session.history.push_back(raw.clone());
        while session.history.len() > self.history_size {
            session.history.pop_front();
        }

        let smoothed = match session.smoothed.take() {
            Some(previous) if session.history.len() >= 2 => self.smooth(&previous, &raw),
            _ => raw,
        };
        session.smoothed = Some(smoothed.clone());

        if self.should_publish(session.last_published.as_ref(), &smoothed) {
            session.last_published = Some(smoothed.clone());
            self.publish(&smoothed);
        }
    }

    /// Exponential smoothing: blend the previous smoothed point with the raw
    /// sample at factor α, keeping the better accuracy of the two.
    fn smooth(&self, previous: &Coordinate, raw: &Coordinate) -> Coordinate {
        let alpha = self.smoothing_factor;
        let accuracy = match (previous.accuracy, raw.accuracy) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Coordinate {
            lat: previous.lat * (1.0 - alpha) + raw.lat * alpha,
            lng: previous.lng * (1.0 - alpha) + raw.lng * alpha,
            accuracy,
            ..raw.clone()
        }
    }

    fn should_publish(&self, last_published: Option<&Coordinate>, smoothed: &Coordinate) -> bool {
        let Some(last) = last_published else {
            return true; // First sample always publishes
        };

        let moved = distance_meters(last, smoothed);
        if moved >= self.movement_threshold_meters {
            return true;
        }

        let improved = match (smoothed.accuracy, last.accuracy) {
            (Some(new), Some(old)) => new < old,
            (Some(_), None) => true,
            _ => false,
        };
        if improved {
            return true;
        }

        debug!("Suppressing update, moved {:.2} m without accuracy improvement", moved);
        false
    }

    fn publish(&self, coordinate: &Coordinate) {
        *self.last_known.lock().unwrap() = Some(LastKnown {
            coordinate: coordinate.clone(),
            at: Utc::now(),
        });

        let subscribers = self.subscribers.lock().unwrap();
        debug!("📡 Publishing ({}, {}) to {} subscriber(s)", coordinate.lat, coordinate.lng, subscribers.len());
        for subscriber in subscribers.values() {
            subscriber(coordinate.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfigBuilder;
    use crate::sensor::SensorWatch;
    use async_trait::async_trait;
    use std::time::Duration;
    use test_log::test;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    /// Sensor whose watch channel is fed by hand from the test.
    struct ChannelSensor {
        tx: Arc<Mutex<Option<mpsc::Sender<SensorSample>>>>,
        rx: Mutex<Option<mpsc::Receiver<SensorSample>>>,
    }

    impl ChannelSensor {
        fn new() -> (ChannelSensor, mpsc::Sender<SensorSample>) {
            let (tx, rx) = mpsc::channel(16);
            let sensor = ChannelSensor {
                tx: Arc::new(Mutex::new(Some(tx.clone()))),
                rx: Mutex::new(Some(rx)),
            };
            (sensor, tx)
        }
    }

    #[async_trait]
    impl PositionSensor for ChannelSensor {
        fn is_available(&self) -> bool {
            true
        }

        async fn request_once(&self, _high_accuracy: bool, _timeout: Duration) -> Result<Coordinate, SensorError> {
            Err(SensorError::Unavailable)
        }

        fn watch(&self, _high_accuracy: bool) -> Result<SensorWatch, SensorError> {
            let samples = self.rx.lock().unwrap().take().ok_or(SensorError::Unavailable)?;
            let tx = self.tx.clone();
            Ok(SensorWatch {
                samples,
                handle: WatchHandle::new(move || {
                    // Dropping the sender closes the channel synchronously
                    tx.lock().unwrap().take();
                }),
            })
        }
    }

    fn tracker_with(sensor: ChannelSensor) -> (Tracker, Arc<Mutex<Vec<Coordinate>>>) {
        let config = AppConfigBuilder::new().build();
        let tracker = Tracker::new(Arc::new(sensor), config.tracking(), Arc::new(Mutex::new(None)));

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        // Handle is leaked on purpose, the subscriber lives for the whole test
        std::mem::forget(tracker.subscribe(move |coordinate| sink.lock().unwrap().push(coordinate)));

        (tracker, published)
    }

    async fn drain() {
        sleep(Duration::from_millis(50)).await;
    }

    #[test(tokio::test)]
    async fn jitter_below_the_movement_threshold_publishes_only_once() {
        let (sensor, tx) = ChannelSensor::new();
        let (tracker, published) = tracker_with(sensor);
        tracker.start().unwrap();

        // ~1e-6 degrees of latitude is about 0.11 m
        tx.send(Ok(Coordinate::with_accuracy(5.603700, -0.187000, 20.0))).await.unwrap();
        tx.send(Ok(Coordinate::with_accuracy(5.603701, -0.187001, 20.0))).await.unwrap();
        tx.send(Ok(Coordinate::with_accuracy(5.603699, -0.187000, 20.0))).await.unwrap();
        drain().await;

        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[test(tokio::test)]
    async fn movement_past_the_threshold_publishes_again() {
        let (sensor, tx) = ChannelSensor::new();
        let (tracker, published) = tracker_with(sensor);
        tracker.start().unwrap();

        tx.send(Ok(Coordinate::with_accuracy(5.6037, -0.1870, 20.0))).await.unwrap();
        // ~100 m north; even after α = 0.3 smoothing that is ~30 m of motion
        tx.send(Ok(Coordinate::with_accuracy(5.6046, -0.1870, 20.0))).await.unwrap();
        drain().await;

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 2);
        // The smoothed point sits between the two raw samples
        assert!(published[1].lat > 5.6037 && published[1].lat < 5.6046);
    }

    #[test(tokio::test)]
    async fn an_accuracy_improvement_publishes_without_movement() {
        let (sensor, tx) = ChannelSensor::new();
        let (tracker, published) = tracker_with(sensor);
        tracker.start().unwrap();

        tx.send(Ok(Coordinate::with_accuracy(5.6037, -0.1870, 50.0))).await.unwrap();
        tx.send(Ok(Coordinate::with_accuracy(5.6037, -0.1870, 12.0))).await.unwrap();
        drain().await;

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].accuracy, Some(12.0));
    }

    #[test(tokio::test)]
    async fn a_sensor_error_republishes_the_last_point_and_keeps_tracking() {
        let (sensor, tx) = ChannelSensor::new();
        let (tracker, published) = tracker_with(sensor);
        tracker.start().unwrap();

        tx.send(Ok(Coordinate::with_accuracy(5.6037, -0.1870, 20.0))).await.unwrap();
        tx.send(Err(SensorError::Timeout(Duration::from_secs(1)))).await.unwrap();
        drain().await;

        assert_eq!(published.lock().unwrap().len(), 2);
        assert!(tracker.is_active());
        // The republished point is the same coordinate
        let published = published.lock().unwrap();
        assert_eq!(published[0], published[1]);
    }

    #[test(tokio::test)]
    async fn no_publish_fires_after_stop_returns() {
        let (sensor, tx) = ChannelSensor::new();
        let (tracker, published) = tracker_with(sensor);
        tracker.start().unwrap();

        tx.send(Ok(Coordinate::with_accuracy(5.6037, -0.1870, 20.0))).await.unwrap();
        drain().await;
        tracker.stop();

        // Samples sent after stop must not reach subscribers
        let _ = tx.send(Ok(Coordinate::with_accuracy(6.0, -0.2, 20.0))).await;
        drain().await;

        assert_eq!(published.lock().unwrap().len(), 1);
        assert!(!tracker.is_active());
    }

    #[test(tokio::test)]
    async fn history_is_bounded_to_the_configured_size() {
        let (sensor, tx) = ChannelSensor::new();
        let (tracker, _) = tracker_with(sensor);
        tracker.start().unwrap();

        for i in 0..8 {
            tx.send(Ok(Coordinate::with_accuracy(5.6 + i as f64 * 0.01, -0.187, 20.0))).await.unwrap();
        }
        drain().await;

        assert_eq!(tracker.session.lock().unwrap().history.len(), 5);
    }

    #[test(tokio::test)]
    async fn start_is_idempotent_while_active() {
        let (sensor, _tx) = ChannelSensor::new();
        let (tracker, _) = tracker_with(sensor);

        tracker.start().unwrap();
        // The fake sensor only hands out its channel once, so a second watch
        // attempt would fail if start did not short-circuit
        tracker.start().unwrap();

        assert!(tracker.is_active());
    }

    #[test(tokio::test)]
    async fn subscribers_survive_a_stop_start_cycle() {
        let (sensor, _tx) = ChannelSensor::new();
        let (tracker, published) = tracker_with(sensor);

        tracker.start().unwrap();
        tracker.stop();

        // Restart fails on the single-use fake sensor, but the registry is intact
        assert!(tracker.start().is_err());
        assert_eq!(tracker.subscribers.lock().unwrap().len(), 1);
        assert_eq!(published.lock().unwrap().len(), 0);
    }

    #[test(tokio::test)]
    async fn unsubscribe_removes_the_callback() {
        let (sensor, tx) = ChannelSensor::new();
        let config = AppConfigBuilder::new().build();
        let tracker = Tracker::new(Arc::new(sensor), config.tracking(), Arc::new(Mutex::new(None)));

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        let handle = tracker.subscribe(move |coordinate| sink.lock().unwrap().push(coordinate));
        handle.unsubscribe();

        tracker.start().unwrap();
        tx.send(Ok(Coordinate::with_accuracy(5.6037, -0.1870, 20.0))).await.unwrap();
        drain().await;

        assert_eq!(published.lock().unwrap().len(), 0);
    }
}
