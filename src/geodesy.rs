use crate::domain::Coordinate;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Accuracy assumed for samples that did not report one.
const DEFAULT_ACCURACY_METERS: f64 = 100.0;

/// Great-circle distance between two coordinates using the Haversine formula.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (delta_lng / 2.0).sin().powi(2);

    // Rounding can push h marginally past 1 for near-antipodal points,
    // which would turn asin into NaN
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Combines position samples into one coordinate, giving more weight to more
/// precise samples (weight = best accuracy in the set / sample accuracy).
///
/// A single sample is returned unchanged. The combined accuracy is the best
/// accuracy observed; the remaining optional fields are copied from the most
/// accurate sample. Equal accuracies degenerate to a plain mean.
pub fn weighted_average(samples: &[Coordinate]) -> Option<Coordinate> {
    match samples {
        [] => None,
        [single] => Some(single.clone()),
        _ => {
            let accuracy_of = |sample: &Coordinate| sample.accuracy.unwrap_or(DEFAULT_ACCURACY_METERS);

            let best = samples
                .iter()
                .min_by(|a, b| accuracy_of(a).total_cmp(&accuracy_of(b)))
                .cloned()?;
            let best_accuracy = accuracy_of(&best);

            let mut total_weight = 0.0;
            let mut lat = 0.0;
            let mut lng = 0.0;
            for sample in samples {
                let weight = best_accuracy / accuracy_of(sample);
                lat += sample.lat * weight;
                lng += sample.lng * weight;
                total_weight += weight;
            }

            Some(Coordinate {
                lat: lat / total_weight,
                lng: lng / total_weight,
                accuracy: Some(best_accuracy),
                ..best
            })
        }
    }
}
