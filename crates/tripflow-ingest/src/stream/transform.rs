//! Per-row derived columns

use serde::Serialize;

use super::schema::TripRecord;

/// A trip with its derived columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedTrip {
    pub trip: TripRecord,
    /// Dropoff minus pickup in minutes, whole-second resolution
    pub trip_length_minutes: Option<f64>,
    /// Abbreviated weekday of the pickup, e.g. `Mon`
    pub day_of_week: Option<String>,
}

/// Derive `trip_length_minutes` and `day_of_week`. Null inputs give null outputs.
pub fn transform(trip: TripRecord) -> TransformedTrip {
    let trip_length_minutes = match (trip.pickup_datetime, trip.dropoff_datetime) {
        (Some(pickup), Some(dropoff)) => Some(
            (dropoff.and_utc().timestamp() - pickup.and_utc().timestamp()) as f64 / 60.0,
        ),
        _ => None,
    };

    let day_of_week = trip
        .pickup_datetime
        .map(|pickup| pickup.format("%a").to_string());

    TransformedTrip {
        trip,
        trip_length_minutes,
        day_of_week,
    }
}
