//! Haversine distance provider (offline fallback when no live provider is configured).
//!
//! Uses great-circle distance to estimate travel time.
//! Less accurate than a road network (ignores roads) but always available and
//! fully deterministic.

use crate::error::ProviderError;
use crate::matrix::{DistanceMatrix, DistanceMatrixEntry};
use crate::model::{Coordinates, Location};
use crate::traits::DistanceProvider;

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// District centroids answered by the offline geocoder.
const KNOWN_DISTRICTS: &[(&str, Coordinates)] = &[
    ("downtown", Coordinates::new(53.5461, -113.4938)),
    ("west", Coordinates::new(53.5232, -113.5263)),
    ("north", Coordinates::new(53.5731, -113.4903)),
    ("south", Coordinates::new(53.4668, -113.5114)),
    ("east", Coordinates::new(53.5586, -113.4086)),
];

/// Haversine-based distance matrix provider.
///
/// Estimates travel time using straight-line distance and an assumed speed.
#[derive(Debug, Clone)]
pub struct HaversineEstimator {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
    /// Multiplier applied to produce the in-traffic duration (>= 1.0).
    pub traffic_factor: f64,
}

impl Default for HaversineEstimator {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
            traffic_factor: 1.0,
        }
    }
}

impl HaversineEstimator {
    pub fn new(speed_kmh: f64) -> Self {
        Self {
            speed_kmh,
            ..Self::default()
        }
    }

    pub fn with_traffic_factor(mut self, factor: f64) -> Self {
        self.traffic_factor = factor.max(1.0);
        self
    }

    /// Calculate haversine distance between two points in kilometers.
    pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
        let lat1_rad = from.lat.to_radians();
        let lat2_rad = to.lat.to_radians();
        let delta_lat = (to.lat - from.lat).to_radians();
        let delta_lng = (to.lng - from.lng).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }

    /// Convert distance in km to travel time in seconds.
    fn km_to_seconds(&self, km: f64) -> f64 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round()
    }

    pub fn entry_between(&self, from: Coordinates, to: Coordinates) -> DistanceMatrixEntry {
        let km = Self::haversine_km(from, to);
        let seconds = self.km_to_seconds(km);
        let in_traffic = (seconds * self.traffic_factor).round();
        DistanceMatrixEntry::new((km * 1000.0).round(), seconds, in_traffic)
    }
}

impl DistanceProvider for HaversineEstimator {
    fn distance_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix, ProviderError> {
        let mut matrix = DistanceMatrix::new();

        for from in locations {
            for to in locations {
                if from.id != to.id {
                    matrix.insert(
                        from.id.clone(),
                        to.id.clone(),
                        self.entry_between(from.coordinates, to.coordinates),
                    );
                }
            }
        }

        Ok(matrix)
    }

    fn geocode(&self, address: &str) -> Result<Option<Coordinates>, ProviderError> {
        let address = address.to_lowercase();
        Ok(KNOWN_DISTRICTS
            .iter()
            .find(|(keyword, _)| address.contains(keyword))
            .map(|(_, coordinates)| *coordinates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocationId;

    fn location(id: &str, lat: f64, lng: f64) -> Location {
        Location::new(LocationId::new(id), Coordinates::new(lat, lng))
    }

    #[test]
    fn test_haversine_same_point() {
        let point = Coordinates::new(53.5461, -113.4938);
        let dist = HaversineEstimator::haversine_km(point, point);
        assert!(dist < 0.001, "Same point should have ~0 distance");
    }

    #[test]
    fn test_haversine_known_distance() {
        // Edmonton (53.55, -113.49) to Calgary (51.05, -114.07)
        // Actual distance ~280 km
        let dist = HaversineEstimator::haversine_km(
            Coordinates::new(53.5461, -113.4938),
            Coordinates::new(51.0447, -114.0719),
        );
        assert!(dist > 260.0 && dist < 300.0, "Edmonton to Calgary should be ~280km, got {}", dist);
    }

    #[test]
    fn test_matrix_omits_self_pairs() {
        let provider = HaversineEstimator::default();
        let locations = vec![
            location("a", 53.54, -113.49),
            location("b", 53.52, -113.52),
            location("c", 53.46, -113.51),
        ];
        let matrix = provider.distance_matrix(&locations).unwrap();

        assert_eq!(matrix.len(), 6);
        assert!(matrix.get(&LocationId::new("a"), &LocationId::new("a")).is_none());
    }

    #[test]
    fn test_matrix_symmetric() {
        let provider = HaversineEstimator::default();
        let locations = vec![location("a", 53.54, -113.49), location("b", 53.52, -113.52)];
        let matrix = provider.distance_matrix(&locations).unwrap();

        let ab = matrix.entry(&LocationId::new("a"), &LocationId::new("b"));
        let ba = matrix.entry(&LocationId::new("b"), &LocationId::new("a"));
        assert_eq!(ab, ba, "Matrix should be symmetric");
        assert!(ab.distance_meters > 0.0);
    }

    #[test]
    fn test_reasonable_travel_time() {
        let provider = HaversineEstimator::new(40.0); // 40 km/h
        // 10 km at 40 km/h = 0.25 hours = 900 seconds
        assert_eq!(provider.km_to_seconds(10.0), 900.0);
    }

    #[test]
    fn test_traffic_never_faster_than_free_flow() {
        let provider = HaversineEstimator::default().with_traffic_factor(1.5);
        let entry = provider.entry_between(
            Coordinates::new(53.54, -113.49),
            Coordinates::new(53.46, -113.51),
        );
        assert!(entry.duration_in_traffic_seconds >= entry.duration_seconds);
        let expected = (entry.duration_seconds * 1.5).round();
        assert!((entry.duration_in_traffic_seconds - expected).abs() < 1.0);
    }

    #[test]
    fn test_offline_geocoder() {
        let provider = HaversineEstimator::default();
        let found = provider.geocode("123 Jasper Ave, Downtown").unwrap();
        assert_eq!(found, Some(Coordinates::new(53.5461, -113.4938)));
        assert_eq!(provider.geocode("somewhere else").unwrap(), None);
    }
}
