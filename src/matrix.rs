//! Directed travel distance/duration lookups between locations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::model::{Location, LocationId};

/// Travel time assumed for a pair the provider returned nothing for.
pub const DEFAULT_DURATION_SECONDS: f64 = 1800.0;
/// Travel distance assumed for a pair the provider returned nothing for.
pub const DEFAULT_DISTANCE_METERS: f64 = 10_000.0;
/// Finite stand-ins for a pair with no drivable route.
pub const UNREACHABLE_DISTANCE_METERS: f64 = 1_000_000.0;
pub const UNREACHABLE_DURATION_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrixEntry {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub duration_in_traffic_seconds: f64,
}

impl DistanceMatrixEntry {
    /// Builds an entry, clamping negatives to zero and traffic time to at
    /// least the free-flow time.
    pub fn new(
        distance_meters: f64,
        duration_seconds: f64,
        duration_in_traffic_seconds: f64,
    ) -> Self {
        let distance_meters = non_negative(distance_meters);
        let duration_seconds = non_negative(duration_seconds);
        let duration_in_traffic_seconds =
            non_negative(duration_in_traffic_seconds).max(duration_seconds);
        Self {
            distance_meters,
            duration_seconds,
            duration_in_traffic_seconds,
        }
    }

    pub fn without_traffic(distance_meters: f64, duration_seconds: f64) -> Self {
        Self::new(distance_meters, duration_seconds, duration_seconds)
    }

    pub fn unreachable() -> Self {
        Self::without_traffic(UNREACHABLE_DISTANCE_METERS, UNREACHABLE_DURATION_SECONDS)
    }

    pub fn fallback() -> Self {
        Self::without_traffic(DEFAULT_DISTANCE_METERS, DEFAULT_DURATION_SECONDS)
    }
}

// Infinite values saturate at the unreachable distance so sums stay finite.
fn non_negative(value: f64) -> f64 {
    if value.is_nan() || value <= 0.0 {
        0.0
    } else if value.is_infinite() {
        UNREACHABLE_DISTANCE_METERS
    } else {
        value
    }
}

/// Sparse directed matrix keyed by `(from, to)`.
///
/// Lookups never fail: a missing pair resolves to the fallback entry, and a
/// location to itself is free.
#[derive(Debug, Clone, Default)]
pub struct DistanceMatrix {
    entries: HashMap<(LocationId, LocationId), DistanceMatrixEntry>,
}

impl DistanceMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: LocationId, to: LocationId, entry: DistanceMatrixEntry) {
        if from != to {
            self.entries.insert((from, to), entry);
        }
    }

    pub fn merge(&mut self, other: DistanceMatrix) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, from: &LocationId, to: &LocationId) -> Option<&DistanceMatrixEntry> {
        self.entries.get(&(from.clone(), to.clone()))
    }

    pub fn entry(&self, from: &LocationId, to: &LocationId) -> DistanceMatrixEntry {
        if from == to {
            return DistanceMatrixEntry::without_traffic(0.0, 0.0);
        }
        self.get(from, to)
            .copied()
            .unwrap_or_else(DistanceMatrixEntry::fallback)
    }

    pub fn duration(&self, from: &LocationId, to: &LocationId, with_traffic: bool) -> f64 {
        let entry = self.entry(from, to);
        if with_traffic {
            entry.duration_in_traffic_seconds
        } else {
            entry.duration_seconds
        }
    }

    pub fn distance(&self, from: &LocationId, to: &LocationId) -> f64 {
        self.entry(from, to).distance_meters
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(LocationId, LocationId), &DistanceMatrixEntry)> {
        self.entries.iter()
    }
}

impl FromIterator<((LocationId, LocationId), DistanceMatrixEntry)> for DistanceMatrix {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = ((LocationId, LocationId), DistanceMatrixEntry)>,
    {
        let mut matrix = DistanceMatrix::new();
        for ((from, to), entry) in iter {
            matrix.insert(from, to, entry);
        }
        matrix
    }
}

/// Splits `locations` into `chunk_size` blocks and requests every
/// origin-block × destination-block pair, merging the answers.
///
/// `fetch` returns `None` for a block the provider had no data for.
pub fn fetch_chunked<F>(
    locations: &[Location],
    chunk_size: usize,
    mut fetch: F,
) -> Result<DistanceMatrix, ProviderError>
where
    F: FnMut(&[Location], &[Location]) -> Result<Option<DistanceMatrix>, ProviderError>,
{
    let mut matrix = DistanceMatrix::new();
    if locations.len() < 2 {
        return Ok(matrix);
    }

    let chunk_size = chunk_size.max(1);
    for origins in locations.chunks(chunk_size) {
        for destinations in locations.chunks(chunk_size) {
            if let Some(block) = fetch(origins, destinations)? {
                matrix.merge(block);
            }
        }
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinates;

    fn id(value: &str) -> LocationId {
        LocationId::new(value)
    }

    #[test]
    fn missing_pairs_fall_back_to_defaults() {
        let matrix = DistanceMatrix::new();
        assert_eq!(matrix.duration(&id("a"), &id("b"), false), DEFAULT_DURATION_SECONDS);
        assert_eq!(matrix.distance(&id("a"), &id("b")), DEFAULT_DISTANCE_METERS);
        assert_eq!(matrix.duration(&id("a"), &id("a"), false), 0.0);
    }

    #[test]
    fn entries_are_clamped() {
        let entry = DistanceMatrixEntry::new(-5.0, 120.0, 60.0);
        assert_eq!(entry.distance_meters, 0.0);
        assert_eq!(entry.duration_in_traffic_seconds, 120.0);

        let entry = DistanceMatrixEntry::new(f64::NAN, f64::INFINITY, 0.0);
        assert_eq!(entry.distance_meters, 0.0);
        assert!(entry.duration_seconds.is_finite());
    }

    #[test]
    fn self_pairs_are_not_stored() {
        let mut matrix = DistanceMatrix::new();
        matrix.insert(id("a"), id("a"), DistanceMatrixEntry::without_traffic(5.0, 5.0));
        assert!(matrix.is_empty());
    }

    #[test]
    fn traffic_duration_is_selectable() {
        let mut matrix = DistanceMatrix::new();
        matrix.insert(id("a"), id("b"), DistanceMatrixEntry::new(1000.0, 100.0, 150.0));
        assert_eq!(matrix.duration(&id("a"), &id("b"), false), 100.0);
        assert_eq!(matrix.duration(&id("a"), &id("b"), true), 150.0);
    }

    #[test]
    fn chunked_fetch_covers_every_block() {
        let locations: Vec<Location> = (0..5)
            .map(|i| {
                let coordinates = Coordinates::new(53.5, -113.5 + i as f64 * 0.01);
                Location::new(id(&format!("l{i}")), coordinates)
            })
            .collect();

        let mut calls = 0;
        let matrix = fetch_chunked(&locations, 2, |origins, destinations| {
            calls += 1;
            let mut block = DistanceMatrix::new();
            for from in origins {
                for to in destinations {
                    let entry = DistanceMatrixEntry::without_traffic(1.0, 1.0);
                    block.insert(from.id.clone(), to.id.clone(), entry);
                }
            }
            Ok(Some(block))
        })
        .expect("fetch should succeed");

        // 3 origin chunks x 3 destination chunks
        assert_eq!(calls, 9);
        assert_eq!(matrix.len(), 5 * 4);
    }

    #[test]
    fn chunked_fetch_propagates_errors() {
        let locations: Vec<Location> = (0..3)
            .map(|i| Location::new(id(&format!("l{i}")), Coordinates::new(0.0, i as f64)))
            .collect();
        let result = fetch_chunked(&locations, 20, |_, _| Err(ProviderError::QuotaExceeded));
        assert_eq!(result.unwrap_err(), ProviderError::QuotaExceeded);
    }
}
