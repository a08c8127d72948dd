//! Live mapping-API adapter for distance matrices and geocoding.
//!
//! Speaks the Google Maps Distance Matrix / Geocoding JSON format. Credentials
//! and endpoints come from [`MapsConfig`]; nothing is read from the environment.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::ProviderError;
use crate::matrix::{DistanceMatrix, DistanceMatrixEntry, fetch_chunked};
use crate::model::{Coordinates, Location};
use crate::traits::DistanceProvider;

const GEOCODE_PATH: &str = "/maps/api/geocode/json";
const DISTANCE_MATRIX_PATH: &str = "/maps/api/distancematrix/json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Origins (and destinations) per request; the API caps a request at 25.
    pub chunk_size: usize,
    /// Attempts for a request failing at the transport level.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Ask for `duration_in_traffic` using a "now" departure time.
    pub with_traffic: bool,
    /// How long a fetched matrix block is reused; 0 disables the cache.
    pub matrix_cache_ttl_secs: u64,
    /// How long a geocoded address is reused; 0 disables the cache.
    pub geocode_cache_ttl_secs: u64,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://maps.googleapis.com".to_string(),
            timeout_secs: 10,
            chunk_size: 20,
            max_retries: 3,
            retry_backoff_ms: 500,
            with_traffic: true,
            matrix_cache_ttl_secs: 4 * 60 * 60,
            geocode_cache_ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Block responses keyed by the joined origins and destinations parameters.
type BlockCache = TtlCache<(String, String), MatrixResponse>;

/// Clones share one cache.
#[derive(Debug, Clone)]
pub struct MapsClient {
    config: MapsConfig,
    client: reqwest::blocking::Client,
    blocks: Arc<BlockCache>,
    geocodes: Arc<TtlCache<String, Option<Coordinates>>>,
}

impl MapsClient {
    pub fn new(config: MapsConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(
                "a maps API key is required".to_string(),
            ));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let blocks = Arc::new(TtlCache::new(Duration::from_secs(config.matrix_cache_ttl_secs)));
        let geocodes = Arc::new(TtlCache::new(Duration::from_secs(config.geocode_cache_ttl_secs)));
        Ok(Self {
            config,
            client,
            blocks,
            geocodes,
        })
    }

    pub fn config(&self) -> &MapsConfig {
        &self.config
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let response = self
                .client
                .get(&url)
                .query(params)
                .query(&[("key", self.config.api_key.as_str())])
                .send()
                .and_then(|resp| resp.error_for_status())
                .and_then(|resp| resp.text());

            match response {
                Ok(body) => return decode_body(&body),
                Err(err) => {
                    let err = ProviderError::from(err);
                    let transient = matches!(err, ProviderError::Transport { .. });
                    if !transient || attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay_ms(self.config.retry_backoff_ms, attempt);
                    warn!(
                        path,
                        attempt,
                        delay_ms = delay,
                        error = %err,
                        "maps request failed, retrying"
                    );
                    thread::sleep(Duration::from_millis(delay));
                }
            }
        }
    }

    fn fetch_block(
        &self,
        origins: &[Location],
        destinations: &[Location],
    ) -> Result<Option<DistanceMatrix>, ProviderError> {
        let key = (join_coordinates(origins), join_coordinates(destinations));
        if let Some(response) = self.blocks.get(&key) {
            debug!(
                origins = origins.len(),
                destinations = destinations.len(),
                "matrix block cache hit"
            );
            return parse_matrix(response, origins, destinations);
        }

        let mut params = vec![
            ("origins", key.0.clone()),
            ("destinations", key.1.clone()),
            ("mode", "driving".to_string()),
            ("units", "metric".to_string()),
        ];
        if self.config.with_traffic {
            params.push(("departure_time", "now".to_string()));
            params.push(("traffic_model", "best_guess".to_string()));
        }

        debug!(
            origins = origins.len(),
            destinations = destinations.len(),
            "requesting distance matrix block"
        );
        let response: MatrixResponse = self.get_json(DISTANCE_MATRIX_PATH, &params)?;
        let matrix = parse_matrix(response.clone(), origins, destinations)?;
        self.blocks.insert(key, response);
        Ok(matrix)
    }
}

impl DistanceProvider for MapsClient {
    fn distance_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix, ProviderError> {
        fetch_chunked(locations, self.config.chunk_size, |origins, destinations| {
            self.fetch_block(origins, destinations)
        })
    }

    fn geocode(&self, address: &str) -> Result<Option<Coordinates>, ProviderError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }
        self.geocodes.get_or_try_insert_with(address.to_string(), || {
            let params = [("address", address.to_string())];
            let response: GeocodeResponse = self.get_json(GEOCODE_PATH, &params)?;
            parse_geocode(response)
        })
    }
}

fn join_coordinates(locations: &[Location]) -> String {
    locations
        .iter()
        .map(|loc| format!("{:.6},{:.6}", loc.coordinates.lat, loc.coordinates.lng))
        .collect::<Vec<_>>()
        .join("|")
}

/// Deserializes a response body; an unexpected shape is not worth retrying.
/// Doubling delay before retry `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    Ok(serde_json::from_str(body)?)
}

/// Maps a top-level API status onto data / no-data / error.
pub fn classify_status(status: &str, message: Option<&str>) -> Result<bool, ProviderError> {
    let message = message.unwrap_or_default().to_string();
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" => Ok(false),
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => Err(ProviderError::QuotaExceeded),
        "REQUEST_DENIED" => Err(ProviderError::RequestDenied(message)),
        "INVALID_REQUEST" => Err(ProviderError::InvalidRequest(message)),
        other => Err(ProviderError::UnknownStatus {
            status: other.to_string(),
            message,
        }),
    }
}

/// Converts one block response into matrix entries.
///
/// Elements without a route become unreachable entries rather than errors.
pub fn parse_matrix(
    response: MatrixResponse,
    origins: &[Location],
    destinations: &[Location],
) -> Result<Option<DistanceMatrix>, ProviderError> {
    if !classify_status(&response.status, response.error_message.as_deref())? {
        return Ok(None);
    }

    let mut matrix = DistanceMatrix::new();
    for (row, origin) in response.rows.iter().zip(origins) {
        for (element, destination) in row.elements.iter().zip(destinations) {
            if origin.id == destination.id {
                continue;
            }

            let entry = match (element.status.as_str(), &element.distance, &element.duration) {
                ("OK", Some(distance), Some(duration)) => {
                    let traffic = element
                        .duration_in_traffic
                        .as_ref()
                        .map_or(duration.value, |value| value.value);
                    DistanceMatrixEntry::new(distance.value, duration.value, traffic)
                }
                _ => DistanceMatrixEntry::unreachable(),
            };
            matrix.insert(origin.id.clone(), destination.id.clone(), entry);
        }
    }

    Ok(Some(matrix))
}

pub fn parse_geocode(response: GeocodeResponse) -> Result<Option<Coordinates>, ProviderError> {
    if !classify_status(&response.status, response.error_message.as_deref())? {
        return Ok(None);
    }
    Ok(response.results.first().map(|result| {
        let location = result.geometry.location;
        Coordinates::new(location.lat, location.lng)
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixResponse {
    pub status: String,
    pub error_message: Option<String>,
    #[serde(default)]
    pub rows: Vec<MatrixRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixRow {
    pub elements: Vec<MatrixElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixElement {
    pub status: String,
    pub distance: Option<ValueField>,
    pub duration: Option<ValueField>,
    pub duration_in_traffic: Option<ValueField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueField {
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeResponse {
    pub status: String,
    pub error_message: Option<String>,
    #[serde(default)]
    pub results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeResult {
    pub formatted_address: Option<String>,
    pub geometry: Geometry,
}

#[derive(Debug, Deserialize)]
pub struct Geometry {
    pub location: Coordinates,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{UNREACHABLE_DISTANCE_METERS, UNREACHABLE_DURATION_SECONDS};
    use crate::model::LocationId;

    fn locations() -> Vec<Location> {
        vec![
            Location::new(LocationId::new("home"), Coordinates::new(53.546, -113.494)),
            Location::new(LocationId::new("apt"), Coordinates::new(53.523, -113.526)),
        ]
    }

    #[test]
    fn parses_ok_matrix_and_skips_self_pairs() {
        let json = r#"{
            "status": "OK",
            "rows": [
                {"elements": [
                    {"status": "OK", "distance": {"value": 0}, "duration": {"value": 0}},
                    {"status": "OK", "distance": {"value": 3200}, "duration": {"value": 420},
                     "duration_in_traffic": {"value": 510}}
                ]},
                {"elements": [
                    {"status": "OK", "distance": {"value": 3300}, "duration": {"value": 400}},
                    {"status": "OK", "distance": {"value": 0}, "duration": {"value": 0}}
                ]}
            ]
        }"#;
        let response: MatrixResponse = serde_json::from_str(json).expect("should deserialise");
        let locs = locations();
        let matrix = parse_matrix(response, &locs, &locs).unwrap().expect("data");

        assert_eq!(matrix.len(), 2);
        let entry = matrix.entry(&LocationId::new("home"), &LocationId::new("apt"));
        assert_eq!(entry.distance_meters, 3200.0);
        assert_eq!(entry.duration_in_traffic_seconds, 510.0);
        let back = matrix.entry(&LocationId::new("apt"), &LocationId::new("home"));
        assert_eq!(back.duration_in_traffic_seconds, 400.0);
    }

    #[test]
    fn unroutable_elements_are_large_but_finite() {
        let json = r#"{
            "status": "OK",
            "rows": [
                {"elements": [{"status": "OK"}, {"status": "ZERO_RESULTS"}]},
                {"elements": [{"status": "NOT_FOUND"}, {"status": "OK"}]}
            ]
        }"#;
        let response: MatrixResponse = serde_json::from_str(json).unwrap();
        let locs = locations();
        let matrix = parse_matrix(response, &locs, &locs).unwrap().unwrap();

        let entry = matrix.entry(&LocationId::new("home"), &LocationId::new("apt"));
        assert_eq!(entry.distance_meters, UNREACHABLE_DISTANCE_METERS);
        assert_eq!(entry.duration_seconds, UNREACHABLE_DURATION_SECONDS);
    }

    #[test]
    fn zero_results_is_no_data() {
        let response: MatrixResponse =
            serde_json::from_str(r#"{"status": "ZERO_RESULTS"}"#).unwrap();
        let locs = locations();
        assert!(parse_matrix(response, &locs, &locs).unwrap().is_none());
    }

    #[test]
    fn provider_statuses_are_classified() {
        assert_eq!(
            classify_status("OVER_DAILY_LIMIT", None),
            Err(ProviderError::QuotaExceeded)
        );
        assert_eq!(
            classify_status("REQUEST_DENIED", Some("key invalid")),
            Err(ProviderError::RequestDenied("key invalid".into()))
        );
        assert_eq!(
            classify_status("INVALID_REQUEST", Some("missing origins")),
            Err(ProviderError::InvalidRequest("missing origins".into()))
        );
        assert!(matches!(
            classify_status("UNKNOWN_ERROR", None),
            Err(ProviderError::UnknownStatus { .. })
        ));
    }

    #[test]
    fn parses_geocode_result() {
        let json = r#"{
            "status": "OK",
            "results": [{
                "formatted_address": "10230 Jasper Ave NW, Edmonton, AB",
                "geometry": {"location": {"lat": 53.5417, "lng": -113.4947}}
            }]
        }"#;
        let response: GeocodeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parse_geocode(response).unwrap(),
            Some(Coordinates::new(53.5417, -113.4947))
        );
    }

    #[test]
    fn client_requires_api_key() {
        let err = MapsClient::new(MapsConfig::default()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn config_loads_from_partial_json() {
        let config: MapsConfig =
            serde_json::from_str(r#"{"api_key": "k", "chunk_size": 10}"#).unwrap();
        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.matrix_cache_ttl_secs, 14_400);
        assert_eq!(config.geocode_cache_ttl_secs, 2_592_000);
        assert!(MapsClient::new(config).is_ok());
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let err = decode_body::<MatrixResponse>("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
        assert!(!err.is_retryable());
    }

    /// Client pointed at a closed local port: any real request fails.
    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay_ms(500, 1), 500);
        assert_eq!(backoff_delay_ms(500, 3), 2_000);
        assert_eq!(backoff_delay_ms(500, 80), u64::MAX);
        assert_eq!(backoff_delay_ms(0, 80), 0);
    }

    fn offline_client() -> MapsClient {
        MapsClient::new(MapsConfig {
            api_key: "k".into(),
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
            max_retries: 1,
            ..MapsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn cached_matrix_block_is_reused() {
        let client = offline_client();
        let locs = locations();
        let response: MatrixResponse = serde_json::from_str(
            r#"{
                "status": "OK",
                "rows": [
                    {"elements": [{"status": "OK"}, {"status": "OK",
                        "distance": {"value": 3200}, "duration": {"value": 420}}]},
                    {"elements": [{"status": "OK",
                        "distance": {"value": 3300}, "duration": {"value": 400}}, {"status": "OK"}]}
                ]
            }"#,
        )
        .unwrap();
        client
            .blocks
            .insert((join_coordinates(&locs), join_coordinates(&locs)), response);

        let matrix = client.distance_matrix(&locs).unwrap();
        let entry = matrix.entry(&LocationId::new("home"), &LocationId::new("apt"));
        assert_eq!(entry.distance_meters, 3200.0);

        // clones share the cache
        assert!(client.clone().distance_matrix(&locs).is_ok());
    }

    #[test]
    fn cached_geocode_is_reused_and_failures_are_not() {
        let client = offline_client();
        let downtown = Coordinates::new(53.5417, -113.4947);
        client
            .geocodes
            .insert("10230 Jasper Ave NW".to_string(), Some(downtown));

        assert_eq!(client.geocode("  10230 Jasper Ave NW ").unwrap(), Some(downtown));
        assert!(client.geocode("1 Unknown Rd").is_err());
        assert_eq!(client.geocodes.len(), 1);
    }
}
