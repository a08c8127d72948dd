//! Real Edmonton locations for realistic test fixtures.
//!
//! Coordinates sourced from OpenStreetMap.

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

// ============================================================================
// Staff home bases
// ============================================================================

pub const HOMES: &[Location] = &[
    Location::new("Oliver", 53.5430, -113.5150),
    Location::new("Strathcona", 53.5180, -113.4960),
    Location::new("Glenora", 53.5410, -113.5530),
    Location::new("Bonnie Doon", 53.5270, -113.4620),
];

// ============================================================================
// Client sites
// ============================================================================

pub const CLIENT_SITES: &[Location] = &[
    Location::new("Churchill Square", 53.5444, -113.4909),
    Location::new("Legislature Grounds", 53.5337, -113.5064),
    Location::new("Whyte Avenue", 53.5184, -113.4950),
    Location::new("University Hospital", 53.5204, -113.5262),
    Location::new("West Edmonton Mall", 53.5225, -113.6242),
    Location::new("Kingsway Mall", 53.5640, -113.5050),
    Location::new("Southgate Centre", 53.4851, -113.5135),
    Location::new("Mill Woods Town Centre", 53.4555, -113.4297),
    Location::new("Capilano Mall", 53.5377, -113.4230),
    Location::new("Northgate Centre", 53.6053, -113.4731),
    Location::new("Royal Alberta Museum", 53.5463, -113.4970),
    Location::new("Muttart Conservatory", 53.5356, -113.4774),
];
