//! Plain data consumed by the optimizer.
//!
//! These mirror the business entities owned by the external store. The
//! optimizer never creates or destroys them; it only reads them and, as a side
//! effect of producing routes, rewrites an appointment's staff assignment and
//! scheduled time.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Business (tenant) identifier. Every appointment and staff member belongs to one.
    AccountId
);
string_id!(AppointmentId);
string_id!(StaffId);
string_id!(
    /// Key used in the distance matrix.
    LocationId
);

impl LocationId {
    /// Location key of an appointment site.
    pub fn appointment(id: &AppointmentId) -> Self {
        Self(id.0.clone())
    }

    /// Location key of a staff member's home base.
    pub fn staff_home(id: &StaffId) -> Self {
        Self(format!("staff_home_{}", id.0))
    }
}

/// Latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A point the distance provider knows how to route between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub coordinates: Coordinates,
}

impl Location {
    pub fn new(id: LocationId, coordinates: Coordinates) -> Self {
        Self { id, coordinates }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Only appointments that have not started yet are re-routed.
    pub fn is_optimizable(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

/// A service visit at a customer site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub account_id: AccountId,
    /// Current assignment. The optimizer may rewrite it.
    pub staff_id: StaffId,
    pub location: Coordinates,
    pub scheduled_at: NaiveDateTime,
    /// Fixed on-site service time, always > 0.
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    /// Billable rate used by the revenue and cost objectives.
    pub hourly_rate: Option<f64>,
}

impl Appointment {
    pub fn scheduled_date(&self) -> NaiveDate {
        self.scheduled_at.date()
    }

    pub fn service_seconds(&self) -> f64 {
        f64::from(self.duration_minutes) * 60.0
    }

    pub fn location_id(&self) -> LocationId {
        LocationId::appointment(&self.id)
    }

    pub fn duration_in_hours(&self) -> f64 {
        f64::from(self.duration_minutes) / 60.0
    }
}

/// A mobile worker who starts and ends the day at home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: StaffId,
    pub account_id: AccountId,
    pub name: String,
    pub home: Option<Coordinates>,
    pub max_travel_radius_km: Option<f64>,
    /// Consumed by the business-rule layer, not by the optimizer.
    pub background_check_passed: bool,
}

impl StaffMember {
    pub fn home_location_id(&self) -> LocationId {
        LocationId::staff_home(&self.id)
    }

    pub fn can_travel_to(&self, distance_km: f64) -> bool {
        match self.max_travel_radius_km {
            Some(radius) => distance_km <= radius,
            None => true,
        }
    }
}
