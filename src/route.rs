//! Materialised routes: what a staff member does, in order, on one day.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::model::{AppointmentId, StaffId};

/// Arrivals within this many minutes of the estimate count as on time.
const ON_TIME_TOLERANCE_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub appointment_id: AppointmentId,
    /// Zero-based, unique within the route.
    pub stop_order: usize,
    pub estimated_arrival: NaiveDateTime,
    pub estimated_departure: NaiveDateTime,
    /// Inbound leg.
    pub travel_seconds: f64,
    pub travel_meters: f64,
    /// Field updates, used only for delay reporting.
    pub actual_arrival: Option<NaiveDateTime>,
    pub actual_departure: Option<NaiveDateTime>,
}

impl RouteStop {
    pub fn duration_at_stop(&self) -> Duration {
        self.estimated_departure - self.estimated_arrival
    }

    /// `None` until the stop has an actual arrival.
    pub fn on_time(&self) -> Option<bool> {
        let actual = self.actual_arrival?;
        Some((actual - self.estimated_arrival).num_seconds().abs() < ON_TIME_TOLERANCE_MINUTES * 60)
    }

    pub fn is_delayed(&self) -> bool {
        match self.actual_arrival {
            Some(actual) => {
                actual > self.estimated_arrival + Duration::minutes(ON_TIME_TOLERANCE_MINUTES)
            }
            None => false,
        }
    }

    pub fn delay_minutes(&self) -> i64 {
        match self.actual_arrival {
            Some(actual) => {
                let seconds = (actual - self.estimated_arrival).num_seconds().max(0);
                (seconds as f64 / 60.0).round() as i64
            }
            None => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub staff_id: StaffId,
    pub scheduled_date: NaiveDate,
    pub stops: Vec<RouteStop>,
    /// Includes the legs from and back to the staff member's home.
    pub total_distance_meters: f64,
    /// Travel plus service time, home to home.
    pub total_duration_seconds: f64,
}

impl Route {
    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_meters / 1000.0
    }

    pub fn total_duration_hours(&self) -> f64 {
        self.total_duration_seconds / 3600.0
    }

    pub fn estimated_fuel_cost(&self, cost_per_km: f64) -> f64 {
        self.total_distance_km() * cost_per_km
    }

    pub fn appointment_ids(&self) -> impl Iterator<Item = &AppointmentId> {
        self.stops.iter().map(|stop| &stop.appointment_id)
    }

    pub fn delayed_stops(&self) -> impl Iterator<Item = &RouteStop> {
        self.stops.iter().filter(|stop| stop.is_delayed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    /// The assigned staff member is not part of this run and nobody else may take it.
    StaffUnavailable,
    /// Planned arrival falls after midnight of the scheduled date.
    ExceedsWorkingDay,
}

/// An input appointment that no output route contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedAppointment {
    pub appointment_id: AppointmentId,
    pub reason: UnassignedReason,
}
