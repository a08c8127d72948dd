//! Index-based view of one optimization instance.
//!
//! Staff homes and appointment sites are flattened into a dense node table so
//! the solvers never touch string keys in their inner loops.

use serde::{Deserialize, Serialize};

use crate::haversine::HaversineEstimator;
use crate::matrix::DistanceMatrix;
use crate::model::{Appointment, Coordinates, LocationId, StaffMember};
use crate::objective::{CostModel, RouteMetrics};
use crate::route::{UnassignedAppointment, UnassignedReason};

/// Which staff members an appointment may be routed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ReassignmentPolicy {
    /// Only the pre-assigned staff member.
    #[default]
    Pinned,
    /// The pre-assigned staff member, plus anyone whose home lies within
    /// `max_km` of the site and whose own travel radius allows it.
    Nearby { max_km: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProblemOptions {
    pub use_traffic: bool,
    pub reassignment: ReassignmentPolicy,
    pub costs: CostModel,
    /// Home used for staff without one on record.
    pub default_home: Coordinates,
}

impl Default for ProblemOptions {
    fn default() -> Self {
        Self {
            use_traffic: false,
            reassignment: ReassignmentPolicy::Pinned,
            costs: CostModel::default(),
            default_home: Coordinates::new(53.5461, -113.4938),
        }
    }
}

/// Appointments, staff and travel costs for one run.
///
/// Appointment indices refer to the routable appointments only; anything that
/// could not be routed was reported by [`RoutingProblem::new`].
#[derive(Debug, Clone)]
pub struct RoutingProblem<'a> {
    appointments: Vec<&'a Appointment>,
    staff: &'a [StaffMember],
    compatible: Vec<Vec<usize>>,
    preferred: Vec<usize>,
    service: Vec<f64>,
    revenue: Vec<f64>,
    durations: Vec<f64>,
    distances: Vec<f64>,
    nodes: usize,
}

impl<'a> RoutingProblem<'a> {
    pub fn new(
        appointments: &'a [Appointment],
        staff: &'a [StaffMember],
        matrix: &DistanceMatrix,
        options: &ProblemOptions,
    ) -> (Self, Vec<UnassignedAppointment>) {
        let homes: Vec<Coordinates> = staff
            .iter()
            .map(|member| member.home.unwrap_or(options.default_home))
            .collect();

        let mut routable = Vec::new();
        let mut compatible = Vec::new();
        let mut preferred = Vec::new();
        let mut unassigned = Vec::new();

        for appointment in appointments {
            let assigned = staff.iter().position(|member| member.id == appointment.staff_id);
            let mut candidates: Vec<usize> = assigned.into_iter().collect();

            if let ReassignmentPolicy::Nearby { max_km } = options.reassignment {
                for (index, member) in staff.iter().enumerate() {
                    if Some(index) == assigned {
                        continue;
                    }
                    let km = HaversineEstimator::haversine_km(homes[index], appointment.location);
                    if km <= max_km && member.can_travel_to(km) {
                        candidates.push(index);
                    }
                }
            }

            if let Some(first) = candidates.first().copied() {
                preferred.push(assigned.unwrap_or(first));
                compatible.push(candidates);
                routable.push(appointment);
            } else {
                unassigned.push(UnassignedAppointment {
                    appointment_id: appointment.id.clone(),
                    reason: UnassignedReason::StaffUnavailable,
                });
            }
        }

        let node_ids: Vec<LocationId> = staff
            .iter()
            .map(StaffMember::home_location_id)
            .chain(routable.iter().map(|appointment| appointment.location_id()))
            .collect();
        let nodes = node_ids.len();
        let mut durations = vec![0.0; nodes * nodes];
        let mut distances = vec![0.0; nodes * nodes];
        for (i, from) in node_ids.iter().enumerate() {
            for (j, to) in node_ids.iter().enumerate() {
                if i != j {
                    let entry = matrix.entry(from, to);
                    durations[i * nodes + j] = if options.use_traffic {
                        entry.duration_in_traffic_seconds
                    } else {
                        entry.duration_seconds
                    };
                    distances[i * nodes + j] = entry.distance_meters;
                }
            }
        }

        let service = routable.iter().map(|appointment| appointment.service_seconds()).collect();
        let revenue = routable
            .iter()
            .map(|appointment| {
                let rate = appointment
                    .hourly_rate
                    .unwrap_or(options.costs.default_hourly_rate);
                appointment.duration_in_hours() * rate
            })
            .collect();

        let problem = Self {
            appointments: routable,
            staff,
            compatible,
            preferred,
            service,
            revenue,
            durations,
            distances,
            nodes,
        };
        (problem, unassigned)
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn staff_count(&self) -> usize {
        self.staff.len()
    }

    pub fn appointment(&self, index: usize) -> &'a Appointment {
        self.appointments[index]
    }

    pub fn staff_member(&self, index: usize) -> &'a StaffMember {
        &self.staff[index]
    }

    /// Staff indices the appointment may be routed to; the pre-assigned one first.
    pub fn compatible_staff(&self, appointment: usize) -> &[usize] {
        &self.compatible[appointment]
    }

    pub fn is_compatible(&self, appointment: usize, staff: usize) -> bool {
        self.compatible[appointment].contains(&staff)
    }

    /// The staff member the appointment is pre-assigned to.
    pub fn preferred_staff(&self, appointment: usize) -> usize {
        self.preferred[appointment]
    }

    pub fn service_seconds(&self, appointment: usize) -> f64 {
        self.service[appointment]
    }

    fn home_node(&self, staff: usize) -> usize {
        staff
    }

    fn site_node(&self, appointment: usize) -> usize {
        self.staff.len() + appointment
    }

    fn duration(&self, from: usize, to: usize) -> f64 {
        self.durations[from * self.nodes + to]
    }

    fn distance(&self, from: usize, to: usize) -> f64 {
        self.distances[from * self.nodes + to]
    }

    /// Node sequence of the closed tour: home, every stop, home.
    fn tour(&self, staff: usize, route: &[usize]) -> impl Iterator<Item = (usize, usize)> + '_ {
        let home = self.home_node(staff);
        let stops: Vec<usize> = route.iter().map(|&a| self.site_node(a)).collect();
        let mut nodes = Vec::with_capacity(stops.len() + 2);
        nodes.push(home);
        nodes.extend(stops);
        nodes.push(home);
        (0..nodes.len() - 1).map(move |k| (nodes[k], nodes[k + 1]))
    }

    /// Travel time from the staff member's home to an appointment.
    pub fn travel_from_home(&self, staff: usize, appointment: usize) -> f64 {
        self.duration(self.home_node(staff), self.site_node(appointment))
    }

    /// Travel time between two appointment sites.
    pub fn travel_between(&self, from: usize, to: usize) -> f64 {
        self.duration(self.site_node(from), self.site_node(to))
    }

    /// `(seconds, meters)` of each leg: home→first, between stops, last→home.
    pub fn legs(&self, staff: usize, route: &[usize]) -> Vec<(f64, f64)> {
        if route.is_empty() {
            return Vec::new();
        }
        self.tour(staff, route)
            .map(|(from, to)| (self.duration(from, to), self.distance(from, to)))
            .collect()
    }

    /// Closed-tour distance. An empty route costs nothing.
    pub fn route_distance(&self, staff: usize, route: &[usize]) -> f64 {
        if route.is_empty() {
            return 0.0;
        }
        self.tour(staff, route).map(|(from, to)| self.distance(from, to)).sum()
    }

    pub fn route_metrics(&self, staff: usize, route: &[usize]) -> RouteMetrics {
        if route.is_empty() {
            return RouteMetrics::default();
        }

        let (travel_seconds, distance_meters) = self
            .legs(staff, route)
            .into_iter()
            .fold((0.0, 0.0), |(t, d), (seconds, meters)| (t + seconds, d + meters));
        let service_seconds: f64 = route.iter().map(|&a| self.service[a]).sum();
        let revenue = route.iter().map(|&a| self.revenue[a]).sum();

        RouteMetrics {
            stops: route.len(),
            travel_seconds,
            service_seconds,
            total_seconds: travel_seconds + service_seconds,
            distance_meters,
            revenue,
        }
    }
}
