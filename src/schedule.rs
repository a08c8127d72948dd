//! Turns solver output into timed [`Route`]s.

use chrono::{Duration, NaiveDate, NaiveTime};

use crate::problem::RoutingProblem;
use crate::route::{Route, RouteStop, UnassignedAppointment, UnassignedReason};
use crate::solver::Solution;

/// Default start of the working day.
pub fn default_day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Timed route for one staff member's tour.
///
/// The clock starts at `day_start` on `date` at the staff member's home and
/// advances by each inbound leg and then the service time of the stop. Totals
/// cover the whole closed tour including the drive back home.
pub fn materialize(
    problem: &RoutingProblem<'_>,
    staff: usize,
    route: &[usize],
    date: NaiveDate,
    day_start: NaiveTime,
) -> Route {
    let legs = problem.legs(staff, route);
    let mut clock = date.and_time(day_start);
    let mut stops = Vec::with_capacity(route.len());

    let timed = route.iter().zip(&legs).enumerate();
    for (order, (&appointment, &(travel_seconds, travel_meters))) in timed {
        let arrival = clock + whole_seconds(travel_seconds);
        let departure = arrival + whole_seconds(problem.service_seconds(appointment));
        stops.push(RouteStop {
            appointment_id: problem.appointment(appointment).id.clone(),
            stop_order: order,
            estimated_arrival: arrival,
            estimated_departure: departure,
            travel_seconds,
            travel_meters,
            actual_arrival: None,
            actual_departure: None,
        });
        clock = departure;
    }

    let travel: f64 = legs.iter().map(|(seconds, _)| seconds).sum();
    let service: f64 = route.iter().map(|&a| problem.service_seconds(a)).sum();

    Route {
        staff_id: problem.staff_member(staff).id.clone(),
        scheduled_date: date,
        stops,
        total_distance_meters: legs.iter().map(|(_, meters)| meters).sum(),
        total_duration_seconds: travel + service,
    }
}

/// Splits a tour at the first stop whose arrival would land on the next date.
///
/// Returns `(kept, overflow)`; a stop that starts before midnight stays even if
/// it runs past it.
pub fn fit_to_day(
    problem: &RoutingProblem<'_>,
    staff: usize,
    route: &[usize],
    date: NaiveDate,
    day_start: NaiveTime,
) -> (Vec<usize>, Vec<usize>) {
    let Some(day_end) = date.succ_opt().map(|next| next.and_time(NaiveTime::MIN)) else {
        return (route.to_vec(), Vec::new());
    };

    let legs = problem.legs(staff, route);
    let mut clock = date.and_time(day_start);
    for (position, (&appointment, &(travel_seconds, _))) in route.iter().zip(&legs).enumerate() {
        let arrival = clock + whole_seconds(travel_seconds);
        if arrival >= day_end {
            return (route[..position].to_vec(), route[position..].to_vec());
        }
        clock = arrival + whole_seconds(problem.service_seconds(appointment));
    }
    (route.to_vec(), Vec::new())
}

/// Routes for one date plus the stops that did not fit in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayPlan {
    /// One per staff member with at least one stop, in staff order.
    pub routes: Vec<Route>,
    pub overflow: Vec<UnassignedAppointment>,
}

pub fn plan_day(
    problem: &RoutingProblem<'_>,
    solution: &Solution,
    date: NaiveDate,
    day_start: NaiveTime,
) -> DayPlan {
    let mut plan = DayPlan::default();
    for (staff, route) in solution.routes.iter().enumerate() {
        let (kept, overflow) = fit_to_day(problem, staff, route, date, day_start);
        plan.overflow.extend(overflow.into_iter().map(|appointment| UnassignedAppointment {
            appointment_id: problem.appointment(appointment).id.clone(),
            reason: UnassignedReason::ExceedsWorkingDay,
        }));
        if !kept.is_empty() {
            plan.routes.push(materialize(problem, staff, &kept, date, day_start));
        }
    }
    plan
}

fn whole_seconds(seconds: f64) -> Duration {
    Duration::seconds(seconds.round() as i64)
}
