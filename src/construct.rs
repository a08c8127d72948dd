//! Nearest-neighbour route construction.

use tracing::debug;

use crate::problem::RoutingProblem;
use crate::solver::Solution;

/// Builds each staff member's tour greedily from home: always travel next to
/// the closest unvisited appointment pre-assigned to them.
///
/// Deterministic for a fixed problem; ties go to the earlier appointment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteConstructor;

impl RouteConstructor {
    pub fn construct(&self, problem: &RoutingProblem<'_>) -> Solution {
        let mut solution = Solution::empty(problem.staff_count());

        for (staff, route) in solution.routes.iter_mut().enumerate() {
            let mut unvisited: Vec<usize> = (0..problem.appointment_count())
                .filter(|&appointment| problem.preferred_staff(appointment) == staff)
                .collect();

            let mut current: Option<usize> = None;
            while !unvisited.is_empty() {
                let mut best_position = 0;
                let mut best_travel = f64::INFINITY;

                for (position, &candidate) in unvisited.iter().enumerate() {
                    let travel = match current {
                        None => problem.travel_from_home(staff, candidate),
                        Some(from) => problem.travel_between(from, candidate),
                    };
                    if travel < best_travel {
                        best_travel = travel;
                        best_position = position;
                    }
                }

                let next = unvisited.remove(best_position);
                route.push(next);
                current = Some(next);
            }

            if !route.is_empty() {
                debug!(
                    staff = %problem.staff_member(staff).id,
                    stops = route.len(),
                    "constructed nearest-neighbour route"
                );
            }
        }

        solution
    }
}
