//! Shared solver pieces: the solution representation, the fitness model and
//! 2-opt local search.

use serde::{Deserialize, Serialize};

use crate::objective::{ScoreRoute, Strategy};
use crate::problem::RoutingProblem;

/// One candidate assignment: for every staff member (by index), the ordered
/// appointment indices of their tour.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Solution {
    pub routes: Vec<Vec<usize>>,
}

impl Solution {
    pub fn empty(staff_count: usize) -> Self {
        Self {
            routes: vec![Vec::new(); staff_count],
        }
    }

    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(Vec::len).sum()
    }

    /// True when every appointment in `0..appointment_count` appears exactly once.
    pub fn is_partition(&self, appointment_count: usize) -> bool {
        let mut seen = vec![false; appointment_count];
        for &appointment in self.routes.iter().flatten() {
            match seen.get_mut(appointment) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|s| s)
    }
}

/// Soft limits a route is penalised for exceeding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub max_stops_per_route: usize,
    /// Working-time budget per staff member (travel plus service).
    pub max_work_seconds: f64,
    /// Added per stop beyond `max_stops_per_route`.
    pub stop_overflow_penalty: f64,
    /// Multiplier on every second beyond `max_work_seconds`.
    pub overtime_penalty_factor: f64,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_stops_per_route: 8,
            max_work_seconds: 8.0 * 3600.0,
            stop_overflow_penalty: 3600.0,
            overtime_penalty_factor: 2.0,
        }
    }
}

impl Constraints {
    pub fn penalty(&self, stops: usize, total_seconds: f64) -> f64 {
        let mut penalty = 0.0;
        if stops > self.max_stops_per_route {
            penalty += (stops - self.max_stops_per_route) as f64 * self.stop_overflow_penalty;
        }
        if total_seconds > self.max_work_seconds {
            penalty += (total_seconds - self.max_work_seconds) * self.overtime_penalty_factor;
        }
        penalty
    }
}

/// Total cost of a solution under `strategy`. Lower is better.
pub fn fitness(
    problem: &RoutingProblem<'_>,
    solution: &Solution,
    strategy: &Strategy,
    constraints: &Constraints,
) -> f64 {
    let metrics: Vec<_> = solution
        .routes
        .iter()
        .enumerate()
        .map(|(staff, route)| problem.route_metrics(staff, route))
        .collect();

    let routes_cost: f64 = metrics
        .iter()
        .filter(|m| m.stops > 0)
        .map(|m| strategy.score(m) + constraints.penalty(m.stops, m.total_seconds))
        .sum();

    routes_cost + strategy.solution_penalty(&metrics)
}

/// First-improvement 2-opt over the closed tour of one staff member.
///
/// Reverses `route[i..j]` whenever that strictly shortens the tour distance and
/// rescans until a full pass finds nothing. Routes of three stops or fewer are
/// left alone. Returns whether the route changed.
pub fn two_opt(problem: &RoutingProblem<'_>, staff: usize, route: &mut [usize]) -> bool {
    let n = route.len();
    if n <= 3 {
        return false;
    }

    let mut best = problem.route_distance(staff, route);
    let mut changed = false;

    'scan: loop {
        for i in 0..n - 1 {
            for j in i + 2..=n {
                route[i..j].reverse();
                let candidate = problem.route_distance(staff, route);
                if candidate < best {
                    best = candidate;
                    changed = true;
                    continue 'scan;
                }
                route[i..j].reverse();
            }
        }
        break;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_detects_duplicates_and_omissions() {
        let ok = Solution {
            routes: vec![vec![0, 2], vec![1]],
        };
        assert!(ok.is_partition(3));

        let duplicate = Solution {
            routes: vec![vec![0, 1], vec![1, 2]],
        };
        assert!(!duplicate.is_partition(3));

        let missing = Solution {
            routes: vec![vec![0], vec![2]],
        };
        assert!(!missing.is_partition(3));

        let out_of_range = Solution {
            routes: vec![vec![0, 5]],
        };
        assert!(!out_of_range.is_partition(1));
    }

    #[test]
    fn penalties_for_stops_and_overtime() {
        let constraints = Constraints::default();
        assert_eq!(constraints.penalty(8, 8.0 * 3600.0), 0.0);
        assert_eq!(constraints.penalty(10, 0.0), 7200.0);
        assert_eq!(constraints.penalty(1, 8.0 * 3600.0 + 100.0), 200.0);
    }
}
