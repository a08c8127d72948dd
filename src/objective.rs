//! Optimization objectives and the route scoring strategies behind them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What the caller asks the optimizer to minimize (or maximize).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MinimizeTravelTime,
    MinimizeDistance,
    MinimizeTotalCost,
    BalanceWorkload,
    MaximizeRevenue,
}

impl Objective {
    pub const ALL: [Objective; 5] = [
        Objective::MinimizeTravelTime,
        Objective::MinimizeDistance,
        Objective::MinimizeTotalCost,
        Objective::BalanceWorkload,
        Objective::MaximizeRevenue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Objective::MinimizeTravelTime => "minimize_travel_time",
            Objective::MinimizeDistance => "minimize_distance",
            Objective::MinimizeTotalCost => "minimize_total_cost",
            Objective::BalanceWorkload => "balance_workload",
            Objective::MaximizeRevenue => "maximize_revenue",
        }
    }

    /// Scoring strategy the genetic solver uses for this objective.
    pub fn strategy(self, costs: CostModel) -> Strategy {
        match self {
            Objective::MinimizeTravelTime => Strategy::TravelTime(TravelTimeScore),
            Objective::MinimizeDistance => Strategy::Distance(DistanceScore),
            Objective::MinimizeTotalCost => Strategy::TotalCost(TotalCostScore(costs)),
            Objective::BalanceWorkload => Strategy::Balance(BalanceScore),
            Objective::MaximizeRevenue => Strategy::Revenue(RevenueScore(costs)),
        }
    }

    /// Algorithm used when the caller does not pick one.
    pub fn default_algorithm(self) -> Algorithm {
        match self {
            Objective::MinimizeTravelTime => Algorithm::NearestNeighbor,
            _ => Algorithm::Genetic,
        }
    }
}

impl FromStr for Objective {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Objective::ALL
            .into_iter()
            .find(|objective| objective.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownObjective(value.to_string()))
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    NearestNeighbor,
    Genetic,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::NearestNeighbor => "nearest_neighbor",
            Algorithm::Genetic => "genetic",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "nearest_neighbor" => Ok(Algorithm::NearestNeighbor),
            "genetic" => Ok(Algorithm::Genetic),
            other => Err(ValidationError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Money model for the cost and revenue objectives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub fuel_cost_per_km: f64,
    /// Staff cost per working hour.
    pub hourly_wage: f64,
    /// Billable rate for appointments that carry none.
    pub default_hourly_rate: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            fuel_cost_per_km: 0.15,
            hourly_wage: 25.0,
            default_hourly_rate: 55.0,
        }
    }
}

impl CostModel {
    pub fn operating_cost(&self, metrics: &RouteMetrics) -> f64 {
        metrics.distance_meters / 1000.0 * self.fuel_cost_per_km
            + metrics.total_seconds / 3600.0 * self.hourly_wage
    }
}

/// Aggregates for one staff member's closed tour (home → stops → home).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouteMetrics {
    pub stops: usize,
    pub travel_seconds: f64,
    pub service_seconds: f64,
    /// Travel plus service.
    pub total_seconds: f64,
    pub distance_meters: f64,
    pub revenue: f64,
}

/// Cost contribution of a single route. Lower is better.
pub trait ScoreRoute {
    fn score(&self, route: &RouteMetrics) -> f64;

    /// Term computed over every staff member's route at once.
    fn solution_penalty(&self, _routes: &[RouteMetrics]) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TravelTimeScore;

impl ScoreRoute for TravelTimeScore {
    fn score(&self, route: &RouteMetrics) -> f64 {
        route.total_seconds
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DistanceScore;

impl ScoreRoute for DistanceScore {
    fn score(&self, route: &RouteMetrics) -> f64 {
        route.distance_meters
    }
}

/// Population standard deviation of per-staff working time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceScore;

impl ScoreRoute for BalanceScore {
    fn score(&self, _route: &RouteMetrics) -> f64 {
        0.0
    }

    fn solution_penalty(&self, routes: &[RouteMetrics]) -> f64 {
        if routes.is_empty() {
            return 0.0;
        }
        let n = routes.len() as f64;
        let mean = routes.iter().map(|r| r.total_seconds).sum::<f64>() / n;
        let variance = routes.iter().map(|r| (r.total_seconds - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TotalCostScore(pub CostModel);

impl ScoreRoute for TotalCostScore {
    fn score(&self, route: &RouteMetrics) -> f64 {
        self.0.operating_cost(route)
    }
}

/// Operating cost minus billable revenue, so more profitable routes score lower.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RevenueScore(pub CostModel);

impl ScoreRoute for RevenueScore {
    fn score(&self, route: &RouteMetrics) -> f64 {
        self.0.operating_cost(route) - route.revenue
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    TravelTime(TravelTimeScore),
    Distance(DistanceScore),
    Balance(BalanceScore),
    TotalCost(TotalCostScore),
    Revenue(RevenueScore),
}

impl ScoreRoute for Strategy {
    fn score(&self, route: &RouteMetrics) -> f64 {
        match self {
            Strategy::TravelTime(s) => s.score(route),
            Strategy::Distance(s) => s.score(route),
            Strategy::Balance(s) => s.score(route),
            Strategy::TotalCost(s) => s.score(route),
            Strategy::Revenue(s) => s.score(route),
        }
    }

    fn solution_penalty(&self, routes: &[RouteMetrics]) -> f64 {
        match self {
            Strategy::TravelTime(s) => s.solution_penalty(routes),
            Strategy::Distance(s) => s.solution_penalty(routes),
            Strategy::Balance(s) => s.solution_penalty(routes),
            Strategy::TotalCost(s) => s.solution_penalty(routes),
            Strategy::Revenue(s) => s.solution_penalty(routes),
        }
    }
}
