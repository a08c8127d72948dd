//! Orchestration of a single optimization run.
//!
//! The engine validates a request, applies the per account/date cache, creates
//! the job record and then either runs it inline or hands it to a
//! [`JobQueue`]. Queue workers come back through [`RouteOptimizationEngine::perform`].

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::construct::RouteConstructor;
use crate::error::{OptimizeError, QueueError, ValidationError};
use crate::genetic::{GeneticConfig, GeneticSolver};
use crate::job::{
    JobFailure, JobId, JobParameters, JobStatus, NewJob, OptimizationJob, OptimizationMetrics,
    OptimizationResult, Savings,
};
use crate::model::{AccountId, Appointment, Coordinates, Location, StaffId, StaffMember};
use crate::objective::{Algorithm, CostModel, Objective};
use crate::problem::{ProblemOptions, ReassignmentPolicy, RoutingProblem};
use crate::queue::Delivery;
use crate::route::{Route, UnassignedAppointment};
use crate::schedule::{default_day_start, plan_day};
use crate::traits::{DistanceProvider, JobQueue, Store};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub genetic: GeneticConfig,
    pub costs: CostModel,
    /// Plan with in-traffic durations when the provider supplies them.
    pub use_traffic: bool,
    pub reassignment: ReassignmentPolicy,
    /// Home used for staff without one on record.
    pub default_home: Coordinates,
    pub day_start: NaiveTime,
    /// Fixed seed for the genetic solver; entropy when unset.
    pub seed: Option<u64>,
    /// Naive travel estimate per appointment used as the savings baseline.
    pub baseline_seconds_per_appointment: f64,
    pub labor_cost_per_hour: f64,
    /// An in-flight job idle this long no longer blocks new requests.
    pub stale_job_after_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            genetic: GeneticConfig::default(),
            costs: CostModel::default(),
            use_traffic: false,
            reassignment: ReassignmentPolicy::Pinned,
            default_home: Coordinates::new(53.5461, -113.4938),
            day_start: default_day_start(),
            seed: None,
            baseline_seconds_per_appointment: 1800.0,
            labor_cost_per_hour: 25.0,
            stale_job_after_secs: 1800,
        }
    }
}

impl EngineConfig {
    pub fn problem_options(&self) -> ProblemOptions {
        ProblemOptions {
            use_traffic: self.use_traffic,
            reassignment: self.reassignment,
            costs: self.costs,
            default_home: self.default_home,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Block until the job is terminal.
    #[default]
    Sync,
    /// Return the pending job and let a queue worker run it.
    Async,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub objective: String,
    #[serde(default)]
    pub staff_ids: Vec<StaffId>,
    #[serde(default)]
    pub force_reoptimization: bool,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl OptimizationRequest {
    pub fn new(
        account_id: impl Into<AccountId>,
        date: NaiveDate,
        objective: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            date,
            objective: objective.into(),
            staff_ids: Vec::new(),
            force_reoptimization: false,
            mode: ExecutionMode::Sync,
            algorithm: None,
        }
    }

    pub fn with_staff(mut self, staff_ids: Vec<StaffId>) -> Self {
        self.staff_ids = staff_ids;
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_reoptimization = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.mode = ExecutionMode::Async;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResponse {
    pub job: OptimizationJob,
    pub routes: Vec<Route>,
    /// Present once the job completed.
    pub savings: Option<Savings>,
    pub unassigned: Vec<UnassignedAppointment>,
}

impl OptimizationResponse {
    fn for_job(job: OptimizationJob, routes: Vec<Route>) -> Self {
        let savings = job.savings().copied();
        let unassigned = job
            .result
            .as_ref()
            .map(|result| result.unassigned.clone())
            .unwrap_or_default();
        Self {
            job,
            routes,
            savings,
            unassigned,
        }
    }
}

/// Savings of the planned routes against the naive per-appointment estimate.
///
/// Baseline is `baseline_seconds_per_appointment` of travel for every routed
/// appointment plus its service time. Values are rounded to two decimals.
pub fn compute_savings(
    routes: &[Route],
    baseline_seconds_per_appointment: f64,
    labor_cost_per_hour: f64,
) -> Savings {
    let stops = routes.iter().map(|route| route.stops.len()).sum::<usize>();
    let service: f64 = routes
        .iter()
        .flat_map(|route| &route.stops)
        .map(|stop| stop.duration_at_stop().num_seconds() as f64)
        .sum();
    let baseline = stops as f64 * baseline_seconds_per_appointment + service;
    let optimized: f64 = routes.iter().map(|route| route.total_duration_seconds).sum();

    let hours_saved = (baseline - optimized).max(0.0) / 3600.0;
    let efficiency = if baseline > 0.0 {
        hours_saved / (baseline / 3600.0) * 100.0
    } else {
        0.0
    };

    Savings {
        time_saved_hours: round2(hours_saved),
        cost_savings: round2(hours_saved * labor_cost_per_hour),
        efficiency_improvement_percent: round2(efficiency),
        total_distance_km: round2(routes.iter().map(Route::total_distance_km).sum()),
        routes_created: routes.len(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct RouteOptimizationEngine<S, P> {
    store: S,
    provider: P,
    config: EngineConfig,
    queue: Option<Arc<dyn JobQueue>>,
}

impl<S: Store, P: DistanceProvider> RouteOptimizationEngine<S, P> {
    pub fn new(store: S, provider: P, config: EngineConfig) -> Result<Self, ValidationError> {
        config.genetic.validate()?;
        Ok(Self {
            store,
            provider,
            config,
            queue: None,
        })
    }

    /// Queue used for [`ExecutionMode::Async`] requests.
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn optimize(
        &self,
        request: &OptimizationRequest,
    ) -> Result<OptimizationResponse, OptimizeError> {
        let objective: Objective = request.objective.parse()?;
        let algorithm = match &request.algorithm {
            Some(name) => name.parse::<Algorithm>()?,
            None => objective.default_algorithm(),
        };

        if !self.store.account_exists(&request.account_id)? {
            return Err(OptimizeError::AccountNotFound(request.account_id.clone()));
        }

        if let Some(mut job) = self
            .store
            .latest_job(&request.account_id, request.date, &JobStatus::IN_FLIGHT)?
        {
            let now = Utc::now();
            if !job.is_stale(now, self.config.stale_job_after_secs) {
                info!(
                    job_id = %job.id,
                    account_id = %request.account_id,
                    date = %request.date,
                    "optimization already in flight"
                );
                return Ok(OptimizationResponse::for_job(job, Vec::new()));
            }

            let idle_secs = (now - job.updated_at).num_seconds();
            let reason = OptimizeError::Abandoned { job: job.id, idle_secs };
            warn!(
                job_id = %job.id,
                idle_secs,
                status = %job.status,
                "abandoning stale optimization job"
            );
            job.abandon(JobFailure::from(&reason), now)?;
            self.store.save_job(&job)?;
        }

        if !request.force_reoptimization {
            if let Some(job) = self
                .store
                .latest_job(&request.account_id, request.date, &[JobStatus::Completed])?
            {
                info!(
                    job_id = %job.id,
                    account_id = %request.account_id,
                    date = %request.date,
                    "returning cached optimization"
                );
                let routes = self.store.routes_for_job(job.id)?;
                return Ok(OptimizationResponse::for_job(job, routes));
            }
        }

        let queue = match request.mode {
            ExecutionMode::Async => Some(self.queue.as_ref().ok_or(QueueError::NotConfigured)?),
            ExecutionMode::Sync => None,
        };

        let job = self.store.create_job(NewJob {
            account_id: request.account_id.clone(),
            requested_date: request.date,
            parameters: JobParameters {
                objective,
                algorithm,
                staff_ids: request.staff_ids.clone(),
                force_reoptimization: request.force_reoptimization,
            },
            created_at: Utc::now(),
        })?;
        info!(
            job_id = %job.id,
            %objective,
            %algorithm,
            mode = ?request.mode,
            "created optimization job"
        );

        match queue {
            Some(queue) => {
                if let Err(err) = queue.enqueue(Delivery::first(job.id)) {
                    let err = OptimizeError::from(err);
                    if let Err(abandon_err) = self.abandon_job(job.id, &err) {
                        error!(
                            job_id = %job.id,
                            error = %abandon_err.describe(),
                            "could not fail unqueued job"
                        );
                    }
                    return Err(err);
                }
                Ok(OptimizationResponse::for_job(job, Vec::new()))
            }
            None => self.run(job, true),
        }
    }

    /// Worker entry point for a queued job.
    ///
    /// Returns `Ok(None)` when the job already reached a terminal state. With
    /// `final_attempt` unset a retryable error leaves the job processing so a
    /// later delivery can pick it up.
    pub fn perform(
        &self,
        job_id: JobId,
        final_attempt: bool,
    ) -> Result<Option<OptimizationResponse>, OptimizeError> {
        let job = self
            .store
            .find_job(job_id)?
            .ok_or(OptimizeError::JobNotFound(job_id))?;

        if job.is_terminal() {
            info!(%job_id, status = %job.status, "job already finished, skipping");
            return Ok(None);
        }

        self.run(job, final_attempt).map(Some)
    }

    /// Fails a job that will never be executed, such as one whose delivery
    /// could not be queued. Terminal jobs are left alone.
    pub fn abandon_job(&self, job_id: JobId, reason: &OptimizeError) -> Result<(), OptimizeError> {
        let mut job = self
            .store
            .find_job(job_id)?
            .ok_or(OptimizeError::JobNotFound(job_id))?;
        if job.is_terminal() {
            return Ok(());
        }

        error!(%job_id, status = %job.status, error = %reason.describe(), "optimization abandoned");
        job.abandon(JobFailure::from(reason), Utc::now())?;
        self.store.save_job(&job)?;
        Ok(())
    }

    fn run(
        &self,
        mut job: OptimizationJob,
        final_attempt: bool,
    ) -> Result<OptimizationResponse, OptimizeError> {
        job.start(Utc::now())?;
        let outcome = self
            .store
            .save_job(&job)
            .map_err(OptimizeError::from)
            .and_then(|()| {
                info!(job_id = %job.id, attempt = job.attempts, "optimization started");
                self.execute(&job)
            });

        let (result, routes) = match outcome {
            Ok(done) => done,
            Err(err) => {
                self.finish_with_error(&mut job, &err, final_attempt);
                return Err(err);
            }
        };

        let mut finished = job.clone();
        finished.complete(result, Utc::now())?;
        if let Err(err) = self.store.save_job(&finished) {
            let err = OptimizeError::from(err);
            self.finish_with_error(&mut job, &err, final_attempt);
            return Err(err);
        }
        info!(
            job_id = %finished.id,
            routes = finished.routes_created(),
            hours_saved = finished.time_savings(),
            "optimization completed"
        );
        Ok(OptimizationResponse::for_job(finished, routes))
    }

    /// Records a failed attempt on a best-effort basis: the job stays
    /// processing when a retry is coming, otherwise it fails.
    fn finish_with_error(
        &self,
        job: &mut OptimizationJob,
        err: &OptimizeError,
        final_attempt: bool,
    ) {
        let now = Utc::now();
        let transition = if err.is_retryable() && !final_attempt {
            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                error = %err.describe(),
                "optimization attempt failed, will retry"
            );
            job.record_retry(err.describe(), now)
        } else {
            error!(
                job_id = %job.id,
                attempt = job.attempts,
                error = %err.describe(),
                "optimization failed"
            );
            job.fail(JobFailure::from(err), now)
        };

        let saved = transition.and_then(|()| self.store.save_job(job).map_err(OptimizeError::from));
        if let Err(save_err) = saved {
            error!(job_id = %job.id, error = %save_err.describe(), "could not record job failure");
        }
    }

    fn execute(
        &self,
        job: &OptimizationJob,
    ) -> Result<(OptimizationResult, Vec<Route>), OptimizeError> {
        let params = &job.parameters;
        let date = job.requested_date;

        if !self.store.account_exists(&job.account_id)? {
            return Err(OptimizeError::AccountNotFound(job.account_id.clone()));
        }

        let appointments = self.load_appointments(job)?;
        let staff = self.load_staff(job, &appointments)?;

        let locations = self.locations(&appointments, &staff);
        let matrix = self.provider.distance_matrix(&locations)?;

        let (problem, mut unassigned) =
            RoutingProblem::new(&appointments, &staff, &matrix, &self.config.problem_options());
        if problem.appointment_count() == 0 {
            return Err(ValidationError::NoStaff { date }.into());
        }
        for skipped in &unassigned {
            warn!(
                job_id = %job.id,
                appointment_id = %skipped.appointment_id,
                reason = ?skipped.reason,
                "appointment left unassigned"
            );
        }

        let mut metrics = OptimizationMetrics {
            total_appointments: appointments.len(),
            staff_count: staff.len(),
            ..OptimizationMetrics::default()
        };

        let solution = match params.algorithm {
            Algorithm::NearestNeighbor => RouteConstructor.construct(&problem),
            Algorithm::Genetic => {
                let strategy = params.objective.strategy(self.config.costs);
                let solver = GeneticSolver::new(self.config.genetic, strategy)?;
                let outcome = match self.config.seed {
                    Some(seed) => solver.solve_seeded(&problem, seed),
                    None => solver.solve(&problem, &mut StdRng::from_entropy()),
                };
                info!(
                    job_id = %job.id,
                    generations = outcome.generations,
                    fitness = outcome.fitness,
                    stagnated = outcome.stagnated,
                    timed_out = outcome.timed_out,
                    "genetic search finished"
                );
                metrics.fitness = Some(outcome.fitness);
                metrics.generations = Some(outcome.generations);
                outcome.solution
            }
        };

        if !solution.is_partition(problem.appointment_count()) {
            return Err(OptimizeError::Computation(format!(
                "{} solver did not assign every appointment exactly once",
                params.algorithm
            )));
        }

        let plan = plan_day(&problem, &solution, date, self.config.day_start);
        for late in &plan.overflow {
            warn!(
                job_id = %job.id,
                appointment_id = %late.appointment_id,
                "appointment does not fit in the working day"
            );
        }
        unassigned.extend(plan.overflow);
        let routes = plan.routes;

        self.store.save_routes(job.id, &routes)?;
        for route in &routes {
            for stop in &route.stops {
                self.store.update_appointment_schedule(
                    &stop.appointment_id,
                    &route.staff_id,
                    stop.estimated_arrival,
                )?;
            }
        }

        let savings = compute_savings(
            &routes,
            self.config.baseline_seconds_per_appointment,
            self.config.labor_cost_per_hour,
        );
        if !routes.is_empty() {
            let count = routes.len() as f64;
            metrics.average_route_duration_seconds =
                routes.iter().map(|route| route.total_duration_seconds).sum::<f64>() / count;
            let routed: usize = routes.iter().map(|route| route.stops.len()).sum();
            metrics.appointments_per_route = routed as f64 / count;
        }

        let result = OptimizationResult {
            routes_created: routes.len(),
            savings,
            metrics,
            algorithm: params.algorithm,
            objective: params.objective,
            unassigned,
        };
        Ok((result, routes))
    }

    /// Optimizable appointments of the job's account and date, narrowed to the
    /// requested staff.
    fn load_appointments(&self, job: &OptimizationJob) -> Result<Vec<Appointment>, OptimizeError> {
        let staff_filter = &job.parameters.staff_ids;
        let appointments: Vec<Appointment> = self
            .store
            .appointments_for(&job.account_id, job.requested_date)?
            .into_iter()
            .filter(|a| a.status.is_optimizable())
            .filter(|a| staff_filter.is_empty() || staff_filter.contains(&a.staff_id))
            .collect();

        if appointments.is_empty() {
            return Err(ValidationError::NoAppointments {
                date: job.requested_date,
            }
            .into());
        }
        if let Some(bad) = appointments.iter().find(|a| a.duration_minutes == 0) {
            return Err(ValidationError::InvalidDuration(bad.id.clone()).into());
        }
        Ok(appointments)
    }

    fn load_staff(
        &self,
        job: &OptimizationJob,
        appointments: &[Appointment],
    ) -> Result<Vec<StaffMember>, OptimizeError> {
        let ids: Vec<StaffId> = if job.parameters.staff_ids.is_empty() {
            let mut ids: Vec<StaffId> = appointments.iter().map(|a| a.staff_id.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        } else {
            job.parameters.staff_ids.clone()
        };

        let staff = self.store.staff_members(&job.account_id, &ids)?;
        if staff.is_empty() {
            return Err(ValidationError::NoStaff {
                date: job.requested_date,
            }
            .into());
        }
        Ok(staff)
    }

    fn locations(&self, appointments: &[Appointment], staff: &[StaffMember]) -> Vec<Location> {
        appointments
            .iter()
            .map(|a| Location::new(a.location_id(), a.location))
            .chain(staff.iter().map(|member| {
                Location::new(
                    member.home_location_id(),
                    member.home.unwrap_or(self.config.default_home),
                )
            }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AppointmentId;
    use crate::route::RouteStop;

    fn stop(minutes: i64) -> RouteStop {
        let arrival = NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        RouteStop {
            appointment_id: AppointmentId::new("a"),
            stop_order: 0,
            estimated_arrival: arrival,
            estimated_departure: arrival + chrono::Duration::minutes(minutes),
            travel_seconds: 0.0,
            travel_meters: 0.0,
            actual_arrival: None,
            actual_departure: None,
        }
    }

    fn route(stops: Vec<RouteStop>, seconds: f64, meters: f64) -> Route {
        Route {
            staff_id: StaffId::new("s"),
            scheduled_date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            stops,
            total_distance_meters: meters,
            total_duration_seconds: seconds,
        }
    }

    #[test]
    fn savings_against_naive_baseline() {
        // baseline: 2 * 1800 + 2 * 3600 = 10800s; planned 9000s -> 0.5h saved
        let routes = vec![route(vec![stop(60), stop(60)], 9000.0, 12_340.0)];
        let savings = compute_savings(&routes, 1800.0, 25.0);

        assert_eq!(savings.time_saved_hours, 0.5);
        assert_eq!(savings.cost_savings, 12.5);
        assert_eq!(savings.efficiency_improvement_percent, 16.67);
        assert_eq!(savings.total_distance_km, 12.34);
        assert_eq!(savings.routes_created, 1);
    }

    #[test]
    fn slower_plans_never_report_negative_savings() {
        let routes = vec![route(vec![stop(30)], 99_999.0, 1000.0)];
        let savings = compute_savings(&routes, 1800.0, 25.0);
        assert_eq!(savings.time_saved_hours, 0.0);
        assert_eq!(savings.cost_savings, 0.0);
        assert_eq!(savings.efficiency_improvement_percent, 0.0);
    }

    #[test]
    fn no_routes_no_savings() {
        assert_eq!(compute_savings(&[], 1800.0, 25.0), Savings::default());
    }

    #[test]
    fn config_loads_from_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"seed": 7, "genetic": {"population_size": 20}}"#).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.genetic.population_size, 20);
        assert_eq!(config.genetic.max_generations, 1000);
        assert_eq!(config.baseline_seconds_per_appointment, 1800.0);
        assert_eq!(config.stale_job_after_secs, 1800);
    }
}
