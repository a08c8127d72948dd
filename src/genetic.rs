//! Genetic metaheuristic over per-staff tours.
//!
//! A population of [`Solution`]s evolves through tournament selection,
//! per-route order crossover, four mutation moves (swap, relocate, reverse,
//! 2-opt) and elitism. Each generation is a fresh owned population; the only
//! source of randomness is the generator passed to [`GeneticSolver::solve`].

use std::time::{Duration, Instant};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::seq::index;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::construct::RouteConstructor;
use crate::error::ValidationError;
use crate::objective::Strategy;
use crate::problem::RoutingProblem;
use crate::solver::{Constraints, Solution, fitness, two_opt};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub max_generations: usize,
    /// Generations without a new best before giving up.
    pub stagnation_limit: usize,
    pub crossover_rate: f64,
    /// Probability that an offspring is mutated.
    pub mutation_rate: f64,
    /// Share of the population copied unchanged into the next generation.
    pub elite_ratio: f64,
    pub tournament_size: usize,
    /// Share of the initial population seeded from nearest-neighbour construction.
    pub seed_ratio: f64,
    pub constraints: Constraints,
    /// Score population members on the rayon pool.
    pub parallel: bool,
    /// Wall-clock budget, checked between generations; `None` runs until
    /// `max_generations` or stagnation.
    pub time_limit_ms: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            max_generations: 1000,
            stagnation_limit: 100,
            crossover_rate: 0.8,
            mutation_rate: 0.15,
            elite_ratio: 0.2,
            tournament_size: 3,
            seed_ratio: 0.2,
            constraints: Constraints::default(),
            parallel: false,
            time_limit_ms: Some(30_000),
        }
    }
}

impl GeneticConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |message: &str| Err(ValidationError::InvalidConfig(message.to_string()));

        if self.population_size < 2 {
            return invalid("population_size must be at least 2");
        }
        if self.tournament_size == 0 {
            return invalid("tournament_size must be positive");
        }
        for (name, value) in [
            ("crossover_rate", self.crossover_rate),
            ("mutation_rate", self.mutation_rate),
            ("elite_ratio", self.elite_ratio),
            ("seed_ratio", self.seed_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::InvalidConfig(format!(
                    "{name} must be within [0, 1]"
                )));
            }
        }
        if self.elite_ratio >= 1.0 {
            return invalid("elite_ratio must leave room for offspring");
        }
        if self.time_limit_ms == Some(0) {
            return invalid("time_limit_ms must be positive or unset");
        }
        Ok(())
    }

    fn elite_count(&self) -> usize {
        (self.population_size as f64 * self.elite_ratio) as usize
    }

    fn seed_count(&self) -> usize {
        ((self.population_size as f64 * self.seed_ratio) as usize).clamp(1, self.population_size)
    }

    fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

/// Result of a genetic run.
#[derive(Debug, Clone)]
pub struct GeneticOutcome {
    pub solution: Solution,
    pub fitness: f64,
    pub generations: usize,
    /// Stopped because the best fitness stopped improving.
    pub stagnated: bool,
    /// Stopped because the time limit ran out.
    pub timed_out: bool,
    /// Best-ever fitness after each generation.
    pub fitness_history: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct GeneticSolver {
    config: GeneticConfig,
    strategy: Strategy,
}

impl GeneticSolver {
    pub fn new(config: GeneticConfig, strategy: Strategy) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &GeneticConfig {
        &self.config
    }

    pub fn fitness(&self, problem: &RoutingProblem<'_>, solution: &Solution) -> f64 {
        fitness(problem, solution, &self.strategy, &self.config.constraints)
    }

    pub fn solve_seeded(&self, problem: &RoutingProblem<'_>, seed: u64) -> GeneticOutcome {
        self.solve(problem, &mut StdRng::seed_from_u64(seed))
    }

    pub fn solve<R: Rng + ?Sized>(
        &self,
        problem: &RoutingProblem<'_>,
        rng: &mut R,
    ) -> GeneticOutcome {
        if problem.appointment_count() == 0 || problem.staff_count() == 0 {
            let solution = Solution::empty(problem.staff_count());
            return GeneticOutcome {
                fitness: self.fitness(problem, &solution),
                solution,
                generations: 0,
                stagnated: false,
                timed_out: false,
                fitness_history: Vec::new(),
            };
        }

        let started = Instant::now();
        let mut population = self.initial_population(problem, rng);
        let mut best = population[0].clone();
        let mut best_fitness = f64::INFINITY;
        let mut stagnation = 0;
        let mut stagnated = false;
        let mut timed_out = false;
        let mut history = Vec::new();

        for generation in 0..self.config.max_generations {
            if generation > 0
                && self.config.time_limit().is_some_and(|limit| started.elapsed() >= limit)
            {
                timed_out = true;
                info!(generation, best_fitness, "genetic search hit its time limit");
                break;
            }

            let scores = self.evaluate(problem, &population);

            let (leader, leader_fitness) = scores
                .iter()
                .copied()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, f64::INFINITY));

            if leader_fitness < best_fitness {
                best_fitness = leader_fitness;
                best = population[leader].clone();
                stagnation = 0;
            } else {
                stagnation += 1;
            }
            history.push(best_fitness);

            if stagnation >= self.config.stagnation_limit {
                stagnated = true;
                debug!(generation, best_fitness, "genetic search stagnated");
                break;
            }

            if generation % 100 == 0 {
                info!(generation, best_fitness, "genetic search progress");
            }

            population = self.evolve(problem, &population, &scores, rng);
        }

        GeneticOutcome {
            solution: best,
            fitness: best_fitness,
            generations: history.len(),
            stagnated,
            timed_out,
            fitness_history: history,
        }
    }

    fn evaluate(&self, problem: &RoutingProblem<'_>, population: &[Solution]) -> Vec<f64> {
        if self.config.parallel {
            population
                .par_iter()
                .map(|solution| self.fitness(problem, solution))
                .collect()
        } else {
            population
                .iter()
                .map(|solution| self.fitness(problem, solution))
                .collect()
        }
    }

    fn initial_population<R: Rng + ?Sized>(
        &self,
        problem: &RoutingProblem<'_>,
        rng: &mut R,
    ) -> Vec<Solution> {
        let greedy = RouteConstructor.construct(problem);
        let seeds = self.config.seed_count();

        let mut population = Vec::with_capacity(self.config.population_size);
        population.push(greedy.clone());
        for _ in 1..seeds {
            let mut variant = greedy.clone();
            mutate(problem, &mut variant, rng);
            population.push(variant);
        }
        while population.len() < self.config.population_size {
            population.push(random_solution(problem, rng));
        }
        population
    }

    fn evolve<R: Rng + ?Sized>(
        &self,
        problem: &RoutingProblem<'_>,
        population: &[Solution],
        scores: &[f64],
        rng: &mut R,
    ) -> Vec<Solution> {
        let size = self.config.population_size;
        let mut ranked: Vec<usize> = (0..population.len()).collect();
        ranked.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

        let mut next: Vec<Solution> = ranked
            .iter()
            .take(self.config.elite_count())
            .map(|&i| population[i].clone())
            .collect();

        while next.len() < size {
            let first = &population[tournament(scores, self.config.tournament_size, rng)];
            let second = &population[tournament(scores, self.config.tournament_size, rng)];

            let (mut child_a, mut child_b) = if rng.gen_bool(self.config.crossover_rate) {
                crossover(problem, first, second, rng)
            } else {
                (first.clone(), second.clone())
            };

            if rng.gen_bool(self.config.mutation_rate) {
                mutate(problem, &mut child_a, rng);
            }
            if rng.gen_bool(self.config.mutation_rate) {
                mutate(problem, &mut child_b, rng);
            }

            next.push(child_a);
            if next.len() < size {
                next.push(child_b);
            }
        }

        next
    }
}

/// Each appointment goes to a random compatible staff member; every route is shuffled.
pub fn random_solution<R: Rng + ?Sized>(problem: &RoutingProblem<'_>, rng: &mut R) -> Solution {
    let mut solution = Solution::empty(problem.staff_count());
    for appointment in 0..problem.appointment_count() {
        let staff = problem
            .compatible_staff(appointment)
            .choose(rng)
            .copied()
            .unwrap_or_else(|| problem.preferred_staff(appointment));
        solution.routes[staff].push(appointment);
    }
    for route in &mut solution.routes {
        route.shuffle(rng);
    }
    solution
}

/// Index of the fittest of `size` distinct, uniformly drawn individuals.
pub fn tournament<R: Rng + ?Sized>(scores: &[f64], size: usize, rng: &mut R) -> usize {
    index::sample(rng, scores.len(), size.min(scores.len()))
        .into_iter()
        .min_by(|&a, &b| scores[a].total_cmp(&scores[b]))
        .unwrap_or(0)
}

/// Per-staff order crossover producing two children.
///
/// For each staff member with a non-empty route in both parents a segment
/// between two cut points is taken from the other parent and placed at the
/// first cut. Appointments in a swapped-in segment are dropped from wherever
/// else they sit in the child, so each child remains a partition.
pub fn crossover<R: Rng + ?Sized>(
    problem: &RoutingProblem<'_>,
    first: &Solution,
    second: &Solution,
    rng: &mut R,
) -> (Solution, Solution) {
    let staff_count = first.routes.len();
    let mut into_first: Vec<Option<(usize, Vec<usize>)>> = vec![None; staff_count];
    let mut into_second: Vec<Option<(usize, Vec<usize>)>> = vec![None; staff_count];

    for staff in 0..staff_count {
        let (a, b) = (&first.routes[staff], &second.routes[staff]);
        let len = a.len().min(b.len());
        if len == 0 {
            continue;
        }
        let mut start = rng.gen_range(0..len);
        let mut end = rng.gen_range(0..len);
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        into_first[staff] = Some((start, b[start..=end].to_vec()));
        into_second[staff] = Some((start, a[start..=end].to_vec()));
    }

    (
        splice_segments(problem.appointment_count(), first, &into_first),
        splice_segments(problem.appointment_count(), second, &into_second),
    )
}

fn splice_segments(
    appointment_count: usize,
    base: &Solution,
    segments: &[Option<(usize, Vec<usize>)>],
) -> Solution {
    let mut swapped_in = vec![false; appointment_count];
    for (_, segment) in segments.iter().flatten() {
        for &appointment in segment {
            swapped_in[appointment] = true;
        }
    }

    let routes = base
        .routes
        .iter()
        .zip(segments)
        .map(|(route, segment)| {
            let mut kept: Vec<usize> = route.iter().copied().filter(|&a| !swapped_in[a]).collect();
            if let Some((start, segment)) = segment {
                let at = (*start).min(kept.len());
                kept.splice(at..at, segment.iter().copied());
            }
            kept
        })
        .collect();

    Solution { routes }
}

/// Applies one of four equally likely moves in place.
pub fn mutate<R: Rng + ?Sized>(problem: &RoutingProblem<'_>, solution: &mut Solution, rng: &mut R) {
    match rng.gen_range(0..4) {
        0 => swap_within_route(solution, rng),
        1 => relocate_between_routes(problem, solution, rng),
        2 => reverse_segment(solution, rng),
        _ => {
            if let Some(staff) = pick_route(solution, 4, rng) {
                two_opt(problem, staff, &mut solution.routes[staff]);
            }
        }
    }
}

fn pick_route<R: Rng + ?Sized>(solution: &Solution, min_len: usize, rng: &mut R) -> Option<usize> {
    let candidates: Vec<usize> = (0..solution.routes.len())
        .filter(|&staff| solution.routes[staff].len() >= min_len)
        .collect();
    candidates.choose(rng).copied()
}

fn swap_within_route<R: Rng + ?Sized>(solution: &mut Solution, rng: &mut R) {
    let Some(staff) = pick_route(solution, 2, rng) else {
        return;
    };
    let route = &mut solution.routes[staff];
    let picks = index::sample(rng, route.len(), 2);
    route.swap(picks.index(0), picks.index(1));
}

fn relocate_between_routes<R: Rng + ?Sized>(
    problem: &RoutingProblem<'_>,
    solution: &mut Solution,
    rng: &mut R,
) {
    let Some(from) = pick_route(solution, 1, rng) else {
        return;
    };
    let position = rng.gen_range(0..solution.routes[from].len());
    let appointment = solution.routes[from][position];

    let targets: Vec<usize> = problem
        .compatible_staff(appointment)
        .iter()
        .copied()
        .filter(|&staff| staff != from)
        .collect();
    let Some(&to) = targets.choose(rng) else {
        return;
    };

    solution.routes[from].remove(position);
    let at = rng.gen_range(0..=solution.routes[to].len());
    solution.routes[to].insert(at, appointment);
}

fn reverse_segment<R: Rng + ?Sized>(solution: &mut Solution, rng: &mut R) {
    let Some(staff) = pick_route(solution, 3, rng) else {
        return;
    };
    let route = &mut solution.routes[staff];
    let start = rng.gen_range(0..route.len() - 1);
    let end = rng.gen_range(start..route.len());
    route[start..=end].reverse();
}
