//! route-optimizer
//!
//! Plans daily routes for mobile staff: a nearest-neighbour constructor, a
//! genetic VRP solver with 2-opt local search, and an engine that wraps them
//! in cached, retryable optimization jobs.

pub mod cache;
pub mod construct;
pub mod engine;
pub mod error;
pub mod genetic;
pub mod haversine;
pub mod job;
pub mod maps;
pub mod matrix;
pub mod memory;
pub mod model;
pub mod objective;
pub mod problem;
pub mod queue;
pub mod route;
pub mod schedule;
pub mod solver;
pub mod traits;

pub use engine::{
    EngineConfig, ExecutionMode, OptimizationRequest, OptimizationResponse, RouteOptimizationEngine,
};
pub use error::{ErrorKind, OptimizeError, ProviderError, ValidationError};
pub use job::{JobId, JobStatus, OptimizationJob, Savings};
pub use traits::{DistanceProvider, JobQueue, Store};
