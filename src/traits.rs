//! Collaborator boundaries of the optimizer.
//!
//! The optimizer owns no storage, network or queueing concerns. Concrete
//! applications implement these traits for their own infrastructure; the crate
//! ships in-memory and offline implementations for tests and local use.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{ProviderError, QueueError, StoreError};
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob};
use crate::matrix::DistanceMatrix;
use crate::model::{
    AccountId, Appointment, AppointmentId, Coordinates, Location, StaffId, StaffMember,
};
use crate::queue::Delivery;
use crate::route::Route;

/// Provides travel distances/durations for a set of locations.
pub trait DistanceProvider: Send + Sync {
    /// Pairwise directed entries for `locations`, self pairs omitted.
    ///
    /// Pairs the provider has no data for may be absent; the matrix resolves
    /// them to defaults on lookup.
    fn distance_matrix(&self, locations: &[Location]) -> Result<DistanceMatrix, ProviderError>;

    /// Resolves a free-form address. `Ok(None)` means the provider found nothing.
    fn geocode(&self, address: &str) -> Result<Option<Coordinates>, ProviderError>;
}

/// Persistence boundary for business entities, jobs and routes.
pub trait Store: Send + Sync {
    fn account_exists(&self, account_id: &AccountId) -> Result<bool, StoreError>;

    /// Every appointment of the account scheduled on `date`, in any status.
    fn appointments_for(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError>;

    fn staff_members(
        &self,
        account_id: &AccountId,
        ids: &[StaffId],
    ) -> Result<Vec<StaffMember>, StoreError>;

    /// Records the optimizer's assignment and arrival time for an appointment.
    fn update_appointment_schedule(
        &self,
        id: &AppointmentId,
        staff_id: &StaffId,
        scheduled_at: NaiveDateTime,
    ) -> Result<(), StoreError>;

    fn create_job(&self, job: NewJob) -> Result<OptimizationJob, StoreError>;

    fn find_job(&self, id: JobId) -> Result<Option<OptimizationJob>, StoreError>;

    fn save_job(&self, job: &OptimizationJob) -> Result<(), StoreError>;

    /// Most recently created job for the key whose status is in `statuses`.
    fn latest_job(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
        statuses: &[JobStatus],
    ) -> Result<Option<OptimizationJob>, StoreError>;

    fn save_routes(&self, job_id: JobId, routes: &[Route]) -> Result<(), StoreError>;

    fn routes_for_job(&self, job_id: JobId) -> Result<Vec<Route>, StoreError>;
}

/// Work queue feeding background optimization.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, delivery: Delivery) -> Result<(), QueueError>;
}
