//! Test fixtures for route-optimizer.
//!
//! Provides realistic test data including:
//! - Real Edmonton locations (from OpenStreetMap)
//! - Builders for appointments and staff
//! - Distance providers with fixed or failing answers
//! - A store whose job writes fail on demand

#![allow(dead_code)]

pub mod edmonton_locations;

use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};

use route_optimizer::error::{ProviderError, StoreError};
use route_optimizer::haversine::HaversineEstimator;
use route_optimizer::job::{JobId, JobStatus, NewJob, OptimizationJob};
use route_optimizer::matrix::{DistanceMatrix, DistanceMatrixEntry};
use route_optimizer::memory::MemoryStore;
use route_optimizer::model::{
    self, AccountId, Appointment, AppointmentId, AppointmentStatus, Coordinates, LocationId,
    StaffId, StaffMember,
};
use route_optimizer::route::Route;
use route_optimizer::traits::{DistanceProvider, Store};

pub use edmonton_locations::*;

pub const ACCOUNT: &str = "acct-1";

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()
}

pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    date().and_hms_opt(hour, minute, 0).unwrap()
}

// ============================================================================
// Builders
// ============================================================================

/// Builder for test appointments with sensible defaults.
#[derive(Clone, Debug)]
pub struct TestAppointment {
    inner: Appointment,
}

impl TestAppointment {
    pub fn new(id: &str, staff: &str) -> Self {
        Self {
            inner: Appointment {
                id: AppointmentId::new(id),
                account_id: AccountId::new(ACCOUNT),
                staff_id: StaffId::new(staff),
                location: Coordinates::new(53.5461, -113.4938),
                scheduled_at: at(9, 0),
                duration_minutes: 60,
                status: AppointmentStatus::Scheduled,
                hourly_rate: None,
            },
        }
    }

    pub fn location(mut self, lat: f64, lng: f64) -> Self {
        self.inner.location = Coordinates::new(lat, lng);
        self
    }

    pub fn at_site(self, site: &Location) -> Self {
        self.location(site.lat, site.lng)
    }

    pub fn duration(mut self, minutes: u32) -> Self {
        self.inner.duration_minutes = minutes;
        self
    }

    pub fn status(mut self, status: AppointmentStatus) -> Self {
        self.inner.status = status;
        self
    }

    pub fn scheduled_at(mut self, when: NaiveDateTime) -> Self {
        self.inner.scheduled_at = when;
        self
    }

    pub fn account(mut self, account: &str) -> Self {
        self.inner.account_id = AccountId::new(account);
        self
    }

    pub fn build(self) -> Appointment {
        self.inner
    }
}

pub fn staff(id: &str, lat: f64, lng: f64) -> StaffMember {
    StaffMember {
        id: StaffId::new(id),
        account_id: AccountId::new(ACCOUNT),
        name: format!("Staff {id}"),
        home: Some(Coordinates::new(lat, lng)),
        max_travel_radius_km: None,
        background_check_passed: true,
    }
}

/// Appointments spread over the client sites, round-robin across `staff_ids`.
pub fn spread_appointments(count: usize, staff_ids: &[&str]) -> Vec<Appointment> {
    (0..count)
        .map(|i| {
            let site = &CLIENT_SITES[i % CLIENT_SITES.len()];
            TestAppointment::new(&format!("apt-{i}"), staff_ids[i % staff_ids.len()])
                .location(site.lat + (i / CLIENT_SITES.len()) as f64 * 0.002, site.lng)
                .duration(30 + (i as u32 % 3) * 15)
                .build()
        })
        .collect()
}

pub fn home_id(staff: &str) -> LocationId {
    LocationId::staff_home(&StaffId::new(staff))
}

pub fn site_id(appointment: &str) -> LocationId {
    LocationId::new(appointment)
}

// ============================================================================
// Distance providers
// ============================================================================

/// Answers with a preset matrix; pairs not in it resolve to the matrix defaults.
pub struct FixedMatrix {
    matrix: DistanceMatrix,
}

impl FixedMatrix {
    pub fn new() -> Self {
        Self {
            matrix: DistanceMatrix::new(),
        }
    }

    /// Symmetric pair, distance derived from duration at 40 km/h.
    pub fn minutes(mut self, a: LocationId, b: LocationId, minutes: f64) -> Self {
        let seconds = minutes * 60.0;
        let entry = DistanceMatrixEntry::without_traffic(seconds / 3600.0 * 40_000.0, seconds);
        self.matrix.insert(a.clone(), b.clone(), entry);
        self.matrix.insert(b, a, entry);
        self
    }
}

impl DistanceProvider for FixedMatrix {
    fn distance_matrix(
        &self,
        _locations: &[model::Location],
    ) -> Result<DistanceMatrix, ProviderError> {
        Ok(self.matrix.clone())
    }

    fn geocode(&self, _address: &str) -> Result<Option<Coordinates>, ProviderError> {
        Ok(None)
    }
}

/// Fails with `error` for the first `failures` matrix requests, then answers
/// with the haversine estimate.
pub struct FlakyProvider {
    error: ProviderError,
    remaining: Mutex<usize>,
    calls: Mutex<usize>,
    fallback: HaversineEstimator,
}

impl FlakyProvider {
    pub fn new(error: ProviderError, failures: usize) -> Self {
        Self {
            error,
            remaining: Mutex::new(failures),
            calls: Mutex::new(0),
            fallback: HaversineEstimator::default(),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl DistanceProvider for FlakyProvider {
    fn distance_matrix(
        &self,
        locations: &[model::Location],
    ) -> Result<DistanceMatrix, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(self.error.clone());
        }
        self.fallback.distance_matrix(locations)
    }

    fn geocode(&self, address: &str) -> Result<Option<Coordinates>, ProviderError> {
        self.fallback.geocode(address)
    }
}

/// Counts matrix requests; used to observe caching.
pub struct CountingProvider {
    inner: HaversineEstimator,
    calls: Mutex<usize>,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self {
            inner: HaversineEstimator::default(),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl DistanceProvider for CountingProvider {
    fn distance_matrix(
        &self,
        locations: &[model::Location],
    ) -> Result<DistanceMatrix, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        self.inner.distance_matrix(locations)
    }

    fn geocode(&self, address: &str) -> Result<Option<Coordinates>, ProviderError> {
        self.inner.geocode(address)
    }
}

// ============================================================================
// Stores
// ============================================================================

/// [`MemoryStore`] whose first `failures` job saves fail as unavailable.
pub struct FlakyStore {
    pub inner: MemoryStore,
    remaining: Mutex<usize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            remaining: Mutex::new(failures),
        }
    }
}

impl Store for FlakyStore {
    fn account_exists(&self, account_id: &AccountId) -> Result<bool, StoreError> {
        self.inner.account_exists(account_id)
    }

    fn appointments_for(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.appointments_for(account_id, date)
    }

    fn staff_members(
        &self,
        account_id: &AccountId,
        ids: &[StaffId],
    ) -> Result<Vec<StaffMember>, StoreError> {
        self.inner.staff_members(account_id, ids)
    }

    fn update_appointment_schedule(
        &self,
        id: &AppointmentId,
        staff_id: &StaffId,
        scheduled_at: NaiveDateTime,
    ) -> Result<(), StoreError> {
        self.inner.update_appointment_schedule(id, staff_id, scheduled_at)
    }

    fn create_job(&self, job: NewJob) -> Result<OptimizationJob, StoreError> {
        self.inner.create_job(job)
    }

    fn find_job(&self, id: JobId) -> Result<Option<OptimizationJob>, StoreError> {
        self.inner.find_job(id)
    }

    fn save_job(&self, job: &OptimizationJob) -> Result<(), StoreError> {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.save_job(job)
    }

    fn latest_job(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
        statuses: &[JobStatus],
    ) -> Result<Option<OptimizationJob>, StoreError> {
        self.inner.latest_job(account_id, date, statuses)
    }

    fn save_routes(&self, job_id: JobId, routes: &[Route]) -> Result<(), StoreError> {
        self.inner.save_routes(job_id, routes)
    }

    fn routes_for_job(&self, job_id: JobId) -> Result<Vec<Route>, StoreError> {
        self.inner.routes_for_job(job_id)
    }
}
