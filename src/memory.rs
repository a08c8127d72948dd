//! In-memory [`Store`] for local runs and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::StoreError;
use crate::job::{JobId, JobStatus, NewJob, OptimizationJob};
use crate::model::{AccountId, Appointment, AppointmentId, StaffId, StaffMember};
use crate::route::Route;
use crate::traits::Store;

#[derive(Debug, Default)]
struct Inner {
    accounts: HashSet<AccountId>,
    appointments: Vec<Appointment>,
    staff: Vec<StaffMember>,
    jobs: BTreeMap<JobId, OptimizationJob>,
    routes: HashMap<JobId, Vec<Route>>,
    next_job: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn with_account(mut self, account_id: impl Into<AccountId>) -> Self {
        if let Ok(inner) = self.inner.get_mut() {
            inner.accounts.insert(account_id.into());
        }
        self
    }

    pub fn with_staff(mut self, member: StaffMember) -> Self {
        if let Ok(inner) = self.inner.get_mut() {
            inner.staff.push(member);
        }
        self
    }

    pub fn with_appointment(mut self, appointment: Appointment) -> Self {
        if let Ok(inner) = self.inner.get_mut() {
            inner.appointments.push(appointment);
        }
        self
    }

    pub fn remove_account(&self, account_id: &AccountId) -> Result<(), StoreError> {
        self.lock()?.accounts.remove(account_id);
        Ok(())
    }

    pub fn appointment(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError> {
        Ok(self.lock()?.appointments.iter().find(|a| &a.id == id).cloned())
    }

    pub fn jobs(&self) -> Result<Vec<OptimizationJob>, StoreError> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }
}

impl Store for MemoryStore {
    fn account_exists(&self, account_id: &AccountId) -> Result<bool, StoreError> {
        Ok(self.lock()?.accounts.contains(account_id))
    }

    fn appointments_for(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let inner = self.lock()?;
        let mut found: Vec<Appointment> = inner
            .appointments
            .iter()
            .filter(|a| &a.account_id == account_id && a.scheduled_date() == date)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.scheduled_at);
        Ok(found)
    }

    fn staff_members(
        &self,
        account_id: &AccountId,
        ids: &[StaffId],
    ) -> Result<Vec<StaffMember>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .staff
            .iter()
            .filter(|member| &member.account_id == account_id && ids.contains(&member.id))
            .cloned()
            .collect())
    }

    fn update_appointment_schedule(
        &self,
        id: &AppointmentId,
        staff_id: &StaffId,
        scheduled_at: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let appointment = inner
            .appointments
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| StoreError::Missing {
                entity: "appointment",
                id: id.to_string(),
            })?;
        appointment.staff_id = staff_id.clone();
        appointment.scheduled_at = scheduled_at;
        Ok(())
    }

    fn create_job(&self, job: NewJob) -> Result<OptimizationJob, StoreError> {
        let mut inner = self.lock()?;
        inner.next_job += 1;
        let job = OptimizationJob::from_new(JobId(inner.next_job), job);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn find_job(&self, id: JobId) -> Result<Option<OptimizationJob>, StoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    fn save_job(&self, job: &OptimizationJob) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                entity: "job",
                id: job.id.to_string(),
            }),
        }
    }

    fn latest_job(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
        statuses: &[JobStatus],
    ) -> Result<Option<OptimizationJob>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .values()
            .rev()
            .find(|job| {
                &job.account_id == account_id
                    && job.requested_date == date
                    && statuses.contains(&job.status)
            })
            .cloned())
    }

    fn save_routes(&self, job_id: JobId, routes: &[Route]) -> Result<(), StoreError> {
        self.lock()?.routes.insert(job_id, routes.to_vec());
        Ok(())
    }

    fn routes_for_job(&self, job_id: JobId) -> Result<Vec<Route>, StoreError> {
        Ok(self.lock()?.routes.get(&job_id).cloned().unwrap_or_default())
    }
}
