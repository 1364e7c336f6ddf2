use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use serde::Serialize;

use crate::types::{EmployerOutcome, RunStatus};

/// Live state of one run. Written by the orchestrator only; readers take a
/// [`RunSnapshot`] at any time. Each field is replaced atomically on its own,
/// a snapshot may mix values from before and after an update but never sees
/// a half-written field.
#[derive(Debug)]
pub struct RunState {
    run_id: String,
    status: AtomicU8,
    current_employer: RwLock<String>,
    employers_done: AtomicUsize,
    total_employers: AtomicUsize,
    jobs_found: AtomicUsize,
    jobs_returned: AtomicUsize,
    errors: RwLock<Vec<String>>,
    phase: RwLock<String>,
    outcomes: RwLock<Vec<EmployerOutcome>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub current_employer: String,
    pub employers_done: usize,
    pub total_employers: usize,
    pub jobs_found: usize,
    pub jobs_returned: usize,
    pub errors: Vec<String>,
    pub phase: String,
    pub outcomes: Vec<EmployerOutcome>,
}

fn replace<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl RunState {
    pub fn new(run_id: &str) -> Self {
        RunState {
            run_id: run_id.into(),
            status: AtomicU8::new(RunStatus::Running.as_u8()),
            current_employer: RwLock::new(String::new()),
            employers_done: AtomicUsize::new(0),
            total_employers: AtomicUsize::new(0),
            jobs_found: AtomicUsize::new(0),
            jobs_returned: AtomicUsize::new(0),
            errors: RwLock::new(vec![]),
            phase: RwLock::new("starting".into()),
            outcomes: RwLock::new(vec![]),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn set_status(&self, status: RunStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }

    pub fn set_phase(&self, phase: impl Into<String>) {
        replace(&self.phase, phase.into());
    }

    pub fn set_current_employer(&self, name: &str) {
        replace(&self.current_employer, name.to_string());
    }

    pub fn set_total_employers(&self, total: usize) {
        self.total_employers.store(total, Ordering::SeqCst);
    }

    pub fn set_employers_done(&self, done: usize) {
        self.employers_done.fetch_max(done, Ordering::SeqCst);
    }

    pub fn add_jobs(&self, found: usize, returned: usize) {
        self.jobs_found.fetch_add(found, Ordering::SeqCst);
        self.jobs_returned.fetch_add(returned, Ordering::SeqCst);
    }

    pub fn push_error(&self, error: String) {
        self.errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub fn push_outcome(&self, outcome: EmployerOutcome) {
        self.outcomes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
    }

    pub fn errors(&self) -> Vec<String> {
        read(&self.errors)
    }

    pub fn outcomes(&self) -> Vec<EmployerOutcome> {
        read(&self.outcomes)
    }

    pub fn totals(&self) -> (usize, usize) {
        (
            self.jobs_found.load(Ordering::SeqCst),
            self.jobs_returned.load(Ordering::SeqCst),
        )
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let (jobs_found, jobs_returned) = self.totals();
        RunSnapshot {
            run_id: self.run_id.clone(),
            status: self.status(),
            current_employer: read(&self.current_employer),
            employers_done: self.employers_done.load(Ordering::SeqCst),
            total_employers: self.total_employers.load(Ordering::SeqCst),
            jobs_found,
            jobs_returned,
            errors: self.errors(),
            phase: read(&self.phase),
            outcomes: self.outcomes(),
        }
    }
}

/// In-memory registry of the runs this process knows about, keyed by run id.
#[derive(Debug, Default)]
pub struct RunStore {
    runs: RwLock<HashMap<String, Arc<RunState>>>,
}

impl RunStore {
    pub fn new() -> Self {
        RunStore::default()
    }

    pub fn insert(&self, state: Arc<RunState>) {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.run_id().to_string(), state);
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<RunState>> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    pub fn remove(&self, run_id: &str) -> Option<Arc<RunState>> {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(run_id)
    }
}
