use crate::error::{Error, Result};
use crate::model::{Experiment, ExperimentStatus, Trial};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Persistence collaborator. The core calls into it to create the initial
/// rows, append per-trial results, and finalize terminal status; it never
/// reads its own writes back.
pub trait ExperimentStore: Send + Sync {
    fn create_experiment(&self, experiment: &Experiment) -> Result<()>;
    fn update_experiment(&self, experiment: &Experiment) -> Result<()>;
    fn create_trial(&self, trial: &Trial) -> Result<()>;
    fn record_trial(&self, trial: &Trial) -> Result<()>;
    fn finalize_experiment(&self, experiment_id: &str, status: ExperimentStatus) -> Result<()>;
}

/// In-memory store used by tests and by hosting services that keep their
/// own persistence outside the core.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    experiments: BTreeMap<String, Experiment>,
    trials: BTreeMap<(String, u32), Trial>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn experiment(&self, id: &str) -> Option<Experiment> {
        self.inner.lock().ok()?.experiments.get(id).cloned()
    }

    pub fn trials_for(&self, experiment_id: &str) -> Vec<Trial> {
        match self.inner.lock() {
            Ok(inner) => inner
                .trials
                .values()
                .filter(|t| t.experiment_id == experiment_id)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl ExperimentStore for MemoryStore {
    fn create_experiment(&self, experiment: &Experiment) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner
            .experiments
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    fn update_experiment(&self, experiment: &Experiment) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner
            .experiments
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    fn create_trial(&self, trial: &Trial) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner
            .trials
            .insert((trial.experiment_id.clone(), trial.number), trial.clone());
        Ok(())
    }

    fn record_trial(&self, trial: &Trial) -> Result<()> {
        self.create_trial(trial)
    }

    fn finalize_experiment(&self, experiment_id: &str, status: ExperimentStatus) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        let experiment = inner
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| Error::Store(format!("unknown experiment: {experiment_id}")))?;
        // Terminal states are set exactly once and never revert.
        if experiment.status.is_terminal() {
            return Err(Error::Store(format!(
                "experiment {experiment_id} already finalized"
            )));
        }
        experiment.status = status;
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::Store("memory store lock poisoned".to_string())
}
