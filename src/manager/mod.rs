//! Crawl Manager
//!
//! The top-level orchestrator: creates jobs, drives each one through the
//! lifecycle state machine, owns pause/resume/cancel/delete, and exposes
//! the read accessors the API layer consumes. Every collaborator (event
//! bus, checkpoint and iteration managers, discovery engine, job store) is
//! injected at construction; there is no ambient global state.
//!
//! Each executing job is an independent tokio task. Job state lives behind
//! short mutex critical sections that are never held across an await, so
//! suspension can only happen between mutations, never mid-mutation.

mod control;
mod phases;
mod status;

pub use control::{Cancelled, JobControl};
pub use status::{
    JobResults, JobStateDetail, JobStatus, JobSummary, PhaseProgressView, ProgressView,
};

use crate::checkpoint::{CheckpointManager, CheckpointType};
use crate::config::{validate, CrawlConfig, EngineSettings};
use crate::discovery::DiscoveryEngine;
use crate::events::{EventBus, EventLog};
use crate::iteration::IterationManager;
use crate::state::{CrawlLedger, JobData, JobState, JobSubstate};
use crate::storage::{JobStore, SqliteJobStore};
use crate::{EngineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Error type used inside phase execution
///
/// Cancellation is a control signal, not a failure; the executor converts
/// it into the CANCELLED transition instead of FAILED.
pub(crate) enum PhaseError {
    Cancelled,
    Engine(EngineError),
}

impl From<Cancelled> for PhaseError {
    fn from(_: Cancelled) -> Self {
        PhaseError::Cancelled
    }
}

impl From<EngineError> for PhaseError {
    fn from(e: EngineError) -> Self {
        PhaseError::Engine(e)
    }
}

pub(crate) type PhaseResult<T> = std::result::Result<T, PhaseError>;

/// One job's in-memory state: data, ledger, and control handles
pub(crate) struct JobSlot {
    pub(crate) crawl_id: String,
    pub(crate) data: Mutex<JobData>,
    pub(crate) ledger: Mutex<CrawlLedger>,
    pub(crate) control: JobControl,
}

impl JobSlot {
    fn new(data: JobData) -> Self {
        Self {
            crawl_id: data.crawl_id.clone(),
            data: Mutex::new(data),
            ledger: Mutex::new(CrawlLedger::default()),
            control: JobControl::new(),
        }
    }
}

/// Orchestrates crawl jobs end to end
pub struct CrawlManager {
    settings: EngineSettings,
    jobs: Mutex<HashMap<String, Arc<JobSlot>>>,
    event_bus: Arc<EventBus>,
    checkpoints: Arc<CheckpointManager>,
    iterations: Arc<IterationManager>,
    discovery: Arc<DiscoveryEngine>,
    store: Arc<Mutex<SqliteJobStore>>,
    event_log: Arc<EventLog>,
}

impl CrawlManager {
    /// Wires the manager to its injected collaborators
    ///
    /// The JSONL event log is attached here as a global bus subscriber, so
    /// every published event lands in the per-job log file.
    pub fn new(
        settings: EngineSettings,
        event_bus: Arc<EventBus>,
        discovery: Arc<DiscoveryEngine>,
        checkpoints: Arc<CheckpointManager>,
        iterations: Arc<IterationManager>,
        store: Arc<Mutex<SqliteJobStore>>,
    ) -> Self {
        let event_log = Arc::new(EventLog::new(settings.events_dir()));
        let log = event_log.clone();
        event_bus.subscribe_global(Arc::new(move |event| {
            log.append(event).map_err(anyhow::Error::from)
        }));

        Self {
            settings,
            jobs: Mutex::new(HashMap::new()),
            event_bus,
            checkpoints,
            iterations,
            discovery,
            store,
            event_log,
        }
    }

    /// Creates a new job in QUEUED with zeroed progress
    ///
    /// The initial persist is fire-and-forget: a failed write is logged
    /// but never fails job creation.
    pub fn create_job(&self, config: CrawlConfig) -> Result<String> {
        validate(&config).map_err(EngineError::Config)?;

        let crawl_id = Uuid::new_v4().to_string();
        let data = JobData::new(crawl_id.clone(), config);
        let snapshot = data.clone();

        self.jobs
            .lock()
            .expect("job map poisoned")
            .insert(crawl_id.clone(), Arc::new(JobSlot::new(data)));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                handle.spawn(async move {
                    if let Err(e) = store.lock().expect("job store poisoned").save_job(&snapshot) {
                        tracing::warn!("Initial persist of {} failed: {}", snapshot.crawl_id, e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self
                    .store
                    .lock()
                    .expect("job store poisoned")
                    .save_job(&snapshot)
                {
                    tracing::warn!("Initial persist of {} failed: {}", crawl_id, e);
                }
            }
        }

        tracing::info!("Created crawl job {}", crawl_id);
        Ok(crawl_id)
    }

    /// Executes a job end to end
    ///
    /// Drives QUEUED through the working phases to COMPLETED, persisting
    /// after every transition. Cancellation observed at a suspension point
    /// ends in CANCELLED; an unhandled phase error records the failure and
    /// ends in FAILED. Only an unknown job id is an error to the caller.
    pub async fn execute(&self, crawl_id: &str) -> Result<()> {
        let slot = self.slot(crawl_id)?;

        match self.run_pipeline(&slot).await {
            Ok(()) => {
                tracing::info!("Crawl job {} completed", crawl_id);
                Ok(())
            }
            Err(PhaseError::Cancelled) => {
                // cancel() usually performs the transition itself; cover
                // the case where the signal fired between suspension
                // points without a transition.
                let needs_transition = {
                    let data = slot.data.lock().expect("job data poisoned");
                    !data.is_terminal()
                };
                if needs_transition {
                    self.transition_state(&slot, JobState::Cancelled, serde_json::Value::Null)?;
                    self.persist(&slot);
                }
                tracing::info!("Crawl job {} cancelled", crawl_id);
                Ok(())
            }
            Err(PhaseError::Engine(e)) => {
                // A cancel that landed between suspension points can leave
                // the job terminal before the phase notices; that is a
                // cancellation, not a failure.
                let already_terminal = {
                    let data = slot.data.lock().expect("job data poisoned");
                    data.is_terminal()
                };
                if already_terminal {
                    tracing::info!("Crawl job {} ended while {}", crawl_id, e);
                    return Ok(());
                }

                let message = e.to_string();
                tracing::error!("Crawl job {} failed: {}", crawl_id, message);
                self.event_bus
                    .publish_error(crawl_id, "execution_error", &message);
                {
                    let mut data = slot.data.lock().expect("job data poisoned");
                    data.record_error(&message);
                }

                // Error checkpoint for post-mortem recovery, best-effort.
                let (data_snapshot, ledger_snapshot) = self.snapshot(&slot);
                if let Err(e) = self.checkpoints.create_checkpoint(
                    &data_snapshot,
                    &ledger_snapshot,
                    CheckpointType::Error,
                    serde_json::json!({ "error": message }),
                ) {
                    tracing::warn!("Error checkpoint for {} failed: {}", crawl_id, e);
                }
                // FAILED is unreachable from PAUSED; if a pause won the
                // race the error stays recorded and the state stands.
                if let Err(e) = self.transition_state(&slot, JobState::Failed, serde_json::Value::Null)
                {
                    tracing::warn!("Could not mark {} failed: {}", crawl_id, e);
                }
                self.persist(&slot);
                Ok(())
            }
        }
    }

    /// Pauses a running job
    ///
    /// Takes a pause checkpoint (best-effort), closes the run gate, and
    /// transitions to PAUSED. Returns false when the state machine
    /// disallows pausing, including on a second pause in a row.
    pub fn pause_job(&self, crawl_id: &str) -> Result<bool> {
        let slot = self.slot(crawl_id)?;

        {
            let data = slot.data.lock().expect("job data poisoned");
            if !data.can_pause() {
                return Ok(false);
            }
        }

        let (data_snapshot, ledger_snapshot) = self.snapshot(&slot);
        if let Err(e) = self.checkpoints.create_checkpoint(
            &data_snapshot,
            &ledger_snapshot,
            CheckpointType::Pause,
            serde_json::Value::Null,
        ) {
            tracing::warn!("Pause checkpoint for {} failed: {}", crawl_id, e);
        }

        slot.control.pause();
        self.transition_state(&slot, JobState::Paused, serde_json::Value::Null)?;
        self.persist(&slot);

        Ok(true)
    }

    /// Takes a manual checkpoint of a job's current state
    pub fn checkpoint_job(&self, crawl_id: &str) -> Result<String> {
        let slot = self.slot(crawl_id)?;
        let (data, ledger) = self.snapshot(&slot);
        self.checkpoints
            .create_checkpoint(&data, &ledger, CheckpointType::Manual, serde_json::Value::Null)
    }

    /// Resumes a paused job into the phase that was active before pausing
    ///
    /// The target phase comes from the transition history; with no prior
    /// active phase recorded the job resumes into CRAWLING.
    pub fn resume_job(&self, crawl_id: &str) -> Result<bool> {
        let slot = self.slot(crawl_id)?;

        let target = {
            let data = slot.data.lock().expect("job data poisoned");
            if !data.can_resume() {
                return Ok(false);
            }
            data.resume_target()
        };

        slot.control.resume();
        self.transition_state(&slot, target, serde_json::Value::Null)?;
        self.persist(&slot);

        Ok(true)
    }

    /// Cancels a job; false when it already reached a terminal state
    ///
    /// The cancel signal also wakes a paused job so its task can exit.
    pub fn cancel_job(&self, crawl_id: &str) -> Result<bool> {
        let slot = self.slot(crawl_id)?;

        {
            let data = slot.data.lock().expect("job data poisoned");
            if data.is_terminal() {
                return Ok(false);
            }
        }

        slot.control.cancel();
        self.transition_state(&slot, JobState::Cancelled, serde_json::Value::Null)?;
        self.persist(&slot);

        Ok(true)
    }

    /// Deletes a job from memory and the durable store; idempotent
    pub fn delete_job(&self, crawl_id: &str) -> Result<()> {
        let slot = self.jobs.lock().expect("job map poisoned").remove(crawl_id);
        if let Some(slot) = slot {
            // Stop an executing task at its next suspension point.
            slot.control.cancel();
        }

        if let Err(e) = self
            .store
            .lock()
            .expect("job store poisoned")
            .delete_job(crawl_id)
        {
            tracing::warn!("Deleting persisted job {} failed: {}", crawl_id, e);
        }

        self.event_bus.cleanup(crawl_id);
        if let Err(e) = self.event_log.remove(crawl_id) {
            tracing::warn!("Removing event log for {} failed: {}", crawl_id, e);
        }

        Ok(())
    }

    /// Restores all persisted jobs with fresh control flags
    ///
    /// Called once at startup; jobs resume in whatever state they were
    /// last persisted in.
    pub fn load_jobs_from_store(&self) -> Result<usize> {
        let jobs = self
            .store
            .lock()
            .expect("job store poisoned")
            .load_all_jobs()?;

        let mut map = self.jobs.lock().expect("job map poisoned");
        let mut restored = 0;
        for data in jobs {
            if map.contains_key(&data.crawl_id) {
                continue;
            }
            map.insert(data.crawl_id.clone(), Arc::new(JobSlot::new(data)));
            restored += 1;
        }

        tracing::info!("Restored {} jobs from storage", restored);
        Ok(restored)
    }

    // ===== Read accessors =====

    /// Summary status, `None` for unknown jobs
    pub fn status(&self, crawl_id: &str) -> Option<JobStatus> {
        let slot = self.try_slot(crawl_id)?;
        let data = slot.data.lock().expect("job data poisoned");
        Some(JobStatus::from_job(&data))
    }

    /// Detailed state including progress per phase and transition history
    pub fn state_detail(&self, crawl_id: &str) -> Option<JobStateDetail> {
        let slot = self.try_slot(crawl_id)?;
        let data = slot.data.lock().expect("job data poisoned");
        Some(JobStateDetail::from_job(&data))
    }

    /// Live metrics for a job
    pub fn metrics(&self, crawl_id: &str) -> Option<crate::state::JobMetrics> {
        let slot = self.try_slot(crawl_id)?;
        let data = slot.data.lock().expect("job data poisoned");
        Some(data.metrics.clone())
    }

    /// Results view; only available once the job has COMPLETED
    pub fn results(&self, crawl_id: &str) -> Option<JobResults> {
        let slot = self.try_slot(crawl_id)?;
        let data = slot.data.lock().expect("job data poisoned");
        if data.current_state != JobState::Completed {
            return None;
        }
        let ledger = slot.ledger.lock().expect("job ledger poisoned");
        Some(JobResults {
            crawl_id: data.crawl_id.clone(),
            status: data.current_state,
            metrics: data.metrics.clone(),
            progress: ProgressView::from_job(&data),
            duration_seconds: data.duration_seconds(),
            documents: ledger.downloaded_documents.clone(),
        })
    }

    /// Lists jobs, newest started first, optionally filtered by state
    pub fn list_jobs(
        &self,
        state: Option<JobState>,
        limit: usize,
        offset: usize,
    ) -> Vec<JobSummary> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .filter_map(|slot| {
                let data = slot.data.lock().expect("job data poisoned");
                if let Some(state) = state {
                    if data.current_state != state {
                        return None;
                    }
                }
                Some(JobSummary {
                    crawl_id: data.crawl_id.clone(),
                    status: data.current_state,
                    started_at: data.started_at,
                    completed_at: data.completed_at,
                    progress: ProgressView::from_job(&data),
                    config: data.config.clone(),
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.into_iter().skip(offset).take(limit).collect()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.checkpoints
    }

    pub fn iterations(&self) -> &Arc<IterationManager> {
        &self.iterations
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ===== Internal helpers =====

    pub(crate) fn slot(&self, crawl_id: &str) -> Result<Arc<JobSlot>> {
        self.try_slot(crawl_id)
            .ok_or_else(|| EngineError::JobNotFound(crawl_id.to_string()))
    }

    fn try_slot(&self, crawl_id: &str) -> Option<Arc<JobSlot>> {
        self.jobs
            .lock()
            .expect("job map poisoned")
            .get(crawl_id)
            .cloned()
    }

    pub(crate) fn snapshot(&self, slot: &JobSlot) -> (JobData, CrawlLedger) {
        let data = slot.data.lock().expect("job data poisoned").clone();
        let ledger = slot.ledger.lock().expect("job ledger poisoned").clone();
        (data, ledger)
    }

    /// Performs a validated transition, publishes the state-change event
    pub(crate) fn transition_state(
        &self,
        slot: &JobSlot,
        to_state: JobState,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let (from_state, duration) = {
            let mut data = slot.data.lock().expect("job data poisoned");
            let from_state = data.current_state;
            data.transition(to_state, metadata)?;
            (from_state, data.duration_seconds())
        };

        self.event_bus.publish_state_change(
            &slot.crawl_id,
            from_state.as_str(),
            to_state.as_str(),
            serde_json::json!({ "duration_seconds": duration }),
        );

        Ok(())
    }

    /// Sets a substate and publishes the substate-change event
    pub(crate) fn set_substate(&self, slot: &JobSlot, substate: JobSubstate) -> Result<()> {
        {
            let mut data = slot.data.lock().expect("job data poisoned");
            data.set_substate(substate)?;
        }
        self.event_bus
            .publish_substate_change(&slot.crawl_id, substate.as_str());
        Ok(())
    }

    /// Persists the job's current state; failures are logged, never fatal
    pub(crate) fn persist(&self, slot: &JobSlot) {
        let data = slot.data.lock().expect("job data poisoned").clone();
        if let Err(e) = self
            .store
            .lock()
            .expect("job store poisoned")
            .save_job(&data)
        {
            tracing::warn!("Persisting job {} failed: {}", data.crawl_id, e);
        }
    }

    /// Publishes the current progress snapshot
    pub(crate) fn publish_progress(&self, slot: &JobSlot) {
        let payload = {
            let data = slot.data.lock().expect("job data poisoned");
            serde_json::to_value(ProgressView::from_job(&data)).unwrap_or_default()
        };
        self.event_bus.publish_progress(&slot.crawl_id, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use std::path::Path;

    fn test_manager(dir: &Path) -> CrawlManager {
        let settings = EngineSettings::with_data_dir(dir);
        let event_bus = Arc::new(EventBus::new(settings.event_history_limit));
        let discovery = Arc::new(DiscoveryEngine::new(&settings).unwrap());
        let checkpoints = Arc::new(CheckpointManager::new(settings.checkpoints_dir()).unwrap());
        let iterations = Arc::new(IterationManager::new(settings.iterations_dir()).unwrap());
        let store = Arc::new(Mutex::new(
            SqliteJobStore::new(&settings.jobs_db_path()).unwrap(),
        ));
        CrawlManager::new(settings, event_bus, discovery, checkpoints, iterations, store)
    }

    fn empty_config() -> CrawlConfig {
        CrawlConfig::default()
    }

    #[tokio::test]
    async fn test_create_job_starts_queued() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let crawl_id = manager.create_job(empty_config()).unwrap();
        let status = manager.status(&crawl_id).unwrap();

        assert_eq!(status.current_state, JobState::Queued);
        assert!(!status.is_terminal);
        assert!(!status.can_pause);
        assert!(!status.can_resume);
        assert_eq!(status.overall_progress, 0.0);
    }

    #[tokio::test]
    async fn test_execute_with_empty_targets_completes_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let crawl_id = manager.create_job(empty_config()).unwrap();
        manager.execute(&crawl_id).await.unwrap();

        let status = manager.status(&crawl_id).unwrap();
        assert_eq!(status.current_state, JobState::Completed);
        assert!(status.is_terminal);
        // Degraded mode still exercises the full pipeline.
        assert!(status.metrics.urls_crawled > 0);
        assert!(status.metrics.documents_found > 0);

        let detail = manager.state_detail(&crawl_id).unwrap();
        let states: Vec<JobState> =
            detail.state_history.iter().map(|t| t.to_state).collect();
        assert_eq!(
            states,
            vec![
                JobState::Initializing,
                JobState::Crawling,
                JobState::Extracting,
                JobState::Processing,
                JobState::Completed,
            ]
        );

        // Degraded-mode discovery is visible in the event stream.
        let warnings =
            manager
                .event_bus()
                .get_by_type(&crawl_id, EventType::Warning, 10);
        assert!(!warnings.is_empty());
    }

    #[tokio::test]
    async fn test_execute_unknown_job_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        assert!(matches!(
            manager.execute("missing").await,
            Err(EngineError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pause_rejected_outside_active_phase() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let crawl_id = manager.create_job(empty_config()).unwrap();

        // QUEUED cannot be paused.
        assert!(!manager.pause_job(&crawl_id).unwrap());
    }

    #[tokio::test]
    async fn test_cancel_twice_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let crawl_id = manager.create_job(empty_config()).unwrap();

        assert!(manager.cancel_job(&crawl_id).unwrap());
        assert!(!manager.cancel_job(&crawl_id).unwrap());

        let status = manager.status(&crawl_id).unwrap();
        assert_eq!(status.current_state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_results_only_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let crawl_id = manager.create_job(empty_config()).unwrap();

        assert!(manager.results(&crawl_id).is_none());
        manager.execute(&crawl_id).await.unwrap();
        assert!(manager.results(&crawl_id).is_some());
    }

    #[tokio::test]
    async fn test_delete_job_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let crawl_id = manager.create_job(empty_config()).unwrap();

        manager.delete_job(&crawl_id).unwrap();
        assert!(manager.status(&crawl_id).is_none());
        manager.delete_job(&crawl_id).unwrap();
    }

    #[tokio::test]
    async fn test_jobs_restore_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let crawl_id;
        {
            let manager = test_manager(dir.path());
            crawl_id = manager.create_job(empty_config()).unwrap();
            manager.execute(&crawl_id).await.unwrap();
        }

        let manager = test_manager(dir.path());
        assert!(manager.status(&crawl_id).is_none());
        let restored = manager.load_jobs_from_store().unwrap();
        assert_eq!(restored, 1);

        let status = manager.status(&crawl_id).unwrap();
        assert_eq!(status.current_state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let done = manager.create_job(empty_config()).unwrap();
        manager.execute(&done).await.unwrap();
        let queued = manager.create_job(empty_config()).unwrap();

        let all = manager.list_jobs(None, 10, 0);
        assert_eq!(all.len(), 2);

        let completed = manager.list_jobs(Some(JobState::Completed), 10, 0);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].crawl_id, done);

        let queued_jobs = manager.list_jobs(Some(JobState::Queued), 10, 0);
        assert_eq!(queued_jobs.len(), 1);
        assert_eq!(queued_jobs[0].crawl_id, queued);
    }

    #[tokio::test]
    async fn test_manual_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let crawl_id = manager.create_job(empty_config()).unwrap();

        let checkpoint_id = manager.checkpoint_job(&crawl_id).unwrap();
        let list = manager.checkpoints().list(&crawl_id);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].checkpoint_id, checkpoint_id);
        assert_eq!(
            list[0].checkpoint_type,
            crate::checkpoint::CheckpointType::Manual
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_create() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let config = CrawlConfig {
            targets: vec!["ftp://example.org".to_string()],
            ..CrawlConfig::default()
        };
        assert!(manager.create_job(config).is_err());
    }
}
