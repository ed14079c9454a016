//! Job state data: progress, metrics, transition history
//!
//! `JobData` is the single source of truth for one crawl job. It is owned by
//! the manager and mutated only through validated transitions and
//! phase-progress updates, so the transition history always matches the
//! current state.

use crate::config::CrawlConfig;
use crate::state::{JobState, JobSubstate};
use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An accepted state transition, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: JobState,
    pub to_state: JobState,
    pub timestamp: DateTime<Utc>,
    /// Seconds spent in `from_state`, measured from the previous
    /// transition's timestamp (or job creation for the first transition)
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Progress counters for one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

impl PhaseProgress {
    /// Completion percentage (0.0 when total is 0)
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }

    /// Items not yet completed or failed
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.completed + self.failed)
    }

    /// Records one completed item, saturating so `completed + failed`
    /// never exceeds `total`
    pub fn record_completed(&mut self) {
        if self.completed + self.failed < self.total {
            self.completed += 1;
        }
    }

    /// Records one failed item, saturating like `record_completed`
    pub fn record_failed(&mut self) {
        if self.completed + self.failed < self.total {
            self.failed += 1;
        }
    }
}

/// Progress records for the four tracked phases
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseProgressSet {
    pub urls: PhaseProgress,
    pub documents: PhaseProgress,
    pub extractions: PhaseProgress,
    pub processing: PhaseProgress,
}

impl PhaseProgressSet {
    fn phases(&self) -> [&PhaseProgress; 4] {
        [
            &self.urls,
            &self.documents,
            &self.extractions,
            &self.processing,
        ]
    }

    /// Overall completion fraction across all phases (0.0 when every
    /// total is 0)
    pub fn overall(&self) -> f64 {
        let total: u64 = self.phases().iter().map(|p| p.total).sum();
        if total == 0 {
            return 0.0;
        }
        let completed: u64 = self.phases().iter().map(|p| p.completed).sum();
        completed as f64 / total as f64
    }
}

/// Live metrics for a crawl job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub urls_queued: u64,
    pub urls_crawled: u64,
    pub urls_failed: u64,
    pub documents_found: u64,
    pub documents_downloaded: u64,
    pub documents_processed: u64,
    pub pages_per_minute: f64,
    pub success_rate: f64,
}

impl JobMetrics {
    /// Recomputes the success rate from crawled/failed counts
    pub fn update_success_rate(&mut self) {
        let total = self.urls_crawled + self.urls_failed;
        if total > 0 {
            self.success_rate = (self.urls_crawled as f64 / total as f64) * 100.0;
        }
    }
}

/// Complete state of one crawl job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobData {
    pub crawl_id: String,
    pub current_state: JobState,
    pub current_substate: Option<JobSubstate>,
    pub config: CrawlConfig,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,

    pub progress: PhaseProgressSet,
    pub metrics: JobMetrics,
    pub state_history: Vec<StateTransition>,

    pub error_message: Option<String>,
    pub error_count: u32,
}

impl JobData {
    /// Creates a new job in `QUEUED` with zeroed progress
    pub fn new(crawl_id: impl Into<String>, config: CrawlConfig) -> Self {
        Self {
            crawl_id: crawl_id.into(),
            current_state: JobState::Queued,
            current_substate: None,
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            paused_at: None,
            progress: PhaseProgressSet::default(),
            metrics: JobMetrics::default(),
            state_history: Vec::new(),
            error_message: None,
            error_count: 0,
        }
    }

    /// Attempts a transition to `to_state`
    ///
    /// On success the transition record is appended with its computed
    /// duration and timestamps are updated (`started_at` on first entry to
    /// INITIALIZING, `completed_at` on entry to a terminal state,
    /// `paused_at` on entry to PAUSED). On failure nothing is mutated.
    pub fn transition(
        &mut self,
        to_state: JobState,
        metadata: serde_json::Value,
    ) -> Result<(), EngineError> {
        if !self.current_state.can_transition(to_state) {
            return Err(EngineError::InvalidTransition {
                from: self.current_state,
                to: to_state,
            });
        }

        let now = Utc::now();
        let previous_mark = self
            .state_history
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(self.created_at);
        let duration = (now - previous_mark).num_milliseconds() as f64 / 1000.0;

        self.state_history.push(StateTransition {
            from_state: self.current_state,
            to_state,
            timestamp: now,
            duration_seconds: Some(duration),
            metadata,
        });

        self.current_state = to_state;
        // Substates are scoped to one main state; entering a new state
        // starts with none set.
        self.current_substate = None;

        if to_state == JobState::Initializing && self.started_at.is_none() {
            self.started_at = Some(now);
        } else if to_state.is_terminal() {
            self.completed_at = Some(now);
        } else if to_state == JobState::Paused {
            self.paused_at = Some(now);
        }

        Ok(())
    }

    /// Sets a substate of the current main state
    ///
    /// Fails without mutation when the substate does not belong to the
    /// current state's set.
    pub fn set_substate(&mut self, substate: JobSubstate) -> Result<(), EngineError> {
        if !self.current_state.substates().contains(&substate) {
            return Err(EngineError::InvalidSubstate {
                state: self.current_state,
                substate,
            });
        }
        self.current_substate = Some(substate);
        Ok(())
    }

    /// Returns true if the job can be paused (active phase only)
    pub fn can_pause(&self) -> bool {
        self.current_state.is_active_phase()
    }

    /// Returns true if the job can be resumed (paused only)
    pub fn can_resume(&self) -> bool {
        self.current_state == JobState::Paused
    }

    /// Returns true if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    /// The phase a paused job should resume into
    ///
    /// Scans the transition history backward, skipping the final entry
    /// (the pause itself), for the last non-PAUSED state. When no prior
    /// active state is recorded (e.g. a job restored from a minimal
    /// checkpoint) the earliest active phase, CRAWLING, is used.
    pub fn resume_target(&self) -> JobState {
        let upper = self.state_history.len().saturating_sub(1);
        for transition in self.state_history[..upper].iter().rev() {
            if transition.to_state != JobState::Paused
                && transition.to_state.is_active_phase()
            {
                return transition.to_state;
            }
        }
        JobState::Crawling
    }

    /// Total wall-clock duration in seconds, ongoing jobs measured to now
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    /// Overall completion fraction across all phases
    pub fn overall_progress(&self) -> f64 {
        self.progress.overall()
    }

    /// Records an execution error on the job
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.error_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> JobData {
        JobData::new("job-1", CrawlConfig::default())
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = test_job();
        assert_eq!(job.current_state, JobState::Queued);
        assert!(job.current_substate.is_none());
        assert!(job.state_history.is_empty());
        assert_eq!(job.overall_progress(), 0.0);
    }

    #[test]
    fn test_valid_transition_appends_history() {
        let mut job = test_job();
        job.transition(JobState::Initializing, serde_json::Value::Null)
            .unwrap();

        assert_eq!(job.current_state, JobState::Initializing);
        assert_eq!(job.state_history.len(), 1);
        assert_eq!(job.state_history[0].from_state, JobState::Queued);
        assert_eq!(job.state_history[0].to_state, JobState::Initializing);
        assert!(job.state_history[0].duration_seconds.is_some());
        assert!(job.started_at.is_some());
    }

    #[test]
    fn test_invalid_transition_does_not_mutate() {
        let mut job = test_job();
        let err = job
            .transition(JobState::Completed, serde_json::Value::Null)
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(job.current_state, JobState::Queued);
        assert!(job.state_history.is_empty());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_terminal_timestamps() {
        let mut job = test_job();
        job.transition(JobState::Initializing, serde_json::Value::Null)
            .unwrap();
        job.transition(JobState::Failed, serde_json::Value::Null)
            .unwrap();

        assert!(job.completed_at.is_some());
        assert!(job.is_terminal());
    }

    #[test]
    fn test_paused_timestamp_and_resume_target() {
        let mut job = test_job();
        job.transition(JobState::Initializing, serde_json::Value::Null)
            .unwrap();
        job.transition(JobState::Crawling, serde_json::Value::Null)
            .unwrap();
        job.transition(JobState::Paused, serde_json::Value::Null)
            .unwrap();

        assert!(job.paused_at.is_some());
        assert!(job.can_resume());
        assert_eq!(job.resume_target(), JobState::Crawling);
    }

    #[test]
    fn test_resume_target_after_later_phase() {
        let mut job = test_job();
        for state in [
            JobState::Initializing,
            JobState::Crawling,
            JobState::Extracting,
            JobState::Paused,
        ] {
            job.transition(state, serde_json::Value::Null).unwrap();
        }
        assert_eq!(job.resume_target(), JobState::Extracting);
    }

    #[test]
    fn test_resume_target_defaults_to_crawling() {
        let mut job = test_job();
        // Minimal history: only the pause itself is recorded.
        job.current_state = JobState::Crawling;
        job.transition(JobState::Paused, serde_json::Value::Null)
            .unwrap();
        assert_eq!(job.resume_target(), JobState::Crawling);
    }

    #[test]
    fn test_can_pause_and_can_resume_mutually_exclusive() {
        let mut job = test_job();
        let check = |job: &JobData| {
            assert!(
                !(job.can_pause() && job.can_resume()),
                "can_pause and can_resume both true in {}",
                job.current_state
            );
        };

        check(&job);
        for state in [
            JobState::Initializing,
            JobState::Crawling,
            JobState::Paused,
            JobState::Crawling,
            JobState::Extracting,
            JobState::Processing,
            JobState::Completed,
        ] {
            job.transition(state, serde_json::Value::Null).unwrap();
            check(&job);
        }
    }

    #[test]
    fn test_history_durations_sum_to_total_duration() {
        let mut job = test_job();
        for state in [
            JobState::Initializing,
            JobState::Crawling,
            JobState::Extracting,
            JobState::Processing,
            JobState::Completed,
        ] {
            job.transition(state, serde_json::Value::Null).unwrap();
        }

        let sum: f64 = job
            .state_history
            .iter()
            .filter_map(|t| t.duration_seconds)
            .sum();
        let total = job.duration_seconds().unwrap();
        // The first duration covers time spent in QUEUED before started_at,
        // which is effectively zero here.
        assert!((sum - total).abs() < 0.5, "sum={} total={}", sum, total);
    }

    #[test]
    fn test_substate_validation() {
        let mut job = test_job();
        job.transition(JobState::Initializing, serde_json::Value::Null)
            .unwrap();
        job.transition(JobState::Crawling, serde_json::Value::Null)
            .unwrap();

        job.set_substate(JobSubstate::DiscoveringUrls).unwrap();
        assert_eq!(job.current_substate, Some(JobSubstate::DiscoveringUrls));

        let err = job.set_substate(JobSubstate::Ocr).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSubstate { .. }));
        // Rejected substate must not clobber the current one.
        assert_eq!(job.current_substate, Some(JobSubstate::DiscoveringUrls));
    }

    #[test]
    fn test_substate_cleared_on_transition() {
        let mut job = test_job();
        job.transition(JobState::Initializing, serde_json::Value::Null)
            .unwrap();
        job.transition(JobState::Crawling, serde_json::Value::Null)
            .unwrap();
        job.set_substate(JobSubstate::DownloadingDocuments).unwrap();

        job.transition(JobState::Extracting, serde_json::Value::Null)
            .unwrap();
        assert!(job.current_substate.is_none());
    }

    #[test]
    fn test_phase_progress_invariant() {
        let mut progress = PhaseProgress {
            total: 2,
            completed: 0,
            failed: 0,
        };
        progress.record_completed();
        progress.record_failed();
        progress.record_completed(); // saturated, ignored
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 1);
        assert!(progress.completed + progress.failed <= progress.total);
        assert_eq!(progress.remaining(), 0);
    }

    #[test]
    fn test_overall_progress() {
        let mut job = test_job();
        job.progress.urls = PhaseProgress {
            total: 10,
            completed: 10,
            failed: 0,
        };
        job.progress.documents = PhaseProgress {
            total: 10,
            completed: 0,
            failed: 0,
        };
        assert!((job.overall_progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_success_rate() {
        let mut metrics = JobMetrics {
            urls_crawled: 3,
            urls_failed: 1,
            ..JobMetrics::default()
        };
        metrics.update_success_rate();
        assert!((metrics.success_rate - 75.0).abs() < f64::EPSILON);
    }
}
