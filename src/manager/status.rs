//! Job read models
//!
//! Typed views of job state consumed verbatim by the (external) HTTP layer.

use crate::config::CrawlConfig;
use crate::discovery::DocumentCandidate;
use crate::state::{JobData, JobMetrics, JobState, JobSubstate, PhaseProgress, StateTransition};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Progress counters for one phase, with its completion percentage
#[derive(Debug, Clone, Serialize)]
pub struct PhaseProgressView {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub percentage: f64,
}

impl From<&PhaseProgress> for PhaseProgressView {
    fn from(progress: &PhaseProgress) -> Self {
        Self {
            total: progress.total,
            completed: progress.completed,
            failed: progress.failed,
            percentage: progress.percentage(),
        }
    }
}

/// Progress across all four phases
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub overall_percentage: f64,
    pub urls: PhaseProgressView,
    pub documents: PhaseProgressView,
    pub extractions: PhaseProgressView,
    pub processing: PhaseProgressView,
}

impl ProgressView {
    pub fn from_job(job: &JobData) -> Self {
        Self {
            overall_percentage: job.overall_progress() * 100.0,
            urls: (&job.progress.urls).into(),
            documents: (&job.progress.documents).into(),
            extractions: (&job.progress.extractions).into(),
            processing: (&job.progress.processing).into(),
        }
    }
}

/// Summary status for one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub crawl_id: String,
    pub current_state: JobState,
    pub current_substate: Option<JobSubstate>,
    pub duration_seconds: Option<f64>,
    pub overall_progress: f64,
    pub is_terminal: bool,
    pub can_pause: bool,
    pub can_resume: bool,
    pub metrics: JobMetrics,
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn from_job(job: &JobData) -> Self {
        Self {
            crawl_id: job.crawl_id.clone(),
            current_state: job.current_state,
            current_substate: job.current_substate,
            duration_seconds: job.duration_seconds(),
            overall_progress: job.overall_progress(),
            is_terminal: job.is_terminal(),
            can_pause: job.can_pause(),
            can_resume: job.can_resume(),
            metrics: job.metrics.clone(),
            error_count: job.error_count,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Detailed state including per-phase progress and the transition history
#[derive(Debug, Clone, Serialize)]
pub struct JobStateDetail {
    pub crawl_id: String,
    pub current_state: JobState,
    pub current_substate: Option<JobSubstate>,
    pub progress: ProgressView,
    pub metrics: JobMetrics,
    pub can_pause: bool,
    pub can_resume: bool,
    pub is_terminal: bool,
    pub state_history: Vec<StateTransition>,
}

impl JobStateDetail {
    pub fn from_job(job: &JobData) -> Self {
        Self {
            crawl_id: job.crawl_id.clone(),
            current_state: job.current_state,
            current_substate: job.current_substate,
            progress: ProgressView::from_job(job),
            metrics: job.metrics.clone(),
            can_pause: job.can_pause(),
            can_resume: job.can_resume(),
            is_terminal: job.is_terminal(),
            state_history: job.state_history.clone(),
        }
    }
}

/// Results view, available once a job completes
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub crawl_id: String,
    pub status: JobState,
    pub metrics: JobMetrics,
    pub progress: ProgressView,
    pub duration_seconds: Option<f64>,
    pub documents: Vec<DocumentCandidate>,
}

/// One row in the job listing
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub crawl_id: String,
    pub status: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: ProgressView,
    pub config: CrawlConfig,
}
