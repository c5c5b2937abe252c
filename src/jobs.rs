//! Ledger generation jobs.
//!
//! A job moves `pending -> processing -> completed | failed`. At most one job per
//! statement group is active at a time; [`JobManager::start_or_attach`] returns the
//! active job when there is one and otherwise starts a new job in the background.
//! The background task never reports errors to the caller that started it, so the
//! persisted job record is the only place its outcome shows up.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::GenerationSettings;
use crate::error::{LedgerError, Result};
use crate::llm::{
    build_generation_messages, structure_from_value, GenerationErrorKind, GenerationRequest,
    SamplingParams, StructureGenerator, LEDGER_SCHEMA_DESCRIPTION, LEDGER_SCHEMA_NAME,
};
use crate::response::{ApiResponse, ResponseStatus};
use crate::schema::{GenerationJob, JobStatus, LedgerStructure};
use crate::store::{ContextError, GroupContext, GroupSource, JobStore};

pub const MAX_ATTEMPTS: u32 = crate::config::DEFAULT_MAX_ATTEMPTS;

const GENERIC_FAILURE: &str = "Ralat berlaku semasa penjanaan lejar";

/// Tries for each job record write before giving up.
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_RETRY_MS: u64 = 50;

/// Why a job ended in `failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    Context(ContextError),
    Generation(GenerationErrorKind),
    /// The job stayed active past the configured staleness limit.
    TimedOut,
    /// The background task died before recording an outcome.
    Interrupted,
    /// The generation request could not be assembled.
    Internal,
}

impl JobFailure {
    /// Message persisted on the job and shown to users.
    pub fn user_message(&self) -> &'static str {
        match self {
            JobFailure::Generation(GenerationErrorKind::SchemaMismatch) => {
                "Data struktur tidak sesuai dengan format yang diperlukan. Sila cuba lagi."
            }
            JobFailure::Generation(GenerationErrorKind::RateLimited) => {
                "Sistem terlalu sibuk. Sila cuba sebentar lagi"
            }
            JobFailure::Generation(GenerationErrorKind::TokenLimit) => {
                "Data terlalu besar untuk diproses"
            }
            JobFailure::Generation(GenerationErrorKind::MissingConfiguration) => {
                "Konfigurasi sistem tidak lengkap"
            }
            JobFailure::Context(ContextError::GroupNotFound(_))
            | JobFailure::Context(ContextError::Unavailable(_)) => "Data kumpulan tidak sah",
            JobFailure::Context(ContextError::NoStatements) => {
                "Tiada penyata dijumpai untuk pemprosesan"
            }
            JobFailure::Context(ContextError::OrganizationMissing)
            | JobFailure::Generation(GenerationErrorKind::Transport)
            | JobFailure::TimedOut
            | JobFailure::Interrupted
            | JobFailure::Internal => GENERIC_FAILURE,
        }
    }
}

/// Reply to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// True when an already active job was returned instead of starting one.
    #[serde(skip)]
    pub attached: bool,
}

impl JobHandle {
    fn attached(job: &GenerationJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            attached: true,
        }
    }

    fn started(job: &GenerationJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            attached: false,
        }
    }

    pub fn into_response(self) -> ApiResponse<JobHandle> {
        let message = if self.attached {
            "Generation already in progress"
        } else {
            "Generation started"
        };
        ApiResponse::success(self).with_message(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQuery {
    Job(Uuid),
    /// Newest job of the group, whatever its status.
    Group(Uuid),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusData {
    pub job_id: Uuid,
    pub group_id: Uuid,
    pub status: JobStatus,
    pub result: Option<LedgerStructure>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Map a job onto the `success | pending | error` view callers poll.
pub fn job_view(job: GenerationJob) -> ApiResponse<JobStatusData> {
    let (status, result, error) = match job.status {
        JobStatus::Completed => (ResponseStatus::Success, job.result, None),
        JobStatus::Failed => (ResponseStatus::Error, None, job.error),
        JobStatus::Pending | JobStatus::Processing => (ResponseStatus::Pending, None, None),
    };

    ApiResponse {
        status,
        data: Some(JobStatusData {
            job_id: job.id,
            group_id: job.group_id,
            status: job.status,
            result,
            error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }),
        message: None,
    }
}

#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<dyn JobStore>,
    groups: Arc<dyn GroupSource>,
    generator: Arc<dyn StructureGenerator>,
    settings: GenerationSettings,
    sampling: SamplingParams,
}

impl JobManager {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        groups: Arc<dyn GroupSource>,
        generator: Arc<dyn StructureGenerator>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            jobs,
            groups,
            generator,
            settings,
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Return the group's active job, or create one and start it in the background.
    pub async fn start_or_attach(&self, group_id: Uuid) -> Result<JobHandle> {
        if let Some(existing) = self.active_job(group_id).await? {
            info!(
                "Generation already in progress for group {} (job {})",
                group_id, existing.id
            );
            return Ok(JobHandle::attached(&existing));
        }

        let job = GenerationJob::pending(group_id);
        match self.jobs.insert_job(&job).await {
            Ok(()) => {}
            Err(LedgerError::ActiveJobExists { .. }) => {
                // Another request committed its job between our read and insert.
                let winner = self
                    .jobs
                    .latest_job_for_group(group_id, &JobStatus::ACTIVE)
                    .await?
                    .ok_or(LedgerError::ActiveJobExists { group_id })?;
                info!("Attached to concurrently created job {}", winner.id);
                return Ok(JobHandle::attached(&winner));
            }
            Err(e) => return Err(e),
        }

        info!("Created generation job {} for group {}", job.id, group_id);
        let handle = JobHandle::started(&job);
        self.spawn_supervised(job);
        Ok(handle)
    }

    async fn active_job(&self, group_id: Uuid) -> Result<Option<GenerationJob>> {
        let Some(mut job) = self
            .jobs
            .latest_job_for_group(group_id, &JobStatus::ACTIVE)
            .await?
        else {
            return Ok(None);
        };

        let Some(limit) = self.settings.stale_after() else {
            return Ok(Some(job));
        };

        let is_stale = Utc::now()
            .signed_duration_since(job.updated_at)
            .to_std()
            .map(|age| age > limit)
            .unwrap_or(false);
        if !is_stale {
            return Ok(Some(job));
        }

        warn!(
            "Job {} has been {} since {}; marking it failed",
            job.id, job.status, job.updated_at
        );
        job.fail(JobFailure::TimedOut.user_message())?;
        match self.jobs.update_job(&job).await {
            // A concurrent writer finishing the job also leaves the group inactive.
            Ok(()) | Err(LedgerError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn spawn_supervised(&self, job: GenerationJob) {
        let worker = self.clone();
        let supervisor = self.clone();
        let job_id = job.id;

        tokio::spawn(async move {
            let task = tokio::spawn(async move { worker.run(job).await });
            if let Err(e) = task.await {
                error!("Background generation for job {} crashed: {}", job_id, e);
                supervisor.fail_by_id(job_id, JobFailure::Interrupted).await;
            }
        });
    }

    async fn fail_by_id(&self, job_id: Uuid, failure: JobFailure) {
        let mut job = match self.jobs.load_job(job_id).await {
            Ok(Some(job)) if job.status.is_active() => job,
            Ok(_) => return,
            Err(e) => {
                error!("Could not load job {} to mark it failed: {}", job_id, e);
                return;
            }
        };

        if job.fail(failure.user_message()).is_ok() {
            if let Err(e) = self.persist(&job).await {
                error!("Could not mark job {} failed: {}", job_id, e);
            }
        }
    }

    /// Write the job, retrying transient store errors a bounded number of times.
    ///
    /// `InvalidTransition` is returned at once: the stored copy is already terminal.
    async fn persist(&self, job: &GenerationJob) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.jobs.update_job(job).await {
                Ok(()) => return Ok(()),
                Err(e @ LedgerError::InvalidTransition { .. }) => return Err(e),
                Err(e) if attempt >= PERSIST_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(
                        "Writing {} job {} failed on attempt {}: {}",
                        job.status, job.id, attempt, e
                    );
                    sleep(Duration::from_millis(PERSIST_RETRY_MS * u64::from(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Drive a pending job to a terminal state. Outcomes are only persisted, never returned.
    pub async fn run(&self, mut job: GenerationJob) {
        if let Err(e) = job.start_processing() {
            warn!("Job {} cannot be run: {}", job.id, e);
            return;
        }
        if let Err(e) = self.persist(&job).await {
            error!("Failed to mark job {} processing: {}", job.id, e);
            if !matches!(e, LedgerError::InvalidTransition { .. }) {
                // Leaving it pending would block the group until the reaper runs.
                self.finish(job, Err(JobFailure::Internal)).await;
            }
            return;
        }
        info!("Job {} processing for group {}", job.id, job.group_id);

        let outcome = match self.load_context(job.group_id).await {
            Ok(context) => self.generate_with_retries(&mut job, &context).await,
            Err(e) => {
                error!("Job {} cannot fetch its group data: {}", job.id, e);
                Err(JobFailure::Context(e))
            }
        };

        self.finish(job, outcome).await;
    }

    async fn load_context(&self, group_id: Uuid) -> std::result::Result<GroupContext, ContextError> {
        let context = self.groups.fetch_group_context(group_id).await?;
        if context.organization_name.trim().is_empty() {
            return Err(ContextError::OrganizationMissing);
        }
        if context.statements.is_empty() {
            return Err(ContextError::NoStatements);
        }
        Ok(context)
    }

    fn build_request(
        &self,
        context: &GroupContext,
    ) -> std::result::Result<GenerationRequest, serde_json::Error> {
        Ok(GenerationRequest {
            schema_name: LEDGER_SCHEMA_NAME.to_string(),
            schema_description: LEDGER_SCHEMA_DESCRIPTION.to_string(),
            schema: LedgerStructure::schema_value()?,
            messages: build_generation_messages(context)?,
            sampling: self.sampling.clone(),
        })
    }

    /// Bump `updated_at` so the stale reaper sees the job as alive.
    ///
    /// Returns false once another writer has closed the job.
    async fn heartbeat(&self, job: &mut GenerationJob) -> bool {
        job.touch();
        match self.jobs.update_job(job).await {
            Ok(()) => true,
            Err(LedgerError::InvalidTransition { from, .. }) => {
                warn!("Job {} is already {} in the store; abandoning it", job.id, from);
                false
            }
            Err(e) => {
                warn!("Heartbeat for job {} failed: {}", job.id, e);
                true
            }
        }
    }

    async fn generate_with_retries(
        &self,
        job: &mut GenerationJob,
        context: &GroupContext,
    ) -> std::result::Result<LedgerStructure, JobFailure> {
        let job_id = job.id;
        let request = self.build_request(context).map_err(|e| {
            error!("Job {} could not build its generation request: {}", job_id, e);
            JobFailure::Internal
        })?;

        let attempts = self.settings.attempts();
        let mut last_error = GenerationErrorKind::Transport;

        for attempt in 1..=attempts {
            if !self.heartbeat(job).await {
                return Err(JobFailure::TimedOut);
            }
            debug!("Job {} attempt {} of {}", job_id, attempt, attempts);

            let generated = self
                .generator
                .generate(&request)
                .await
                .and_then(structure_from_value);

            match generated {
                Ok(structure) => {
                    info!("Job {} generated a ledger on attempt {}", job_id, attempt);
                    return Ok(structure);
                }
                Err(e) => {
                    warn!(
                        "Job {} attempt {} of {} failed: {}",
                        job_id, attempt, attempts, e
                    );
                    last_error = e.kind;
                    if attempt < attempts {
                        sleep(self.settings.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(JobFailure::Generation(last_error))
    }

    async fn finish(
        &self,
        mut job: GenerationJob,
        outcome: std::result::Result<LedgerStructure, JobFailure>,
    ) {
        let transitioned = match outcome {
            Ok(structure) => job.complete(structure),
            Err(failure) => {
                error!("Job {} failed: {:?}", job.id, failure);
                job.fail(failure.user_message())
            }
        };

        if let Err(e) = transitioned {
            error!("Job {} could not record its outcome: {}", job.id, e);
            return;
        }

        match self.persist(&job).await {
            Ok(()) => info!("Job {} {}", job.id, job.status),
            Err(LedgerError::InvalidTransition { from, .. }) => {
                warn!("Job {} was already {}; dropping its {} outcome", job.id, from, job.status)
            }
            Err(e) => error!("Failed to persist {} job {}: {}", job.status, job.id, e),
        }
    }

    pub async fn get_status(&self, query: JobQuery) -> Result<ApiResponse<JobStatusData>> {
        let job = match query {
            JobQuery::Job(job_id) => self
                .jobs
                .load_job(job_id)
                .await?
                .ok_or(LedgerError::JobNotFound(job_id))?,
            JobQuery::Group(group_id) => self
                .jobs
                .latest_job_for_group(group_id, &[])
                .await?
                .ok_or(LedgerError::NoJobsForGroup(group_id))?,
        };
        Ok(job_view(job))
    }
}
