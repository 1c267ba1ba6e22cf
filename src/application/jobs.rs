use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::use_cases::{IngestRepositoryUseCase, ProgressSink};
use crate::domain::{DomainError, EngineConfig, Job, JobKind, JobProgress, JobStatus};

/// A request to ingest one repository checkout.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub tenant_id: String,
    pub repo_id: String,
    pub kind: JobKind,
    pub repo_path: PathBuf,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    done: Arc<Notify>,
}

#[derive(Default)]
struct TenantQueue {
    queue: VecDeque<JobRequest>,
    worker_running: bool,
}

struct OrchestratorState {
    jobs: HashMap<String, JobEntry>,
    tenants: HashMap<String, TenantQueue>,
    /// Request → job id, kept so queued requests can find their entry.
    queued_ids: HashMap<(String, String), VecDeque<String>>,
}

/// Per-tenant serialized job execution over a bounded cross-tenant worker
/// pool. Cancellation is cooperative; the running pipeline observes the
/// token at file and batch boundaries.
pub struct Orchestrator {
    ingest: Arc<IngestRepositoryUseCase>,
    state: Arc<Mutex<OrchestratorState>>,
    pool: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(ingest: Arc<IngestRepositoryUseCase>, config: &EngineConfig) -> Self {
        Self {
            ingest,
            state: Arc::new(Mutex::new(OrchestratorState {
                jobs: HashMap::new(),
                tenants: HashMap::new(),
                queued_ids: HashMap::new(),
            })),
            pool: Arc::new(Semaphore::new(config.workers_per_pool.max(1))),
        }
    }

    /// Enqueue a job and return its id. Jobs of one tenant run one at a
    /// time, in submission order.
    pub fn submit(&self, request: JobRequest) -> String {
        let job = Job::new(&request.tenant_id, &request.repo_id, request.kind);
        let job_id = job.id().to_string();

        let spawn_worker = {
            let mut state = self.state.lock().expect("orchestrator state poisoned");
            state.jobs.insert(
                job_id.clone(),
                JobEntry {
                    job,
                    cancel: CancellationToken::new(),
                    done: Arc::new(Notify::new()),
                },
            );
            state
                .queued_ids
                .entry((request.tenant_id.clone(), request.repo_id.clone()))
                .or_default()
                .push_back(job_id.clone());

            let tenant = state.tenants.entry(request.tenant_id.clone()).or_default();
            tenant.queue.push_back(request.clone());
            if tenant.worker_running {
                false
            } else {
                tenant.worker_running = true;
                true
            }
        };

        if spawn_worker {
            self.spawn_tenant_worker(request.tenant_id.clone());
        }

        info!(
            "Queued {} job {} for {}/{}",
            request.kind.as_str(),
            job_id,
            request.tenant_id,
            request.repo_id
        );
        job_id
    }

    pub fn status(&self, job_id: &str) -> Option<Job> {
        let state = self.state.lock().expect("orchestrator state poisoned");
        state.jobs.get(job_id).map(|entry| entry.job.clone())
    }

    pub fn list(&self, tenant_id: &str) -> Vec<Job> {
        let state = self.state.lock().expect("orchestrator state poisoned");
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|entry| entry.job.tenant_id() == tenant_id)
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at()));
        jobs
    }

    /// Request cancellation. A queued job cancels immediately; a running job
    /// finishes its current per-file work and exits at the next checkpoint.
    pub fn cancel(&self, job_id: &str) -> Result<(), DomainError> {
        let mut state = self.state.lock().expect("orchestrator state poisoned");
        let entry = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| DomainError::not_found(format!("Job {}", job_id)))?;
        if entry.job.status().is_terminal() {
            return Ok(());
        }
        entry.cancel.cancel();
        if entry.job.status() == JobStatus::Queued {
            entry.job.set_status(JobStatus::Cancelled);
            entry.done.notify_waiters();
        }
        Ok(())
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, job_id: &str) -> Option<Job> {
        loop {
            let (job, done) = {
                let state = self.state.lock().expect("orchestrator state poisoned");
                let entry = state.jobs.get(job_id)?;
                (entry.job.clone(), Arc::clone(&entry.done))
            };
            if job.status().is_terminal() {
                return Some(job);
            }
            // The sleep arm covers a notification landing between the status
            // check and the await.
            tokio::select! {
                _ = done.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
            }
        }
    }

    fn spawn_tenant_worker(&self, tenant_id: String) {
        let state = Arc::clone(&self.state);
        let pool = Arc::clone(&self.pool);
        let ingest = Arc::clone(&self.ingest);

        tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = state.lock().expect("orchestrator state poisoned");
                    let tenant = guard.tenants.entry(tenant_id.clone()).or_default();
                    match tenant.queue.pop_front() {
                        Some(request) => Some(request),
                        None => {
                            tenant.worker_running = false;
                            None
                        }
                    }
                };
                let Some(request) = next else {
                    return;
                };

                let job_id = {
                    let mut guard = state.lock().expect("orchestrator state poisoned");
                    guard
                        .queued_ids
                        .get_mut(&(request.tenant_id.clone(), request.repo_id.clone()))
                        .and_then(VecDeque::pop_front)
                };
                let Some(job_id) = job_id else {
                    warn!("Queued job lost its id; skipping");
                    continue;
                };

                let permit = match pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                run_job(&state, &ingest, &job_id, request).await;
                drop(permit);
            }
        });
    }
}

async fn run_job(
    state: &Arc<Mutex<OrchestratorState>>,
    ingest: &Arc<IngestRepositoryUseCase>,
    job_id: &str,
    request: JobRequest,
) {
    let cancel = {
        let mut guard = state.lock().expect("orchestrator state poisoned");
        let Some(entry) = guard.jobs.get_mut(job_id) else {
            return;
        };
        // Cancelled while queued: nothing to run.
        if entry.job.status().is_terminal() {
            return;
        }
        entry.job.set_status(JobStatus::Running);
        entry.cancel.clone()
    };

    let sink: Arc<dyn ProgressSink> = Arc::new(RegistryProgressSink {
        state: Arc::clone(state),
        job_id: job_id.to_string(),
    });

    let result = ingest
        .execute(
            &request.tenant_id,
            &request.repo_id,
            &request.repo_path,
            request.kind,
            cancel,
            sink,
        )
        .await;

    let mut guard = state.lock().expect("orchestrator state poisoned");
    if let Some(entry) = guard.jobs.get_mut(job_id) {
        match result {
            Ok(outcome) => {
                entry.job.set_status(JobStatus::Completed);
                info!(
                    "Job {} completed: {} documents upserted",
                    job_id, outcome.upserted_documents
                );
            }
            Err(e) if e.is_cancelled() => {
                entry.job.set_status(JobStatus::Cancelled);
                info!("Job {} cancelled", job_id);
            }
            Err(e) => {
                entry.job.set_error(e.to_string());
                entry.job.set_status(JobStatus::Failed);
                warn!("Job {} failed: {}", job_id, e);
            }
        }
        entry.done.notify_waiters();
    }
}

/// Writes pipeline progress back into the job registry at file boundaries.
struct RegistryProgressSink {
    state: Arc<Mutex<OrchestratorState>>,
    job_id: String,
}

impl ProgressSink for RegistryProgressSink {
    fn update(&self, progress: &JobProgress) {
        let mut guard = self.state.lock().expect("orchestrator state poisoned");
        if let Some(entry) = guard.jobs.get_mut(&self.job_id) {
            entry.job.set_progress(progress.clone());
        }
    }
}
