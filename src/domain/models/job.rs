use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Full,
    Incremental,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Full => "full",
            JobKind::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Counters updated at file boundaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_files: u64,
    pub processed_files: u64,
    pub skipped_files: u64,
    pub total_chunks: u64,
    pub current_file: Option<String>,
}

/// One ingestion job for a `(tenant, repo)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    id: String,
    tenant_id: String,
    repo_id: String,
    kind: JobKind,
    status: JobStatus,
    progress: JobProgress,
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl Job {
    pub fn new(
        tenant_id: impl Into<String>,
        repo_id: impl Into<String>,
        kind: JobKind,
    ) -> Self {
        let now = super::current_timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            repo_id: repo_id.into(),
            kind,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> &JobProgress {
        &self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = super::current_timestamp();
    }

    pub fn set_progress(&mut self, progress: JobProgress) {
        self.progress = progress;
        self.updated_at = super::current_timestamp();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.updated_at = super::current_timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new("acme", "owner/repo", JobKind::Incremental);
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(!job.status().is_terminal());
        assert_eq!(job.progress().processed_files, 0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
