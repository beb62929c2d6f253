use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random job id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a job.
///
/// The happy path is strictly ordered:
/// `pending → cloning → analyzing → implementing → creating_pr → completed`.
/// `failed` and `cancelled` are absorbing alternates reachable from any
/// non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Cloning,
    Analyzing,
    Implementing,
    CreatingPr,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cloning => "cloning",
            Self::Analyzing => "analyzing",
            Self::Implementing => "implementing",
            Self::CreatingPr => "creating_pr",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The next status on the happy path, or `None` for terminals.
    pub fn next(&self) -> Option<JobStatus> {
        match self {
            Self::Pending => Some(Self::Cloning),
            Self::Cloning => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Implementing),
            Self::Implementing => Some(Self::CreatingPr),
            Self::CreatingPr => Some(Self::Completed),
            Self::Completed | Self::Failed | Self::Cancelled => None,
        }
    }

    /// Whether `self → to` is an edge of the job state graph.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            JobStatus::Failed | JobStatus::Cancelled => true,
            _ => self.next() == Some(to),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "cloning" => Ok(Self::Cloning),
            "analyzing" => Ok(Self::Analyzing),
            "implementing" => Ok(Self::Implementing),
            "creating_pr" => Ok(Self::CreatingPr),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// One timestamped line of the append-only progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// The unit of work, and the only record the web layer polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub organization_id: String,
    pub post_id: String,
    pub provider_id: String,
    pub additional_context: Option<String>,
    pub status: JobStatus,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
    pub progress: Vec<ProgressEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable inputs supplied by the trigger layer when a job is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub organization_id: String,
    pub post_id: String,
    pub provider_id: String,
    pub additional_context: Option<String>,
}

impl NewJob {
    /// Build a `pending` job record with a fresh id.
    pub fn into_job(self) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            organization_id: self.organization_id,
            post_id: self.post_id,
            provider_id: self.provider_id,
            additional_context: self
                .additional_context
                .filter(|c| !c.trim().is_empty()),
            status: JobStatus::Pending,
            branch_name: None,
            pr_url: None,
            error_message: None,
            progress: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields written alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn branch(branch_name: impl Into<String>) -> Self {
        Self {
            branch_name: Some(branch_name.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn completed(pr_url: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self {
            branch_name: Some(branch_name.into()),
            pr_url: Some(pr_url.into()),
            error_message: None,
        }
    }

    /// Apply the present fields onto a job record.
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(branch) = &self.branch_name {
            job.branch_name = Some(branch.clone());
        }
        if let Some(url) = &self.pr_url {
            job.pr_url = Some(url.clone());
        }
        if let Some(error) = &self.error_message {
            job.error_message = Some(error.clone());
        }
    }
}
