use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::generation::{GenerationJob, GenerationRequest};
use super::record::UploadedArtifact;
use crate::error::{ErrorKind, WorkflowError};

/// Step cursor of a run. A checkpoint stores the next step to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    LoadTarget,
    CreateJob,
    Poll,
    Extract,
    Upload,
    Commit,
    Cleanup,
    Done,
}

impl WorkflowStep {
    pub fn next(self) -> Self {
        match self {
            WorkflowStep::LoadTarget => WorkflowStep::CreateJob,
            WorkflowStep::CreateJob => WorkflowStep::Poll,
            WorkflowStep::Poll => WorkflowStep::Extract,
            WorkflowStep::Extract => WorkflowStep::Upload,
            WorkflowStep::Upload => WorkflowStep::Commit,
            WorkflowStep::Commit => WorkflowStep::Cleanup,
            WorkflowStep::Cleanup | WorkflowStep::Done => WorkflowStep::Done,
        }
    }
}

impl Display for WorkflowStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkflowStep::LoadTarget => write!(f, "load_target"),
            WorkflowStep::CreateJob => write!(f, "create_job"),
            WorkflowStep::Poll => write!(f, "poll"),
            WorkflowStep::Extract => write!(f, "extract"),
            WorkflowStep::Upload => write!(f, "upload"),
            WorkflowStep::Commit => write!(f, "commit"),
            WorkflowStep::Cleanup => write!(f, "cleanup"),
            WorkflowStep::Done => write!(f, "done"),
        }
    }
}

impl FromStr for WorkflowStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load_target" => Ok(WorkflowStep::LoadTarget),
            "create_job" => Ok(WorkflowStep::CreateJob),
            "poll" => Ok(WorkflowStep::Poll),
            "extract" => Ok(WorkflowStep::Extract),
            "upload" => Ok(WorkflowStep::Upload),
            "commit" => Ok(WorkflowStep::Commit),
            "cleanup" => Ok(WorkflowStep::Cleanup),
            "done" => Ok(WorkflowStep::Done),
            _ => Err(anyhow::anyhow!("Invalid workflow step: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// Values carried from one step to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Artifact key the record held when it was loaded; deleted during cleanup.
    #[serde(default)]
    pub previous_artifact_key: Option<String>,
    #[serde(default)]
    pub job: Option<GenerationJob>,
    /// Start of the poll budget.
    #[serde(default)]
    pub job_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub artifact: Option<UploadedArtifact>,
    /// Set when the superseded artifact could not be deleted. The run still completes.
    #[serde(default)]
    pub cleanup_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&WorkflowError> for RunFailure {
    fn from(err: &WorkflowError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

impl RunFailure {
    pub fn to_error(&self) -> WorkflowError {
        WorkflowError::from_parts(self.kind, self.message.clone())
    }
}

/// Durable state of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub run_id: Uuid,
    pub request: GenerationRequest,
    pub step: WorkflowStep,
    pub status: RunStatus,
    pub state: RunState,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    pub fn new(request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            request,
            step: WorkflowStep::LoadTarget,
            status: RunStatus::Pending,
            state: RunState::default(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the cursor past the current step.
    pub fn advance(&mut self) {
        self.step = self.step.next();
        self.updated_at = Utc::now();
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.step = WorkflowStep::Done;
        self.status = RunStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, err: &WorkflowError) {
        self.status = RunStatus::Failed;
        self.failure = Some(RunFailure::from(err));
        self.updated_at = Utc::now();
    }

    /// Terminal result of a finished run, `None` while the run is unfinished.
    pub fn outcome(&self) -> Option<Result<RunOutcome, WorkflowError>> {
        match self.status {
            RunStatus::Completed => Some(match &self.state.artifact {
                Some(artifact) => Ok(RunOutcome {
                    run_id: self.run_id,
                    artifact: artifact.clone(),
                    cleanup_error: self.state.cleanup_error.clone(),
                }),
                None => Err(WorkflowError::Internal(format!(
                    "run {} completed without an artifact",
                    self.run_id
                ))),
            }),
            RunStatus::Failed => Some(Err(self
                .failure
                .as_ref()
                .map(RunFailure::to_error)
                .unwrap_or_else(|| {
                    WorkflowError::Internal(format!("run {} failed without a reason", self.run_id))
                }))),
            RunStatus::Pending | RunStatus::Running => None,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub artifact: UploadedArtifact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_advance_in_fixed_order() {
        let mut step = WorkflowStep::LoadTarget;
        let mut seen = vec![step];
        while step != WorkflowStep::Done {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(
            seen.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            [
                "load_target",
                "create_job",
                "poll",
                "extract",
                "upload",
                "commit",
                "cleanup",
                "done"
            ]
        );
        assert_eq!("commit".parse::<WorkflowStep>().unwrap(), WorkflowStep::Commit);
    }

    #[test]
    fn failed_checkpoint_reports_recorded_error() {
        let mut checkpoint = WorkflowCheckpoint::new(GenerationRequest::new("u1", "v1", "fox"));
        assert!(checkpoint.outcome().is_none());

        checkpoint.mark_failed(&WorkflowError::Timeout("60000ms elapsed".to_string()));
        let err = checkpoint.outcome().unwrap().unwrap_err();
        assert_eq!(err, WorkflowError::Timeout("60000ms elapsed".to_string()));
    }

    #[test]
    fn completed_checkpoint_reports_artifact() {
        let mut checkpoint = WorkflowCheckpoint::new(GenerationRequest::new("u1", "v1", "fox"));
        checkpoint.state.artifact = Some(UploadedArtifact {
            key: "thumbnails/a.png".to_string(),
            url: "https://cdn/thumbnails/a.png".to_string(),
        });
        checkpoint.mark_completed();
        let outcome = checkpoint.outcome().unwrap().unwrap();
        assert_eq!(outcome.run_id, checkpoint.run_id);
        assert_eq!(outcome.artifact.key, "thumbnails/a.png");
        assert_eq!(checkpoint.step, WorkflowStep::Done);
    }

    #[test]
    fn run_state_tolerates_missing_fields() {
        let state: RunState = serde_json::from_str(r#"{"previous_artifact_key":"old"}"#).unwrap();
        assert_eq!(state.previous_artifact_key.as_deref(), Some("old"));
        assert!(state.job.is_none());
    }
}
