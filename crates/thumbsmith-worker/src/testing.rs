//! In-memory collaborators for exercising [`ThumbnailWorkflow`](crate::ThumbnailWorkflow)
//! without Postgres, object storage or the generation service.
//!
//! Every fake appends to a shared [`EventLog`] so tests can assert on the order of
//! side effects across collaborators.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use thumbsmith_core::models::{
    ArtifactSwap, GenerationJob, GenerationParams, JobStatus, OutputPayload, TargetRecord,
    UploadedArtifact, WorkflowCheckpoint,
};
use thumbsmith_core::WorkflowConfig;
use thumbsmith_db::{CheckpointStore, LeaseClaim, RecordLease, RecordStore};
use thumbsmith_generation::{GenerationClientError, GenerationService};
use thumbsmith_storage::{ArtifactStore, StorageError, StorageResult};

use crate::ThumbnailWorkflow;

/// One observable call made by the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LoadRecord(String),
    AcquireLease(String),
    RenewLease(String),
    ReleaseLease(String),
    CreateJob(GenerationParams),
    GetJob(String),
    Ingest(String),
    SwapArtifact { record_id: String, key: String },
    Delete(String),
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Index of the first event matching `pred`.
    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.lock().unwrap().iter().position(pred)
    }

    /// True when any generation or storage call was made.
    pub fn has_external_calls(&self) -> bool {
        self.count(|e| {
            matches!(
                e,
                Event::CreateJob(_) | Event::GetJob(_) | Event::Ingest(_) | Event::Delete(_)
            )
        }) > 0
    }
}

/// Build a job snapshot.
pub fn job(id: &str, status: JobStatus, output: Option<serde_json::Value>) -> GenerationJob {
    GenerationJob {
        id: id.to_string(),
        status,
        output: output.map(OutputPayload::from),
        error: None,
    }
}

pub struct InMemoryRecordStore {
    records: Mutex<HashMap<String, TargetRecord>>,
    reject_commits: AtomicBool,
    log: EventLog,
}

impl InMemoryRecordStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            reject_commits: AtomicBool::new(false),
            log,
        }
    }

    pub fn insert(&self, id: &str, owner_id: &str, artifact_key: Option<&str>) {
        let record = TargetRecord {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            current_artifact_key: artifact_key.map(str::to_string),
            current_artifact_url: artifact_key.map(|k| format!("https://cdn.test/{}", k)),
        };
        self.records.lock().unwrap().insert(id.to_string(), record);
    }

    pub fn get(&self, id: &str) -> Option<TargetRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    /// Make every commit match zero rows, as if the record was reassigned after load.
    pub fn reject_commits(&self) {
        self.reject_commits.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn load(&self, record_id: &str, owner_id: &str) -> Result<Option<TargetRecord>> {
        self.log.push(Event::LoadRecord(record_id.to_string()));
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(record_id)
            .filter(|r| r.owner_id == owner_id)
            .cloned())
    }

    async fn swap_artifact(
        &self,
        record_id: &str,
        owner_id: &str,
        artifact: &UploadedArtifact,
    ) -> Result<ArtifactSwap> {
        self.log.push(Event::SwapArtifact {
            record_id: record_id.to_string(),
            key: artifact.key.clone(),
        });
        if self.reject_commits.load(Ordering::SeqCst) {
            return Ok(ArtifactSwap::not_applied());
        }

        let mut records = self.records.lock().unwrap();
        match records
            .get_mut(record_id)
            .filter(|r| r.owner_id == owner_id)
        {
            Some(record) => {
                let previous_key = record.current_artifact_key.replace(artifact.key.clone());
                record.current_artifact_url = Some(artifact.url.clone());
                Ok(ArtifactSwap {
                    rows_affected: 1,
                    previous_key,
                })
            }
            None => Ok(ArtifactSwap::not_applied()),
        }
    }
}

/// Generation service that answers from a script.
///
/// `create_job` returns the initial job, and the same job again on every later
/// call, like an idempotent create; each `get_job` pops the next scripted
/// snapshot and keeps returning the last one once the script runs out.
pub struct ScriptedGenerationService {
    initial: Mutex<Option<std::result::Result<GenerationJob, GenerationClientError>>>,
    created: Mutex<Option<GenerationJob>>,
    polls: Mutex<VecDeque<std::result::Result<GenerationJob, GenerationClientError>>>,
    last: Mutex<Option<GenerationJob>>,
    log: EventLog,
}

impl ScriptedGenerationService {
    pub fn new(initial: GenerationJob, log: EventLog) -> Self {
        Self {
            last: Mutex::new(Some(initial.clone())),
            initial: Mutex::new(Some(Ok(initial))),
            created: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            log,
        }
    }

    pub fn failing_create(err: GenerationClientError, log: EventLog) -> Self {
        Self {
            initial: Mutex::new(Some(Err(err))),
            created: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            log,
        }
    }

    /// Queue the snapshot returned by the next unanswered poll.
    pub fn then(self, job: GenerationJob) -> Self {
        self.polls.lock().unwrap().push_back(Ok(job));
        self
    }

    pub fn then_fail(self, err: GenerationClientError) -> Self {
        self.polls.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn poll_count(&self) -> usize {
        self.log.count(|e| matches!(e, Event::GetJob(_)))
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerationService {
    async fn create_job(
        &self,
        params: &GenerationParams,
    ) -> std::result::Result<GenerationJob, GenerationClientError> {
        self.log.push(Event::CreateJob(params.clone()));
        let mut created = self.created.lock().unwrap();
        if let Some(job) = created.as_ref() {
            return Ok(job.clone());
        }
        let result = self
            .initial
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(GenerationClientError::Transport("create refused".into())));
        if let Ok(job) = &result {
            *created = Some(job.clone());
        }
        result
    }

    async fn get_job(
        &self,
        job_id: &str,
    ) -> std::result::Result<GenerationJob, GenerationClientError> {
        self.log.push(Event::GetJob(job_id.to_string()));
        match self.polls.lock().unwrap().pop_front() {
            Some(Ok(job)) => {
                *self.last.lock().unwrap() = Some(job.clone());
                Ok(job)
            }
            Some(Err(err)) => Err(err),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| GenerationClientError::Transport("no job scripted".into())),
        }
    }
}

/// Object store that "ingests" by minting a key and keeping the source URL as the
/// public URL.
pub struct InMemoryArtifactStore {
    objects: Mutex<HashMap<String, String>>,
    next_id: AtomicUsize,
    fail_ingest: AtomicBool,
    empty_ingest: AtomicBool,
    fail_delete: AtomicBool,
    log: EventLog,
}

impl InMemoryArtifactStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            fail_ingest: AtomicBool::new(false),
            empty_ingest: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            log,
        }
    }

    pub fn put(&self, key: &str, url: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), url.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn fail_ingest(&self) {
        self.fail_ingest.store(true, Ordering::SeqCst);
    }

    pub fn empty_ingest(&self) {
        self.empty_ingest.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn ingest_from_url(&self, url: &str) -> StorageResult<Vec<UploadedArtifact>> {
        self.log.push(Event::Ingest(url.to_string()));
        if self.fail_ingest.load(Ordering::SeqCst) {
            return Err(StorageError::DownloadFailed(format!("{} unreachable", url)));
        }
        if self.empty_ingest.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let artifact = UploadedArtifact {
            key: format!("thumbnails/generated-{}.png", n),
            url: url.to_string(),
        };
        self.put(&artifact.key, &artifact.url);
        Ok(vec![artifact])
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.log.push(Event::Delete(key.to_string()));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!("{} is locked", key)));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    runs: Mutex<HashMap<Uuid, WorkflowCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn get(&self, run_id: Uuid) -> Option<WorkflowCheckpoint> {
        self.runs.lock().unwrap().get(&run_id).cloned()
    }

    pub fn insert(&self, checkpoint: WorkflowCheckpoint) {
        self.runs
            .lock()
            .unwrap()
            .insert(checkpoint.run_id, checkpoint);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        self.insert(checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<WorkflowCheckpoint>> {
        Ok(self.get(run_id))
    }

    async fn list_unfinished(
        &self,
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WorkflowCheckpoint>> {
        let mut runs: Vec<_> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.status.is_finished() && c.updated_at <= updated_before)
            .cloned()
            .collect();
        runs.sort_by_key(|c| c.created_at);
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }
}

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    run_id: Uuid,
    holder: Uuid,
}

/// Lease table without expiry.
pub struct InMemoryLease {
    entries: Mutex<HashMap<String, LeaseEntry>>,
    log: EventLog,
}

impl InMemoryLease {
    pub fn new(log: EventLog) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            log,
        }
    }

    /// Hand the lease to `run_id` under a holder no workflow knows, as another
    /// process driving that run would.
    pub fn hold(&self, record_id: &str, run_id: Uuid) {
        self.entries.lock().unwrap().insert(
            record_id.to_string(),
            LeaseEntry {
                run_id,
                holder: Uuid::new_v4(),
            },
        );
    }

    /// Run the lease on `record_id` is held for.
    pub fn holder(&self, record_id: &str) -> Option<Uuid> {
        self.entries
            .lock()
            .unwrap()
            .get(record_id)
            .map(|e| e.run_id)
    }
}

#[async_trait]
impl RecordLease for InMemoryLease {
    async fn acquire(
        &self,
        record_id: &str,
        run_id: Uuid,
        holder: Uuid,
        _ttl: Duration,
    ) -> Result<LeaseClaim> {
        self.log.push(Event::AcquireLease(record_id.to_string()));
        let mut entries = self.entries.lock().unwrap();
        match entries.get(record_id) {
            Some(entry) if entry.holder != holder => Ok(LeaseClaim::Held {
                run_id: Some(entry.run_id),
            }),
            _ => {
                entries.insert(record_id.to_string(), LeaseEntry { run_id, holder });
                Ok(LeaseClaim::Acquired)
            }
        }
    }

    async fn renew(&self, record_id: &str, holder: Uuid, _ttl: Duration) -> Result<bool> {
        self.log.push(Event::RenewLease(record_id.to_string()));
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(record_id)
            .is_some_and(|e| e.holder == holder))
    }

    async fn release(&self, record_id: &str, holder: Uuid) -> Result<()> {
        self.log.push(Event::ReleaseLease(record_id.to_string()));
        let mut entries = self.entries.lock().unwrap();
        if entries.get(record_id).is_some_and(|e| e.holder == holder) {
            entries.remove(record_id);
        }
        Ok(())
    }
}

/// All fakes wired to one event log.
pub struct Harness {
    pub log: EventLog,
    pub records: Arc<InMemoryRecordStore>,
    pub generation: Arc<ScriptedGenerationService>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub leases: Arc<InMemoryLease>,
}

impl Harness {
    /// Build a harness whose generation service is produced by `script`.
    pub fn new(script: impl FnOnce(EventLog) -> ScriptedGenerationService) -> Self {
        let log = EventLog::default();
        Self {
            records: Arc::new(InMemoryRecordStore::new(log.clone())),
            generation: Arc::new(script(log.clone())),
            artifacts: Arc::new(InMemoryArtifactStore::new(log.clone())),
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
            leases: Arc::new(InMemoryLease::new(log.clone())),
            log,
        }
    }

    pub fn workflow(&self) -> ThumbnailWorkflow {
        self.workflow_with(WorkflowConfig::default())
    }

    pub fn workflow_with(&self, config: WorkflowConfig) -> ThumbnailWorkflow {
        ThumbnailWorkflow::new(
            self.records.clone(),
            self.generation.clone(),
            self.artifacts.clone(),
            self.checkpoints.clone(),
            self.leases.clone(),
            config,
        )
    }
}
