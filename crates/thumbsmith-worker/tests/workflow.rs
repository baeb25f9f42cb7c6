use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use thumbsmith_core::models::{
    GenerationJob, GenerationRequest, JobStatus, RunStatus, UploadedArtifact, WorkflowCheckpoint,
    WorkflowStep,
};
use thumbsmith_core::{ErrorKind, WorkflowError};
use thumbsmith_generation::GenerationClientError;
use thumbsmith_worker::testing::{job, Event, Harness, ScriptedGenerationService};

fn request() -> GenerationRequest {
    GenerationRequest::new("u1", "v1", "a red fox in the snow")
}

fn succeeded(output: serde_json::Value) -> Harness {
    Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Succeeded, Some(output)), log)
    })
}

fn is_delete(e: &Event) -> bool {
    matches!(e, Event::Delete(_))
}

fn is_swap(e: &Event) -> bool {
    matches!(e, Event::SwapArtifact { .. })
}

/// One poll before the job succeeds, so a run parks in Poll for an interval.
fn succeeds_after_one_poll() -> Harness {
    Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Processing, None), log).then(job(
            "p1",
            JobStatus::Succeeded,
            Some(json!("https://img/x.png")),
        ))
    })
}

#[tokio::test]
async fn first_thumbnail_is_committed_without_cleanup() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", None);

    let outcome = h.workflow().run(request()).await.unwrap();

    let record = h.records.get("v1").unwrap();
    assert_eq!(record.current_artifact_url.as_deref(), Some("https://img/x.png"));
    assert_eq!(record.current_artifact_key.as_deref(), Some(outcome.artifact.key.as_str()));
    assert_eq!(h.log.count(is_delete), 0);
    assert_eq!(h.generation.poll_count(), 0);
    assert!(outcome.cleanup_error.is_none());
}

#[tokio::test]
async fn previous_thumbnail_is_deleted_after_commit() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", Some("old-key"));
    h.artifacts.put("old-key", "https://cdn.test/old-key");

    let outcome = h.workflow().run(request()).await.unwrap();

    assert_eq!(
        h.log.count(|e| *e == Event::Delete("old-key".to_string())),
        1
    );
    assert_eq!(h.log.count(is_delete), 1);
    let swap_at = h.log.position(is_swap).unwrap();
    let delete_at = h.log.position(is_delete).unwrap();
    assert!(swap_at < delete_at, "delete happened before commit: {:?}", h.log.events());

    let record = h.records.get("v1").unwrap();
    assert_ne!(record.current_artifact_key.as_deref(), Some("old-key"));
    assert_eq!(record.current_artifact_key, Some(outcome.artifact.key));
    assert!(!h.artifacts.contains("old-key"));
}

#[tokio::test(start_paused = true)]
async fn polls_until_the_job_succeeds() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Processing, None), log)
            .then(job("p1", JobStatus::Processing, None))
            .then(job(
                "p1",
                JobStatus::Succeeded,
                Some(json!([{ "url": "https://img/y.png" }])),
            ))
    });
    h.records.insert("v1", "u1", None);

    let outcome = h.workflow().run(request()).await.unwrap();

    assert_eq!(outcome.artifact.url, "https://img/y.png");
    assert_eq!(h.generation.poll_count(), 2);
    assert_eq!(
        h.log.count(|e| *e == Event::GetJob("p1".to_string())),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_job_times_out_within_poll_budget() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Processing, None), log)
    });
    h.records.insert("v1", "u1", Some("old-key"));

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    let polls = h.generation.poll_count();
    assert!(polls > 0 && polls <= 40, "issued {} polls", polls);
    assert_eq!(h.log.count(|e| matches!(e, Event::Ingest(_))), 0);
    assert_eq!(h.log.count(is_swap), 0);
    assert_eq!(
        h.records.get("v1").unwrap().current_artifact_key.as_deref(),
        Some("old-key")
    );
}

#[tokio::test]
async fn record_of_another_owner_is_not_found_before_any_external_call() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u2", Some("old-key"));

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!h.log.has_external_calls(), "{:?}", h.log.events());
    let leased_at = h.log.position(|e| matches!(e, Event::AcquireLease(_))).unwrap();
    let loaded_at = h.log.position(|e| matches!(e, Event::LoadRecord(_))).unwrap();
    assert!(leased_at < loaded_at);
    assert!(h.leases.holder("v1").is_none());
}

#[tokio::test]
async fn create_job_uses_fixed_geometry() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", None);

    h.workflow().run(request()).await.unwrap();

    let params = h
        .log
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::CreateJob(params) => Some(params),
            _ => None,
        })
        .unwrap();
    assert_eq!(params.prompt, "a red fox in the snow");
    assert_eq!((params.width, params.height, params.num_outputs), (1792, 1024, 1));
}

#[tokio::test]
async fn output_without_a_url_fails_with_no_output() {
    for output in [json!({}), json!(null), json!([]), json!({ "url": "ftp://x" })] {
        let h = succeeded(output.clone());
        h.records.insert("v1", "u1", Some("old-key"));

        let err = h.workflow().run(request()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoOutput, "output {}", output);
        assert_eq!(h.log.count(|e| matches!(e, Event::Ingest(_))), 0);
        assert_eq!(
            h.records.get("v1").unwrap().current_artifact_key.as_deref(),
            Some("old-key")
        );
    }
}

#[tokio::test]
async fn failed_job_reports_upstream_reason() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(
            GenerationJob {
                id: "p1".to_string(),
                status: JobStatus::Failed,
                output: None,
                error: Some("NSFW content detected".to_string()),
            },
            log,
        )
    });
    h.records.insert("v1", "u1", None);

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(
        err,
        WorkflowError::GenerationFailed {
            reason: "NSFW content detected".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn canceled_job_without_reason_gets_generic_message() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Starting, None), log)
            .then(job("p1", JobStatus::Canceled, None))
    });
    h.records.insert("v1", "u1", None);

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(
        err,
        WorkflowError::GenerationFailed {
            reason: "Image generation failed".to_string()
        }
    );
}

#[tokio::test]
async fn rejected_create_is_upstream_unavailable() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::failing_create(
            GenerationClientError::Status {
                status: 503,
                body: "overloaded".to_string(),
            },
            log,
        )
    });
    h.records.insert("v1", "u1", None);

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(err.message().starts_with("Replicate create failed"));
    assert!(err.message().contains("overloaded"));
}

#[tokio::test(start_paused = true)]
async fn poll_transport_error_is_upstream_unavailable() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Queued, None), log)
            .then_fail(GenerationClientError::Transport("connection reset".to_string()))
    });
    h.records.insert("v1", "u1", None);

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(err.message().starts_with("Replicate poll failed"));
}

#[tokio::test(start_paused = true)]
async fn unknown_upstream_status_is_a_protocol_error() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Processing, None), log)
            .then_fail(GenerationClientError::UnrecognizedStatus("paused".to_string()))
    });
    h.records.insert("v1", "u1", None);

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(err, WorkflowError::UnrecognizedStatus("paused".to_string()));
}

#[tokio::test]
async fn ingest_failures_are_upload_failed() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", Some("old-key"));
    h.artifacts.fail_ingest();
    let err = h.workflow().run(request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UploadFailed);
    assert_eq!(h.log.count(is_swap), 0);

    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", Some("old-key"));
    h.artifacts.empty_ingest();
    let err = h.workflow().run(request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UploadFailed);
    assert_eq!(h.log.count(is_swap), 0);
    assert_eq!(h.log.count(is_delete), 0);
}

#[tokio::test]
async fn concurrent_modification_leaves_record_and_old_artifact_alone() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", Some("old-key"));
    h.artifacts.put("old-key", "https://cdn.test/old-key");
    h.records.reject_commits();

    let err = h.workflow().run(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConcurrentModification);
    assert_eq!(h.log.count(is_delete), 0);
    assert!(h.artifacts.contains("old-key"));
    assert!(h.artifacts.contains("thumbnails/generated-1.png"));
    assert_eq!(
        h.records.get("v1").unwrap().current_artifact_key.as_deref(),
        Some("old-key")
    );
}

#[tokio::test]
async fn cleanup_failure_does_not_fail_the_run() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", Some("old-key"));
    h.artifacts.fail_delete();

    let outcome = h.workflow().run(request()).await.unwrap();

    assert!(outcome.cleanup_error.unwrap().contains("old-key"));
    assert_eq!(
        h.records.get("v1").unwrap().current_artifact_url.as_deref(),
        Some("https://img/x.png")
    );
    let checkpoint = h.checkpoints.get(outcome.run_id).unwrap();
    assert_eq!(checkpoint.status, RunStatus::Completed);
}

#[tokio::test]
async fn checkpoint_tracks_completion_and_lease_is_released() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", None);

    let outcome = h.workflow().run(request()).await.unwrap();

    let checkpoint = h.checkpoints.get(outcome.run_id).unwrap();
    assert_eq!(checkpoint.step, WorkflowStep::Done);
    assert_eq!(checkpoint.status, RunStatus::Completed);
    assert_eq!(checkpoint.state.output_url.as_deref(), Some("https://img/x.png"));
    assert!(h.leases.holder("v1").is_none());
    assert_eq!(h.log.count(|e| matches!(e, Event::ReleaseLease(_))), 1);
    // Renewed once per step, LoadTarget through Cleanup.
    assert_eq!(h.log.count(|e| matches!(e, Event::RenewLease(_))), 7);
}

#[tokio::test]
async fn failed_run_is_recorded_and_not_replayed() {
    let h = succeeded(json!({}));
    h.records.insert("v1", "u1", None);
    let workflow = h.workflow();

    let run_id = workflow.start(request()).await.unwrap();
    let err = workflow.resume(run_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoOutput);

    let checkpoint = h.checkpoints.get(run_id).unwrap();
    assert_eq!(checkpoint.status, RunStatus::Failed);
    assert_eq!(checkpoint.step, WorkflowStep::Extract);
    assert_eq!(checkpoint.failure.as_ref().unwrap().kind, ErrorKind::NoOutput);

    let calls = h.log.events().len();
    let again = workflow.resume(run_id).await.unwrap_err();
    assert_eq!(again, err);
    assert_eq!(h.log.events().len(), calls);
}

#[tokio::test]
async fn resume_continues_from_persisted_step() {
    let h = succeeded(json!("https://img/unused.png"));
    h.records.insert("v1", "u1", Some("old-key"));

    let mut checkpoint = WorkflowCheckpoint::new(request());
    checkpoint.state.previous_artifact_key = Some("old-key".to_string());
    checkpoint.state.job = Some(job("p1", JobStatus::Succeeded, Some(json!("https://img/z.png"))));
    checkpoint.state.output_url = Some("https://img/z.png".to_string());
    checkpoint.step = WorkflowStep::Upload;
    checkpoint.mark_running();
    h.checkpoints.insert(checkpoint.clone());

    let outcome = h.workflow().resume(checkpoint.run_id).await.unwrap();

    assert_eq!(outcome.artifact.url, "https://img/z.png");
    assert_eq!(h.log.count(|e| matches!(e, Event::CreateJob(_) | Event::LoadRecord(_))), 0);
    assert_eq!(h.log.count(|e| *e == Event::Delete("old-key".to_string())), 1);
    assert_eq!(h.log.count(|e| matches!(e, Event::AcquireLease(_))), 1);
}

#[tokio::test]
async fn replayed_commit_never_deletes_the_new_artifact() {
    let h = succeeded(json!("https://img/unused.png"));
    let artifact = UploadedArtifact {
        key: "thumbnails/new.png".to_string(),
        url: "https://cdn.test/thumbnails/new.png".to_string(),
    };
    // The commit landed but the process died before the checkpoint moved on.
    h.records.insert("v1", "u1", Some("thumbnails/new.png"));

    let mut checkpoint = WorkflowCheckpoint::new(request());
    checkpoint.state.previous_artifact_key = Some("thumbnails/new.png".to_string());
    checkpoint.state.artifact = Some(artifact);
    checkpoint.step = WorkflowStep::Commit;
    h.checkpoints.insert(checkpoint.clone());

    h.workflow().resume(checkpoint.run_id).await.unwrap();

    assert_eq!(h.log.count(is_delete), 0);
}

#[tokio::test(start_paused = true)]
async fn resumed_poll_honours_budget_spent_before_the_crash() {
    let h = Harness::new(|log| {
        ScriptedGenerationService::new(job("p1", JobStatus::Processing, None), log)
    });
    h.records.insert("v1", "u1", None);

    let mut checkpoint = WorkflowCheckpoint::new(request());
    checkpoint.state.job = Some(job("p1", JobStatus::Processing, None));
    checkpoint.state.job_created_at = Some(Utc::now() - ChronoDuration::minutes(2));
    checkpoint.step = WorkflowStep::Poll;
    h.checkpoints.insert(checkpoint.clone());

    let err = h.workflow().resume(checkpoint.run_id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.generation.poll_count(), 0);
}

#[tokio::test]
async fn busy_record_is_rejected_before_generation() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", Some("old-key"));
    let other_run = Uuid::new_v4();
    h.leases.hold("v1", other_run);
    let workflow = h.workflow();
    let run_id = workflow.start(request()).await.unwrap();

    let err = workflow.resume(run_id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RecordBusy);
    assert_eq!(h.log.count(|e| matches!(e, Event::LoadRecord(_) | Event::CreateJob(_))), 0);
    assert_eq!(h.leases.holder("v1"), Some(other_run));
    assert_eq!(h.checkpoints.get(run_id).unwrap().status, RunStatus::Failed);
    assert_eq!(
        h.records.get("v1").unwrap().current_artifact_key.as_deref(),
        Some("old-key")
    );
}

#[tokio::test]
async fn resume_of_unknown_run_is_not_found() {
    let h = succeeded(json!("https://img/x.png"));
    let err = h.workflow().resume(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn two_drivers_of_one_run_produce_one_artifact() {
    let h = succeeds_after_one_poll();
    h.records.insert("v1", "u1", Some("old-key"));
    let (a, b) = (h.workflow(), h.workflow());
    let run_id = a.start(request()).await.unwrap();

    let (first, second) = tokio::join!(a.resume(run_id), b.resume(run_id));

    let (outcome, err) = match (first, second) {
        (Ok(outcome), Err(err)) | (Err(err), Ok(outcome)) => (outcome, err),
        other => panic!("expected exactly one driver to finish: {:?}", other),
    };
    assert_eq!(err.kind(), ErrorKind::RecordBusy);
    assert_eq!(h.log.count(|e| matches!(e, Event::CreateJob(_))), 1);
    assert_eq!(h.log.count(|e| matches!(e, Event::Ingest(_))), 1);

    let checkpoint = h.checkpoints.get(run_id).unwrap();
    assert_eq!(checkpoint.status, RunStatus::Completed);
    assert_eq!(
        h.records.get("v1").unwrap().current_artifact_key,
        Some(outcome.artifact.key)
    );
    assert!(h.leases.holder("v1").is_none());
}

#[tokio::test]
async fn run_driven_by_another_process_is_left_untouched() {
    let h = succeeded(json!("https://img/x.png"));
    h.records.insert("v1", "u1", None);
    let workflow = h.workflow();
    let run_id = workflow.start(request()).await.unwrap();
    h.leases.hold("v1", run_id);

    let err = workflow.resume(run_id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RecordBusy);
    assert_eq!(h.checkpoints.get(run_id).unwrap().status, RunStatus::Pending);
    assert_eq!(h.log.count(|e| matches!(e, Event::LoadRecord(_))), 0);
    assert_eq!(h.leases.holder("v1"), Some(run_id));
}

#[tokio::test(start_paused = true)]
async fn run_stops_without_writing_once_its_lease_is_taken() {
    let h = succeeds_after_one_poll();
    h.records.insert("v1", "u1", Some("old-key"));
    let workflow = h.workflow();
    let run_id = workflow.start(request()).await.unwrap();
    let usurper = Uuid::new_v4();

    let (result, ()) = tokio::join!(workflow.resume(run_id), async {
        // Lands while the run waits out its first poll interval.
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.leases.hold("v1", usurper);
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::RecordBusy);
    assert_eq!(h.log.count(|e| matches!(e, Event::Ingest(_))), 0);
    assert_eq!(h.log.count(is_swap), 0);

    let checkpoint = h.checkpoints.get(run_id).unwrap();
    assert_eq!(checkpoint.status, RunStatus::Running);
    assert_eq!(checkpoint.step, WorkflowStep::Poll);
    assert_eq!(h.leases.holder("v1"), Some(usurper));
    assert_eq!(
        h.records.get("v1").unwrap().current_artifact_key.as_deref(),
        Some("old-key")
    );
}
