use super::*;
use crate::api::SavingsTarget;
use crate::config::Credentials;
use crate::dispatcher::Dispatcher;
use crate::error::ErrorKind;
use crate::transport::FakeTransport;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

const BASE_URL: &str = "https://better.example/api/v1";

fn poller(fake: &FakeTransport, max_attempts: u32) -> JobPoller<FakeTransport> {
    let client = ApiClient::new(Dispatcher::new(
        Credentials::new("token", BASE_URL),
        fake.clone(),
    ));
    JobPoller::new(client, PollPolicy::new(10, max_attempts).unwrap())
}

fn nominal(min_r_squared: f64) -> AnalysisParams {
    AnalysisParams::new(SavingsTarget::Nominal, min_r_squared).unwrap()
}

fn submitted(id: u64) -> Value {
    json!({"id": id, "generation_result": "IN_PROGRESS"})
}

fn status(result: &str) -> Value {
    json!({"id": 55, "generation_result": result})
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Submitted(String),
    Status(u32, String),
    Error(u32, ErrorKind),
    Started(u64),
    Finished(u64, JobState),
}

#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl RecordingSink {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_job_started(&self, building_id: u64) {
        self.seen.lock().push(Seen::Started(building_id));
    }

    fn on_job_finished(&self, report: &JobReport) {
        self.seen.lock().push(Seen::Finished(report.building_id, report.state));
    }

    fn on_submitted(&self, _handle: &JobHandle, initial: &GenerationResult) {
        self.seen.lock().push(Seen::Submitted(initial.to_string()));
    }

    fn on_poll_attempt(&self, attempt: u32, _max_attempts: u32, event: PollEvent<'_>) {
        let entry = match event {
            PollEvent::Status(snapshot) => {
                Seen::Status(attempt, snapshot.generation_result().to_string())
            }
            PollEvent::Error(error) => Seen::Error(attempt, error.kind()),
        };
        self.seen.lock().push(entry);
    }
}

#[test]
fn policy_rejects_zero_values() {
    assert_eq!(PollPolicy::new(0, 5), Err(ParameterError::ZeroPollInterval));
    assert_eq!(PollPolicy::new(10, 0), Err(ParameterError::ZeroMaxAttempts));
    let policy = PollPolicy::new(10, 30).unwrap();
    assert_eq!(policy.interval(), Duration::from_secs(10));
    assert_eq!(policy.max_attempts(), 30);
}

#[test]
fn policy_from_default_config() {
    let policy = PollPolicy::from_config(&PollingConfig::default()).unwrap();
    assert_eq!(policy, PollPolicy::new(10, 30).unwrap());
}

#[tokio::test(start_paused = true)]
async fn building_101_completes_on_the_third_query() {
    let fake = FakeTransport::new();
    let complete = json!({
        "id": 55,
        "generation_result": "COMPLETE",
        "savings_target": "NOMINAL",
        "assessment": {"assessment_results": {"energy_savings_combined": 12000.5}},
        "inverse_model": {"ELECTRICITY": {"r2": 0.93, "cvrmse": 0.07}}
    });
    fake.respond_json(201, &submitted(55))
        .respond_json(200, &status("IN_PROGRESS"))
        .respond_json(200, &status("IN_PROGRESS"))
        .respond_json(200, &complete);

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.polls, 3);
    assert_eq!(report.handle, Some(JobHandle::new(101, "55")));
    assert_eq!(report.snapshot().unwrap().payload(), &complete);

    let requests = fake.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].url, format!("{}/buildings/101/analytics/", BASE_URL));
    assert_eq!(
        requests[0].body,
        Some(json!({
            "savings_target": "NOMINAL",
            "min_model_r_squared": 0.6,
            "benchmark_data_type": "DEFAULT"
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn every_query_uses_the_same_handle() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .respond_json(200, &status("IN_PROGRESS"))
        .fail("connection reset")
        .respond_json(200, &status("COMPLETE"));

    poller(&fake, 10).submit_and_poll(101, &nominal(0.6)).await;

    let queries: Vec<_> = fake.requests().into_iter().skip(1).collect();
    assert_eq!(queries.len(), 3);
    for query in queries {
        assert_eq!(query.url, format!("{}/buildings/101/analytics/55/", BASE_URL));
        assert!(query.body.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn synchronous_rejection_skips_polling() {
    let fake = FakeTransport::new();
    fake.respond_json(
        201,
        &json!({"id": 9, "generation_result": "FAILED", "generation_message": "No utility bills"}),
    );

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.polls, 0);
    assert_eq!(
        report.snapshot().unwrap().generation_message(),
        Some("No utility bills")
    );
    assert_eq!(fake.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_submission_is_unexpected_without_polling() {
    let fake = FakeTransport::new();
    fake.respond(
        400,
        r#"{"min_model_r_squared": ["Ensure this value is less than or equal to 1."]}"#,
    );

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Unexpected);
    assert_eq!(report.handle, None);
    match &report.outcome {
        JobOutcome::Rejected(SubmissionError::Request(error)) => {
            assert_eq!(error.status_code(), Some(400));
        }
        other => panic!("expected rejected submission, got {:?}", other),
    }
    assert_eq!(fake.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn submission_without_an_id_is_unexpected() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &json!({"generation_result": "IN_PROGRESS"}));

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Unexpected);
    assert_eq!(
        report.outcome,
        JobOutcome::Rejected(SubmissionError::MissingJobId {
            body: Some(json!({"generation_result": "IN_PROGRESS"}))
        })
    );
    assert_eq!(fake.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_submission_body_is_unexpected() {
    let fake = FakeTransport::new();
    fake.respond(201, "");

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Rejected(SubmissionError::MissingJobId { body: None })
    );
}

#[tokio::test(start_paused = true)]
async fn submission_without_status_enters_the_poll_loop() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &json!({"id": 55}))
        .respond_json(200, &status("COMPLETE"));

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.polls, 1);
}

#[tokio::test(start_paused = true)]
async fn submission_already_complete_needs_no_polling() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &status("COMPLETE"));

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.polls, 0);
    assert_eq!(fake.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn complete_on_attempt_k_stops_at_k() {
    for k in 1..=5u32 {
        let fake = FakeTransport::new();
        fake.respond_json(201, &submitted(55));
        for _ in 1..k {
            fake.respond_json(200, &status("IN_PROGRESS"));
        }
        fake.respond_json(200, &status("COMPLETE"));
        // Anything queried past the terminal status would consume these.
        fake.respond_json(200, &status("IN_PROGRESS"));
        fake.respond_json(200, &status("IN_PROGRESS"));

        let report = poller(&fake, 5).submit_and_poll(101, &nominal(0.6)).await;

        assert_eq!(report.state, JobState::Complete, "k = {}", k);
        assert_eq!(report.polls, k);
        assert_eq!(fake.request_count(), 1 + k as usize);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_status_captures_the_message() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .respond_json(200, &status("IN_PROGRESS"))
        .respond_json(
            200,
            &json!({"generation_result": "FAILED", "generation_message": "Model fit too poor"}),
        );

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.polls, 2);
    assert_eq!(
        report.snapshot().unwrap().generation_message(),
        Some("Model fit too poor")
    );
}

#[tokio::test(start_paused = true)]
async fn exhausting_attempts_returns_the_last_in_progress_snapshot() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55));
    for step in 1..=4 {
        fake.respond_json(200, &json!({"generation_result": "IN_PROGRESS", "step": step}));
    }

    let report = poller(&fake, 4).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::TimedOut);
    assert_eq!(report.polls, 4);
    assert_eq!(
        report.snapshot().unwrap().payload(),
        &json!({"generation_result": "IN_PROGRESS", "step": 4})
    );
    assert_eq!(report.last_error, None);
    assert_eq!(fake.request_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn unrecognized_status_stops_immediately() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .respond_json(200, &status("IN_PROGRESS"))
        .respond_json(200, &status("PAUSED"))
        .respond_json(200, &status("COMPLETE"));

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Unexpected);
    assert_eq!(report.polls, 2);
    assert_eq!(
        report.snapshot().unwrap().generation_result(),
        &GenerationResult::Unknown(Some("PAUSED".to_string()))
    );
    assert_eq!(fake.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn status_without_generation_result_is_unexpected() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .respond_json(200, &json!({"id": 55}));

    let report = poller(&fake, 30).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Unexpected);
    assert_eq!(report.polls, 1);
}

#[tokio::test(start_paused = true)]
async fn building_202_never_obtains_data() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(77));
    for _ in 0..5 {
        fake.fail("connection refused");
    }

    let report = poller(&fake, 5).submit_and_poll(202, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::TimedOut);
    assert_eq!(report.outcome, JobOutcome::NoDataObtained);
    assert_eq!(report.polls, 5);
    assert_eq!(
        report.last_error,
        Some(RequestError::transport("connection refused"))
    );
    assert_eq!(fake.request_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn query_failures_are_retried() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .respond(503, "Service Unavailable")
        .fail("timed out")
        .respond_json(200, &status("COMPLETE"));

    let sink = RecordingSink::default();
    let report = poller(&fake, 30)
        .with_sink(sink.clone())
        .submit_and_poll(101, &nominal(0.6))
        .await;

    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.polls, 3);
    assert_eq!(
        sink.seen(),
        vec![
            Seen::Submitted("IN_PROGRESS".to_string()),
            Seen::Error(1, ErrorKind::Http),
            Seen::Error(2, ErrorKind::Transport),
            Seen::Status(3, "COMPLETE".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_last_snapshot_even_after_later_errors() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .respond_json(200, &status("IN_PROGRESS"))
        .fail("connection refused")
        .fail("connection refused");

    let report = poller(&fake, 3).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::TimedOut);
    assert_eq!(report.snapshot().unwrap().payload(), &status("IN_PROGRESS"));
    assert_eq!(report.last_error.unwrap().kind(), ErrorKind::Transport);
}

#[tokio::test(start_paused = true)]
async fn early_error_is_cleared_once_the_service_answers() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55)).fail("connection reset");
    for _ in 0..4 {
        fake.respond_json(200, &status("IN_PROGRESS"));
    }

    let report = poller(&fake, 5).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::TimedOut);
    assert_eq!(report.polls, 5);
    assert_eq!(report.last_error, None);
    let text = crate::summary::AnalysisSummary::new(&report).render();
    assert!(!text.contains("Last error"));
}

#[tokio::test(start_paused = true)]
async fn error_before_completion_does_not_ride_along() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55))
        .fail("connection reset")
        .respond_json(200, &status("COMPLETE"));

    let report = poller(&fake, 5).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.polls, 2);
    assert_eq!(report.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn waits_one_interval_between_queries_and_none_after_the_last() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55));
    for _ in 0..3 {
        fake.respond_json(200, &status("IN_PROGRESS"));
    }

    let started = tokio::time::Instant::now();
    let report = poller(&fake, 3).submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(20), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(30), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_polling() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55));

    let poller = poller(&fake, 30);
    poller.cancellation_token().cancel();
    let report = poller.submit_and_poll(101, &nominal(0.6)).await;

    assert_eq!(report.state, JobState::Cancelled);
    assert_eq!(report.polls, 0);
    assert_eq!(report.outcome, JobOutcome::NoDataObtained);
    assert_eq!(fake.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_waiting() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(55));
    for _ in 0..30 {
        fake.respond_json(200, &status("IN_PROGRESS"));
    }

    let token = CancellationToken::new();
    let poller = poller(&fake, 30).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
    });
    let report = poller.submit_and_poll(101, &nominal(0.6)).await;
    canceller.await.unwrap();

    assert_eq!(report.state, JobState::Cancelled);
    assert_eq!(report.polls, 2);
    assert_eq!(report.snapshot().unwrap().payload(), &status("IN_PROGRESS"));
}

#[tokio::test(start_paused = true)]
async fn sequence_runs_each_building_in_order() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(1))
        .respond_json(200, &status("COMPLETE"))
        .respond(404, r#"{"detail": "Not found."}"#)
        .respond_json(201, &submitted(3))
        .respond_json(200, &status("IN_PROGRESS"))
        .respond_json(200, &status("FAILED"));

    let reports = poller(&fake, 30)
        .run_sequence(&[101, 102, 103], &nominal(0.6))
        .await;

    let states: Vec<_> = reports.iter().map(|r| (r.building_id, r.state)).collect();
    assert_eq!(
        states,
        vec![
            (101, JobState::Complete),
            (102, JobState::Unexpected),
            (103, JobState::Failed),
        ]
    );
    let urls: Vec<_> = fake.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/buildings/101/analytics/", BASE_URL),
            format!("{}/buildings/101/analytics/1/", BASE_URL),
            format!("{}/buildings/102/analytics/", BASE_URL),
            format!("{}/buildings/103/analytics/", BASE_URL),
            format!("{}/buildings/103/analytics/3/", BASE_URL),
            format!("{}/buildings/103/analytics/3/", BASE_URL),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn sequence_reports_each_job_to_the_sink() {
    let fake = FakeTransport::new();
    fake.respond_json(201, &submitted(1))
        .respond_json(200, &status("COMPLETE"))
        .respond_json(400, &json!({"detail": "no bills"}));

    let sink = RecordingSink::default();
    let reports = poller(&fake, 30)
        .with_sink(sink.clone())
        .run_sequence(&[101, 102], &nominal(0.6))
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(
        sink.seen(),
        vec![
            Seen::Started(101),
            Seen::Submitted("IN_PROGRESS".to_string()),
            Seen::Status(1, "COMPLETE".to_string()),
            Seen::Finished(101, JobState::Complete),
            Seen::Started(102),
            Seen::Finished(102, JobState::Unexpected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn polls_an_existing_job() {
    let fake = FakeTransport::new();
    fake.respond_json(200, &status("COMPLETE"));

    let handle = JobHandle::new(101, "55");
    let report = poller(&fake, 30).poll(&handle).await;

    assert_eq!(report.state, JobState::Complete);
    assert_eq!(report.handle, Some(handle));
    assert_eq!(fake.request_count(), 1);
}
