//! Job outcome counters, read back through a local Prometheus recorder

use std::future::Future;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use domain_submission::telemetry::{JOB_OUTCOMES, JOB_TRIES};
use domain_submission::{RetryPolicies, RetryPolicy};
use test_utils::{PayloadFixtures, ReplyFixtures, ScriptedBackend, TestPipelineBuilder};

/// Runs `scenario` on a current-thread runtime with a recorder installed
/// for this thread only, and returns the rendered exposition
fn render_after<F, Fut>(scenario: F) -> String
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    metrics::with_local_recorder(&recorder, || runtime.block_on(scenario()));
    handle.render()
}

/// Value of the counter line carrying every one of `labels`
fn counter(rendered: &str, name: &str, labels: &[(&str, &str)]) -> u64 {
    rendered
        .lines()
        .filter(|line| line.starts_with(name))
        .find(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

#[test]
fn test_retry_then_success_counts_each_outcome() {
    let rendered = render_after(|| async {
        let backend = ScriptedBackend::new().script_claims([ReplyFixtures::timeout()]);
        let pipeline = TestPipelineBuilder::new().backend(backend).build();
        pipeline.submit(PayloadFixtures::full(0)).await.unwrap();
        pipeline.drain().await.unwrap();
    });

    let claim = ("job_class", "submit_claim");
    assert_eq!(counter(&rendered, JOB_TRIES, &[claim]), 2);
    assert_eq!(
        counter(&rendered, JOB_OUTCOMES, &[claim, ("outcome", "retryable")]),
        1
    );
    assert_eq!(
        counter(&rendered, JOB_OUTCOMES, &[claim, ("outcome", "success")]),
        1
    );
    assert_eq!(
        counter(
            &rendered,
            JOB_OUTCOMES,
            &[("job_class", "submit_ancillary_form_a"), ("outcome", "success")]
        ),
        1
    );
}

#[test]
fn test_terminal_failures_are_counted() {
    let rendered = render_after(|| async {
        let backend = ScriptedBackend::new()
            .claims_fallback(ReplyFixtures::timeout())
            .script_claims([ReplyFixtures::duplicate_claim()]);
        let policy = RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(1));
        let pipeline = TestPipelineBuilder::new()
            .backend(backend)
            .policies(RetryPolicies {
                primary: policy,
                ancillary: policy,
            })
            .build();
        // First submission hits the duplicate, the second times out twice
        pipeline.submit(PayloadFixtures::core_only()).await.unwrap();
        pipeline.drain().await.unwrap();
        pipeline.submit(PayloadFixtures::core_only()).await.unwrap();
        pipeline.drain().await.unwrap();
    });

    let claim = ("job_class", "submit_claim");
    assert_eq!(counter(&rendered, JOB_TRIES, &[claim]), 3);
    assert_eq!(
        counter(&rendered, JOB_OUTCOMES, &[claim, ("outcome", "non_retryable")]),
        1
    );
    assert_eq!(
        counter(&rendered, JOB_OUTCOMES, &[claim, ("outcome", "retryable")]),
        1
    );
    assert_eq!(
        counter(&rendered, JOB_OUTCOMES, &[claim, ("outcome", "exhausted")]),
        1
    );
}
