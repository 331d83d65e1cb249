use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use rollout::build::{ArtifactDescriptor, BuildGroup, BuildRunner, PlatformMatcher, Tagger};
use rollout::errors::RolloutError;
use rollout::fs::mock::MockFileSystem;
use rollout::types::{DigestSource, TagPolicy};
use rollout_test_utils::builders::descriptor;
use rollout_test_utils::{FakeBuilder, init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn group(config: &str, builder: &FakeBuilder, artifacts: Vec<ArtifactDescriptor>) -> BuildGroup {
    BuildGroup::new(
        config,
        artifacts,
        Arc::new(builder.clone()),
        Tagger::new(TagPolicy::Latest, None),
        PlatformMatcher::default(),
    )
}

fn runner(concurrency: usize) -> BuildRunner {
    BuildRunner::new(Arc::new(MockFileSystem::new()), concurrency)
}

fn names(built: &[rollout::build::BuiltArtifact]) -> Vec<&str> {
    built.iter().map(|b| b.image_name.as_str()).collect()
}

#[tokio::test]
async fn dependencies_finish_before_dependents_start() -> TestResult {
    init_tracing();
    let builder = FakeBuilder::new().with_delay(Duration::from_millis(20));
    let artifacts: Vec<ArtifactDescriptor> = vec![
        descriptor("app", &["base", "tools"]),
        descriptor("base", &[]),
        descriptor("tools", &[]),
    ];

    let built = with_timeout(runner(0).build_all(&[group("app", &builder, artifacts)], &CancellationToken::new())).await?;

    // Input order, full references.
    assert_eq!(names(&built), vec!["app", "base", "tools"]);
    assert_eq!(built[0].tag, "app:latest");

    let started = builder.started();
    assert_eq!(started.last().map(String::as_str), Some("app"));
    let finished = builder.finished();
    assert_eq!(finished.last().map(String::as_str), Some("app"));
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_is_respected() -> TestResult {
    init_tracing();
    let builder = FakeBuilder::new().with_delay(Duration::from_millis(15));
    let artifacts: Vec<ArtifactDescriptor> =
        ["a", "b", "c", "d", "e"].iter().map(|n| descriptor(n, &[])).collect();

    let built = with_timeout(runner(2).build_all(&[group("app", &builder, artifacts)], &CancellationToken::new())).await?;

    assert_eq!(built.len(), 5);
    assert!(builder.peak_concurrency() <= 2, "peak {}", builder.peak_concurrency());
    assert_eq!(builder.finished().len(), 5);
    Ok(())
}

#[tokio::test]
async fn first_failure_cancels_in_flight_builds() {
    init_tracing();
    let builder = FakeBuilder::new()
        .with_delay(Duration::from_secs(30))
        .with_delay_for("broken", Duration::from_millis(10))
        .failing(&["broken"]);
    let artifacts = vec![
        descriptor("broken", &[]),
        descriptor("slow", &[]),
        descriptor("needs-broken", &["broken"]),
    ];

    let err = with_timeout(runner(0).build_all(&[group("app", &builder, artifacts)], &CancellationToken::new()))
        .await
        .unwrap_err();

    match err {
        RolloutError::BackendExecution { backend, message, .. } => {
            assert_eq!(backend, "docker");
            assert!(message.contains("broken"), "{message}");
        }
        other => panic!("expected the build failure, got {other:?}"),
    }
    assert_eq!(builder.cancelled(), vec!["slow".to_string()]);
    assert!(!builder.started().contains(&"needs-broken".to_string()));
}

#[tokio::test]
async fn parent_cancellation_reaches_every_build() {
    init_tracing();
    let builder = FakeBuilder::new().with_delay(Duration::from_secs(30));
    let artifacts = vec![descriptor("a", &[]), descriptor("b", &[])];
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        })
    };

    let err = with_timeout(runner(0).build_all(&[group("app", &builder, artifacts)], &token))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled(), "{err:?}");
    let mut cancelled = builder.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn tag_source_skips_the_builder() -> TestResult {
    let builder = FakeBuilder::new();
    let artifacts = vec![descriptor("web", &[])];

    let built = runner(0)
        .with_digest_source(DigestSource::Tag)
        .build_all(&[group("web", &builder, artifacts)], &CancellationToken::new())
        .await?;

    assert_eq!(built[0].tag, "web:latest");
    assert!(builder.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn independent_configs_build_side_by_side() -> TestResult {
    init_tracing();
    let builder = FakeBuilder::new().with_delay(Duration::from_millis(200));
    let groups = vec![
        group("api", &builder, vec![descriptor("api", &[])]),
        group("web", &builder, vec![descriptor("web", &[])]),
    ];

    let built = with_timeout(runner(2).build_all(&groups, &CancellationToken::new())).await?;

    assert_eq!(names(&built), vec!["api", "web"]);
    assert_eq!(builder.peak_concurrency(), 2);
    Ok(())
}

#[tokio::test]
async fn run_wide_limit_spans_configs() -> TestResult {
    let builder = FakeBuilder::new().with_delay(Duration::from_millis(15));
    let groups = vec![
        group("api", &builder, vec![descriptor("a", &[]), descriptor("b", &[])]),
        group("web", &builder, vec![descriptor("c", &[]), descriptor("d", &[])]),
    ];

    let built = with_timeout(runner(1).build_all(&groups, &CancellationToken::new())).await?;

    assert_eq!(built.len(), 4);
    assert_eq!(builder.peak_concurrency(), 1);
    Ok(())
}

#[tokio::test]
async fn same_image_in_two_configs_is_rejected() {
    let builder = FakeBuilder::new();
    let groups = vec![
        group("api", &builder, vec![descriptor("shared", &[])]),
        group("web", &builder, vec![descriptor("shared", &[])]),
    ];

    let err = runner(0)
        .build_all(&groups, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RolloutError::ConfigError(_)), "{err:?}");
    assert!(builder.started().is_empty());
}
