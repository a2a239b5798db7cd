mod common;

use common::*;
use cwbridge::application::collector::ScrapeParams;
use cwbridge::domain::errors::{AuthError, ScrapeError, ValidationError};
use cwbridge::infrastructure::mock::{MockMonitoringApi, MockRoleAssumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_literal_dimension_scrape() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let api = Arc::new(MockMonitoringApi::new());
    api.set_points("abc", vec![(recent(), 42.0)]);
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let collector = factory.new_collector(&params("tgt1", "t1"), settings)?;
    let outcome = collector.collect(deadline()).await?;

    assert_eq!(outcome.samples.len(), 1);
    let sample = &outcome.samples[0];
    assert_eq!(sample.name, "ns_m");
    assert_eq!(
        sample.labels,
        vec![
            ("target".to_string(), "tgt1".to_string()),
            ("Id".to_string(), "abc".to_string()),
        ]
    );
    assert_eq!(sample.value, 42.0);
    assert_eq!(api.calls(), 1);
    assert_eq!(outcome.stats.remote_calls, 1);

    let sessions = api.sessions();
    assert_eq!(sessions[0].region, "us-east-1");
    assert_eq!(sessions[0].access_key_id, "AKIDBASE");
    Ok(())
}

#[tokio::test]
async fn test_discovery_yields_one_query_per_instance() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    api.set_instances(vec![
        instance(&[("Id", "i-3")]),
        instance(&[("Id", "i-1")]),
        instance(&[("Id", "i-2")]),
    ]);
    for (id, value) in [("i-3", 3.0), ("i-1", 1.0), ("i-2", 2.0)] {
        api.set_points(id, vec![(recent(), value)]);
    }
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "*""#));

    let outcome = factory
        .new_collector(&params("tgt1", "t1"), settings)?
        .collect(deadline())
        .await?;

    let ids: Vec<&str> = outcome
        .samples
        .iter()
        .map(|s| s.label("Id").unwrap_or_default())
        .collect();
    assert_eq!(ids, vec!["i-3", "i-1", "i-2"]);
    assert_eq!(api.discovery_requests().len(), 1);
    // One ListMetrics call plus one batched GetMetricData call
    assert_eq!(api.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_role_failure_aborts_scrape() {
    let api = Arc::new(MockMonitoringApi::new());
    api.set_points("abc", vec![(recent(), 42.0)]);
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::failing("AccessDenied")));
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let mut request = params("tgt1", "t1");
    request.role_arn = Some(READER_ROLE.to_string());
    let result = factory
        .new_collector(&request, settings)
        .unwrap()
        .collect(deadline())
        .await;

    assert!(matches!(
        result,
        Err(ScrapeError::Auth(AuthError::AssumeRole { .. }))
    ));
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn test_assumed_role_credentials_are_used() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    api.set_points("abc", vec![(recent(), 1.0)]);
    let assumer = Arc::new(MockRoleAssumer::succeeding());
    let factory = factory(api.clone(), assumer.clone());
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    // Account alias from [roles.accounts]
    let mut request = params("tgt1", "t1");
    request.role_arn = Some("prod".to_string());
    factory
        .new_collector(&request, settings)?
        .collect(deadline())
        .await?;

    assert_eq!(assumer.calls(), 1);
    assert!(
        factory
            .metrics()
            .render()
            .contains("cloudwatch_requests_total 1")
    );
    let session = &api.sessions()[0];
    assert_eq!(session.role_arn.as_deref(), Some(READER_ROLE));
    assert_eq!(session.access_key_id, "ASIA-Reader");
    Ok(())
}

#[tokio::test]
async fn test_missing_or_unknown_task_makes_no_calls() {
    let api = Arc::new(MockMonitoringApi::new());
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let missing = ScrapeParams {
        target: Some("tgt1".to_string()),
        ..ScrapeParams::default()
    };
    let err = factory.new_collector(&missing, settings.clone()).err();
    assert_eq!(err, Some(ValidationError::MissingParameter { field: "task" }));

    let err = factory
        .new_collector(&params("tgt1", "rds"), settings)
        .err();
    assert_eq!(
        err,
        Some(ValidationError::UnknownTask {
            task: "rds".to_string()
        })
    );
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn test_no_points_in_window_yields_no_samples() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    let stale = chrono::Utc::now() - chrono::Duration::hours(2);
    api.set_points("abc", vec![(stale, 5.0)]);
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let outcome = factory
        .new_collector(&params("tgt1", "t1"), settings)?
        .collect(deadline())
        .await?;

    assert!(outcome.samples.is_empty());
    assert_eq!(outcome.stats.query_errors, 0);
    Ok(())
}

#[tokio::test]
async fn test_one_throttled_query_keeps_the_others() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    let ids = ["i-1", "i-2", "i-3", "i-4"];
    api.set_instances(ids.iter().map(|id| instance(&[("Id", id)])).collect());
    for id in ids {
        api.set_points(id, vec![(recent(), 1.0)]);
    }
    api.throttle_dimension("i-2");
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "*""#));

    let outcome = factory
        .new_collector(&params("tgt1", "t1"), settings)?
        .collect(deadline())
        .await?;

    let got: Vec<&str> = outcome
        .samples
        .iter()
        .map(|s| s.label("Id").unwrap_or_default())
        .collect();
    assert_eq!(got, vec!["i-1", "i-3", "i-4"]);
    assert_eq!(outcome.stats.query_errors, 1);
    assert!(outcome.stats.throttled_calls >= 2);
    Ok(())
}

#[tokio::test]
async fn test_deadline_returns_partial_results() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    api.set_points("abc", vec![(recent(), 1.0)]);
    api.set_latency(Duration::from_secs(5));
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let started = std::time::Instant::now();
    let outcome = factory
        .new_collector(&params("tgt1", "t1"), settings)?
        .collect(Instant::now() + Duration::from_millis(100))
        .await?;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(outcome.samples.is_empty());
    assert_eq!(outcome.stats.deadline_exceeded, 1);
    assert_eq!(outcome.stats.query_errors, 0);
    Ok(())
}

#[tokio::test]
async fn test_deadline_during_discovery_is_reported_as_cut_short() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    api.set_instances(vec![instance(&[("Id", "i-1")])]);
    api.set_latency(Duration::from_secs(5));
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "*""#));

    let started = std::time::Instant::now();
    let outcome = factory
        .new_collector(&params("tgt1", "t1"), settings)?
        .collect(Instant::now() + Duration::from_millis(100))
        .await?;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(outcome.samples.is_empty());
    assert_eq!(outcome.stats.deadline_exceeded, 1);
    assert_eq!(outcome.stats.query_errors, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_base_credentials_is_auth_error() {
    let api = Arc::new(MockMonitoringApi::new());
    let factory = cwbridge::application::collector::CollectorFactory::new(
        api.clone(),
        Arc::new(MockRoleAssumer::succeeding()),
        None,
        cwbridge::infrastructure::Metrics::new().unwrap(),
    );
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let result = factory
        .new_collector(&params("tgt1", "t1"), settings)
        .unwrap()
        .collect(deadline())
        .await;

    assert!(matches!(
        result,
        Err(ScrapeError::Auth(AuthError::MissingCredentials))
    ));
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn test_rendered_scrape_contains_samples_and_stats() -> anyhow::Result<()> {
    let api = Arc::new(MockMonitoringApi::new());
    api.set_points("abc", vec![(recent(), 42.0)]);
    let factory = factory(api.clone(), Arc::new(MockRoleAssumer::succeeding()));
    let settings = settings(&single_template_config(r#"Id = "abc""#));

    let text = factory
        .new_collector(&params("tgt1", "t1"), settings)?
        .collect(deadline())
        .await?
        .render()?;

    assert!(text.contains("# TYPE ns_m gauge"));
    assert!(text.contains("target=\"tgt1\""));
    assert!(text.contains("cloudwatch_scrape_requests 1"));
    assert!(text.contains("cloudwatch_scrape_query_errors 0"));
    Ok(())
}
