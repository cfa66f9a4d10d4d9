use super::*;
use crate::auth::{Credentials, StaticCredentials};
use crate::testing::{fake_config, FakeLauncher, FakeLocalProcessor, FakeService, Reply};
use std::time::Duration;
use tempfile::TempDir;

fn manager(temp: &TempDir, services: &[&FakeService]) -> OrchestrationManager {
    let mut launcher = FakeLauncher::new();
    let mut credentials = StaticCredentials::new();
    for service in services {
        launcher = launcher.with_service((*service).clone());
        credentials = credentials.with(
            &service.id().to_uppercase(),
            Credentials::new("user", "secret"),
        );
    }
    OrchestrationManager::builder(fake_config(temp.path(), services))
        .launcher(Arc::new(launcher))
        .credentials(Arc::new(credentials))
        .build()
        .unwrap()
}

#[test]
fn test_build_registers_profiles() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let manager = manager(&temp, &[&alpha]);

    assert!(manager.profiles().is_registered("alpha"));
    let profile = manager.profiles().load("alpha").unwrap();
    assert_eq!(profile.credentials_ref.as_deref(), Some("ALPHA"));
}

#[tokio::test]
async fn test_status_reports_persisted_validation_time() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let validated_at = chrono::Utc::now() - chrono::Duration::hours(3);
    manager(&temp, &[&alpha])
        .profiles()
        .mark_validated("alpha", validated_at)
        .unwrap();

    let fresh = manager(&temp, &[&alpha]);
    let statuses = fresh.get_service_status().await;

    let status = &statuses["alpha"];
    assert_eq!(status.state, ServiceState::Unknown);
    assert_eq!(status.last_validated_at, Some(validated_at));
}

#[test]
fn test_build_rejects_duplicate_services() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let config = fake_config(temp.path(), &[&alpha, &alpha]);

    let err = OrchestrationManager::builder(config)
        .launcher(Arc::new(FakeLauncher::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test(start_paused = true)]
async fn test_submit_job_reports_and_persists() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let beta = FakeService::new("beta");
    alpha.push_reply(Reply::Text("Paris is the capital of France.".to_string()));
    beta.push_reply(Reply::Text("The capital of France is Paris.".to_string()));
    let manager = manager(&temp, &[&alpha, &beta]);

    let report = manager
        .submit_job(JobRequest::new("What is the capital of France?", ["alpha", "beta"]))
        .await;

    assert_eq!(report.answered(), 2);
    assert!(!report.confidential);
    let stored = manager.reports().unwrap().load(report.job_id).unwrap();
    assert_eq!(stored.job_id, report.job_id);
    assert_eq!(stored.consensus_summary, report.consensus_summary);
    assert_eq!(stored.per_service_responses.len(), 2);

    let status = manager.get_service_status().await;
    assert!(status["alpha"].is_ready());
    assert!(status["beta"].is_ready());
    assert!(status["alpha"].last_validated_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_empty_service_list_targets_all() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let beta = FakeService::new("beta");
    let manager = manager(&temp, &[&alpha, &beta]);

    let report = manager
        .submit_job(JobRequest::new("hello", Vec::<String>::new()))
        .await;

    let ids: Vec<&str> = report
        .per_service_responses
        .iter()
        .map(|r| r.service_id.as_str())
        .collect();
    assert_eq!(ids, vec!["alpha", "beta"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_service_becomes_unavailable() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    alpha.push_reply(Reply::Banner("Service overloaded".to_string()));
    let manager = manager(&temp, &[&alpha]);

    let report = manager.submit_job(JobRequest::new("hello", ["alpha"])).await;

    assert_eq!(report.failures.len(), 1);
    let status = manager.get_service_status().await;
    assert_eq!(status["alpha"].state, ServiceState::Unavailable);
    assert!(status["alpha"]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("Service overloaded")));
}

#[tokio::test]
async fn test_confidential_job_stays_local() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let local = FakeLocalProcessor::new("Handled locally.");
    let manager = OrchestrationManager::builder(fake_config(temp.path(), &[&alpha]))
        .launcher(Arc::new(FakeLauncher::new().with_service(alpha.clone())))
        .local_processor(Arc::new(local.clone()))
        .build()
        .unwrap();

    let report = manager
        .submit_job(JobRequest::new("my salary is 100k", ["alpha"]).confidential())
        .await;

    assert!(report.confidential);
    assert_eq!(report.per_service_responses.len(), 1);
    assert_eq!(report.per_service_responses[0].service_id, LOCAL_SERVICE_ID);
    assert_eq!(report.consensus_summary, "Handled locally.");
    assert_eq!(local.prompts(), vec!["my salary is 100k"]);
    assert_eq!(alpha.launches(), 0);
    assert!(alpha.prompts().is_empty());

    let stored = std::fs::read_to_string(
        manager
            .reports()
            .unwrap()
            .dir()
            .join(format!("{}.json", report.job_id)),
    )
    .unwrap();
    assert!(!stored.contains("my salary"));
}

#[tokio::test]
async fn test_confidential_job_without_processor() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let manager = manager(&temp, &[&alpha]);

    let report = manager
        .submit_job(JobRequest::new("secret", ["alpha"]).confidential())
        .await;

    assert!(report.confidential);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service_id, LOCAL_SERVICE_ID);
    assert_eq!(alpha.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_check_service_transitions() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha").signed_out();
    let manager = manager(&temp, &[&alpha]);

    assert_eq!(
        manager.get_service_status().await["alpha"].state,
        ServiceState::Unknown
    );

    let state = manager.check_service("alpha").await.unwrap();
    assert_eq!(state, ServiceState::Ready);
    assert!(alpha.is_authenticated());
    assert!(manager.get_service_status().await["alpha"]
        .last_validated_at
        .is_some());

    alpha.fail_launch(true);
    let state = manager.check_service("alpha").await.unwrap();
    assert_eq!(state, ServiceState::Unavailable);

    alpha.fail_launch(false);
    let states = manager.check_all().await;
    assert_eq!(states["alpha"], ServiceState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_check_unknown_service() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, &[]);

    let err = manager.check_service("ghost").await.unwrap_err();
    assert!(matches!(err, Error::UnknownService(_)));
}

#[tokio::test(start_paused = true)]
async fn test_health_loop_runs_until_cancelled() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    let manager = Arc::new(manager(&temp, &[&alpha]));

    let handle = manager.clone().spawn_health_loop();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    manager.cancel();
    handle.await.unwrap();

    assert!(manager.get_service_status().await["alpha"].is_ready());
    assert!(alpha.launches() >= 2);
    assert_eq!(alpha.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_job_still_reports() {
    let temp = TempDir::new().unwrap();
    let alpha = FakeService::new("alpha");
    alpha.push_reply(Reply::Silent);
    let manager = manager(&temp, &[&alpha]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = manager
        .submit_job_with_cancel(JobRequest::new("hello", ["alpha"]), cancel)
        .await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].outcome, Outcome::Cancelled);
    assert_eq!(
        manager.get_service_status().await["alpha"].state,
        ServiceState::Unknown
    );
}
