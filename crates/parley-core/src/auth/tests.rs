use super::*;
use crate::config::ValidationConfig;
use crate::profile::ProfileStore;
use crate::session::{SessionFactory, SessionLease, SessionState};
use crate::testing::{FakeLauncher, FakeService};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    factory: SessionFactory,
    validator: Arc<SessionValidator>,
    descriptor: ServiceDescriptor,
}

fn harness(service: &FakeService) -> Harness {
    let temp = TempDir::new().unwrap();
    let profiles = Arc::new(ProfileStore::with_root(temp.path()));
    profiles.register(&service.id(), None).unwrap();
    let validator = Arc::new(SessionValidator::new(
        &ValidationConfig {
            budget_ms: 2_000,
            strategy_timeout_ms: 500,
            settle_ms: 10,
        },
        profiles.clone(),
    ));
    let factory = SessionFactory::new(
        profiles,
        Arc::new(FakeLauncher::new().with_service(service.clone())),
        StealthProfile::instant(),
    );
    Harness {
        _temp: temp,
        factory,
        validator,
        descriptor: service.descriptor(),
    }
}

fn auth_config() -> AuthConfig {
    AuthConfig {
        login_step_secs: 1,
        otp_prompt_wait_ms: 200,
        otp_window_secs: 30,
        otp_max_polls: 2,
        otp_poll_interval_ms: 10,
    }
}

fn credentials(password: &str) -> Arc<dyn CredentialResolver> {
    Arc::new(StaticCredentials::new().with("ALPHA", Credentials::new("user", password)))
}

fn flow(h: &Harness, password: &str) -> FormLoginFlow {
    FormLoginFlow::new(
        credentials(password),
        h.validator.clone(),
        auth_config(),
        StealthProfile::instant(),
    )
}

async fn open(h: &Harness) -> SessionLease {
    h.factory.acquire(&h.descriptor.id).await.unwrap()
}

#[tokio::test]
async fn test_password_login() {
    let service = FakeService::new("alpha").signed_out();
    let h = harness(&service);
    let cancel = CancellationToken::new();
    let mut lease = open(&h).await;

    flow(&h, "secret")
        .authenticate(lease.session_mut(), &h.descriptor, None, &cancel)
        .await
        .unwrap();

    assert!(service.is_authenticated());
    assert_eq!(service.logins(), 1);
    assert_eq!(lease.session().state(), SessionState::Authenticated);
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_wrong_password_fails() {
    let service = FakeService::new("alpha").signed_out();
    let h = harness(&service);
    let cancel = CancellationToken::new();
    let mut lease = open(&h).await;

    let err = flow(&h, "wrong")
        .authenticate(lease.session_mut(), &h.descriptor, None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed { .. }));
    assert!(!service.is_authenticated());
    assert_eq!(lease.session().state(), SessionState::Unauthenticated);
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_one_time_code_is_polled_until_it_arrives() {
    let service = FakeService::new("alpha").signed_out().with_otp("424242");
    let h = harness(&service);
    let cancel = CancellationToken::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut provider = MockOtpProvider::new();
    provider
        .expect_fetch_code()
        .times(3)
        .returning(move |destination, _, _| {
            assert_eq!(destination, "alpha@fake.test");
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some("424242".to_string()))
            }
        });

    let mut lease = open(&h).await;
    flow(&h, "secret")
        .with_otp_provider(Arc::new(provider))
        .authenticate(lease.session_mut(), &h.descriptor, None, &cancel)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(service.is_authenticated());
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_missing_code_is_otp_timeout() {
    let service = FakeService::new("alpha").signed_out().with_otp("424242");
    let h = harness(&service);
    let cancel = CancellationToken::new();

    let mut provider = MockOtpProvider::new();
    provider
        .expect_fetch_code()
        .times(3)
        .returning(|_, _, _| Ok(None));

    let mut lease = open(&h).await;
    let err = flow(&h, "secret")
        .with_otp_provider(Arc::new(provider))
        .authenticate(lease.session_mut(), &h.descriptor, None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::OtpTimeout { destination } if destination == "alpha@fake.test"));
    assert!(!err.is_retryable());
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_code_required_without_provider() {
    let service = FakeService::new("alpha").signed_out().with_otp("424242");
    let h = harness(&service);
    let cancel = CancellationToken::new();
    let mut lease = open(&h).await;

    let err = flow(&h, "secret")
        .authenticate(lease.session_mut(), &h.descriptor, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed { reason, .. } if reason.contains("no provider")));
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_unknown_credentials_reference() {
    let service = FakeService::new("alpha").signed_out();
    let h = harness(&service);
    let cancel = CancellationToken::new();
    let mut lease = open(&h).await;

    let err = flow(&h, "secret")
        .authenticate(lease.session_mut(), &h.descriptor, Some("OTHER"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed { .. }));
    assert_eq!(service.logins(), 0);
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_env_credentials() {
    std::env::set_var("PARLEY_TEST_ENV_SVC_USERNAME", "someone");
    std::env::set_var("PARLEY_TEST_ENV_SVC_PASSWORD", "hunter2");

    let credentials = EnvCredentials::new().resolve("test-env.svc").await.unwrap();
    assert_eq!(credentials.username, "someone");
    assert_eq!(credentials.secret(), "hunter2");
    assert!(!format!("{:?}", credentials).contains("hunter2"));

    assert!(EnvCredentials::new().resolve("absent").await.is_err());
}
