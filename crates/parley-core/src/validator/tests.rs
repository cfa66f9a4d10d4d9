use super::*;
use crate::driver::StealthProfile;
use crate::session::{SessionFactory, SessionLease};
use crate::testing::{FakeLauncher, FakeService};
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    profiles: Arc<ProfileStore>,
    factory: SessionFactory,
    descriptor: ServiceDescriptor,
}

fn harness(service: &FakeService) -> Harness {
    let temp = TempDir::new().unwrap();
    let profiles = Arc::new(ProfileStore::with_root(temp.path()));
    profiles.register(&service.id(), None).unwrap();
    let factory = SessionFactory::new(
        profiles.clone(),
        Arc::new(FakeLauncher::new().with_service(service.clone())),
        StealthProfile::instant(),
    );
    Harness {
        _temp: temp,
        profiles,
        factory,
        descriptor: service.descriptor(),
    }
}

async fn open_home(h: &Harness) -> SessionLease {
    let mut lease = h.factory.acquire(&h.descriptor.id).await.unwrap();
    lease
        .session_mut()
        .driver()
        .navigate(&h.descriptor.home_url)
        .await
        .unwrap();
    lease
}

fn config() -> ValidationConfig {
    ValidationConfig {
        budget_ms: 2_000,
        strategy_timeout_ms: 500,
        settle_ms: 10,
    }
}

struct Stalling;

#[async_trait]
impl ValidationStrategy for Stalling {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn cost(&self) -> u32 {
        1
    }

    async fn evaluate(&self, _: &mut dyn SessionDriver, _: &ServiceDescriptor) -> Result<Verdict> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Verdict::Valid)
    }
}

struct Shrugging;

#[async_trait]
impl ValidationStrategy for Shrugging {
    fn name(&self) -> &'static str {
        "shrugging"
    }

    fn cost(&self) -> u32 {
        5
    }

    async fn evaluate(&self, _: &mut dyn SessionDriver, _: &ServiceDescriptor) -> Result<Verdict> {
        Ok(Verdict::Inconclusive)
    }
}

#[tokio::test]
async fn test_authenticated_session_is_valid() {
    let service = FakeService::new("alpha");
    let h = harness(&service);
    let validator = SessionValidator::new(&config(), h.profiles.clone());

    let mut lease = open_home(&h).await;
    let result = validator.validate(lease.session_mut(), &h.descriptor).await;

    assert_eq!(result, Validation::Valid);
    assert_eq!(lease.session().state(), SessionState::Authenticated);
    assert!(h.profiles.load("alpha").unwrap().last_validated_at.is_some());
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_signed_out_session_is_invalid() {
    let service = FakeService::new("alpha").signed_out();
    let h = harness(&service);
    let validator = SessionValidator::new(&config(), h.profiles.clone());

    let mut lease = open_home(&h).await;
    let result = validator.validate(lease.session_mut(), &h.descriptor).await;

    assert!(matches!(result, Validation::Invalid(reason) if reason.contains("login")));
    assert_eq!(lease.session().state(), SessionState::Unauthenticated);
    assert!(h.profiles.load("alpha").unwrap().last_validated_at.is_none());
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_revalidation_only_moves_timestamp() {
    let service = FakeService::new("alpha");
    let h = harness(&service);
    let validator = SessionValidator::new(&config(), h.profiles.clone());
    let mut lease = open_home(&h).await;

    assert!(validator.validate(lease.session_mut(), &h.descriptor).await.is_valid());
    let first = h.profiles.load("alpha").unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(validator.validate(lease.session_mut(), &h.descriptor).await.is_valid());
    let second = h.profiles.load("alpha").unwrap();

    assert_eq!(lease.session().state(), SessionState::Authenticated);
    assert!(second.last_validated_at > first.last_validated_at);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.credentials_ref, first.credentials_ref);
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_stalled_strategy_falls_through() {
    let service = FakeService::new("alpha");
    let h = harness(&service);
    let validator = SessionValidator::with_strategies(
        vec![Box::new(Stalling), Box::new(EndpointStrategy)],
        &config(),
        h.profiles.clone(),
    );

    let mut lease = open_home(&h).await;
    let result = validator.validate(lease.session_mut(), &h.descriptor).await;
    assert_eq!(result, Validation::Valid);
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_inconclusive_fails_closed() {
    let service = FakeService::new("alpha");
    let h = harness(&service);
    let validator =
        SessionValidator::with_strategies(vec![Box::new(Shrugging)], &config(), h.profiles.clone());

    let mut lease = open_home(&h).await;
    let result = validator.validate(lease.session_mut(), &h.descriptor).await;
    assert!(!result.is_valid());
    assert_eq!(lease.session().state(), SessionState::Unauthenticated);
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_budget_exhaustion_fails_closed() {
    let service = FakeService::new("alpha");
    let h = harness(&service);
    let tight = ValidationConfig {
        budget_ms: 100,
        strategy_timeout_ms: 1_000,
        settle_ms: 10,
    };
    let validator = SessionValidator::with_strategies(
        vec![Box::new(Stalling), Box::new(EndpointStrategy)],
        &tight,
        h.profiles.clone(),
    );

    let mut lease = open_home(&h).await;
    let result = validator.validate(lease.session_mut(), &h.descriptor).await;
    assert!(!result.is_valid());
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_busy_session_is_not_validated() {
    let service = FakeService::new("alpha");
    let h = harness(&service);
    let validator = SessionValidator::new(&config(), h.profiles.clone());

    let mut lease = open_home(&h).await;
    assert!(validator.validate(lease.session_mut(), &h.descriptor).await.is_valid());
    lease.session_mut().begin_operation().unwrap();

    let result = validator.validate(lease.session_mut(), &h.descriptor).await;
    assert!(matches!(result, Validation::Invalid(reason) if reason.contains("busy")));
    assert_eq!(lease.session().state(), SessionState::Busy);
    lease.release().await.unwrap();
}
