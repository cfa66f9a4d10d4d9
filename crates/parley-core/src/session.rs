//! Sessions and scoped acquisition
//!
//! A [`Session`] is a live driver bound to one service profile. Sessions
//! are only handed out inside a [`SessionLease`], which owns the profile
//! hold. Releasing the lease (or dropping it on any exit path, including
//! cancellation) closes the driver and frees the profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::driver::{DetachedDriver, DriverLauncher, LaunchRequest, SessionDriver, StealthProfile};
use crate::error::{Error, Result};
use crate::profile::{ProfileGuard, ProfileStore, ServiceProfile};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Driver open, authentication not yet checked
    Initializing,
    /// Validated and idle
    Authenticated,
    /// Running a prompt
    Busy,
    /// Needs (re-)authentication before further use
    Unauthenticated,
    /// Driver closed
    Closed,
}

/// Live automation session for one service
pub struct Session {
    service_id: String,
    driver: Box<dyn SessionDriver>,
    state: SessionState,
    opened_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("service_id", &self.service_id)
            .field("state", &self.state)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wrap an opened driver
    pub fn new(service_id: impl Into<String>, driver: Box<dyn SessionDriver>) -> Self {
        Self {
            service_id: service_id.into(),
            driver,
            state: SessionState::Initializing,
            opened_at: Utc::now(),
        }
    }

    /// Service identifier
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When the driver was opened
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Page primitives
    pub fn driver(&mut self) -> &mut dyn SessionDriver {
        self.driver.as_mut()
    }

    /// Record a successful validation or login
    pub fn mark_authenticated(&mut self) -> Result<()> {
        match self.state {
            SessionState::Initializing
            | SessionState::Unauthenticated
            | SessionState::Authenticated => self.transition(SessionState::Authenticated),
            other => Err(invalid_transition(other, SessionState::Authenticated)),
        }
    }

    /// Record that the session is not (or no longer) signed in
    pub fn mark_unauthenticated(&mut self) {
        if self.state != SessionState::Closed {
            let _ = self.transition(SessionState::Unauthenticated);
        }
    }

    /// Enter `Busy`. Only an authenticated session may run a prompt.
    pub fn begin_operation(&mut self) -> Result<()> {
        match self.state {
            SessionState::Authenticated => self.transition(SessionState::Busy),
            SessionState::Initializing | SessionState::Unauthenticated => {
                Err(Error::AuthenticationRequired {
                    service: self.service_id.clone(),
                    reason: "session has not been validated".to_string(),
                })
            }
            other => Err(invalid_transition(other, SessionState::Busy)),
        }
    }

    /// Leave `Busy` after a completed prompt
    pub fn end_operation(&mut self) {
        if self.state == SessionState::Busy {
            let _ = self.transition(SessionState::Authenticated);
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        debug!(service = %self.service_id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.driver.close().await
    }
}

fn invalid_transition(from: SessionState, to: SessionState) -> Error {
    Error::Driver(format!("invalid session transition {:?} -> {:?}", from, to))
}

/// Scoped hold on a session and its profile
#[derive(Debug)]
pub struct SessionLease {
    session: Session,
    guard: Option<ProfileGuard>,
    released: bool,
}

impl SessionLease {
    fn new(session: Session, guard: ProfileGuard) -> Self {
        Self {
            session,
            guard: Some(guard),
            released: false,
        }
    }

    /// Leased session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Leased session, mutably
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Profile backing the session
    pub fn profile(&self) -> Option<&ServiceProfile> {
        self.guard.as_ref().map(ProfileGuard::profile)
    }

    /// Close the driver, then free the profile
    pub async fn release(mut self) -> Result<()> {
        let result = self.session.close().await;
        self.released = true;
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
        match &result {
            Ok(()) => debug!(service = %self.session.service_id, "Session released"),
            Err(e) => warn!(service = %self.session.service_id, error = %e, "Driver close failed during release"),
        }
        result
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.session.state = SessionState::Closed;
        let mut driver = std::mem::replace(&mut self.session.driver, Box::new(DetachedDriver));
        let guard = self.guard.take();
        let service = self.session.service_id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(service = %service, "Session dropped without release; closing in background");
                handle.spawn(async move {
                    if let Err(e) = driver.close().await {
                        warn!(service = %service, error = %e, "Background driver close failed");
                    }
                    drop(guard);
                });
            }
            Err(_) => {
                warn!(service = %service, "Session dropped outside a runtime; driver not closed");
                drop(guard);
            }
        }
    }
}

/// Opens sessions on persistent profiles
pub struct SessionFactory {
    profiles: Arc<ProfileStore>,
    launcher: Arc<dyn DriverLauncher>,
    stealth: StealthProfile,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("root", &self.profiles.root())
            .field("launcher", &self.launcher.name())
            .finish_non_exhaustive()
    }
}

impl SessionFactory {
    /// Create a factory
    pub fn new(
        profiles: Arc<ProfileStore>,
        launcher: Arc<dyn DriverLauncher>,
        stealth: StealthProfile,
    ) -> Self {
        Self {
            profiles,
            launcher,
            stealth,
        }
    }

    /// Profile store
    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    /// Pacing settings passed to drivers
    pub fn stealth(&self) -> &StealthProfile {
        &self.stealth
    }

    /// Acquire exclusive use of a service's profile and open a driver on it.
    ///
    /// Fails with `ProfileLocked` after the bounded wait or `ProfileCorrupt`
    /// when the profile cannot be loaded.
    pub async fn acquire(&self, service_id: &str) -> Result<SessionLease> {
        let guard = self.profiles.acquire(service_id).await?;
        let request = LaunchRequest {
            service_id: service_id.to_string(),
            user_data_dir: guard.profile().user_data_dir(),
            stealth: self.stealth.clone(),
        };

        let driver = match self.launcher.launch(request).await {
            Ok(driver) => driver,
            Err(e) => {
                warn!(service = %service_id, launcher = self.launcher.name(), error = %e, "Driver launch failed");
                guard.release();
                return Err(e);
            }
        };

        info!(service = %service_id, launcher = self.launcher.name(), "Session opened");
        Ok(SessionLease::new(Session::new(service_id, driver), guard))
    }

    /// Release a lease (same as [`SessionLease::release`])
    pub async fn release(&self, lease: SessionLease) -> Result<()> {
        lease.release().await
    }
}
