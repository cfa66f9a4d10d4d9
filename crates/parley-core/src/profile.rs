//! Persistent service profiles
//!
//! Each service owns one profile directory that survives restarts:
//!
//! ```text
//! <root>/<service_id>/
//!     profile.json     metadata (credentials ref, last validation)
//!     .parley.lock     lock marker while a session is open
//!     browser/         driver user data (cookies, storage)
//! ```
//!
//! At most one session may hold a profile at any time. Inside a process
//! this is a one-permit semaphore per service; across processes it is the
//! lock marker, created with `create_new` so only one writer wins.

mod lock;

pub use lock::{LockMarker, LockOwner, LockState, LOCK_FILE};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProfilesConfig;
use crate::error::{Error, Result};

use lock::{classify, clear_driver_artifacts, read_marker, MarkerRead};

const METADATA_FILE: &str = "profile.json";
const BROWSER_DIR: &str = "browser";
const MARKER_POLL: Duration = Duration::from_millis(200);

/// Metadata for one service profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProfile {
    /// Owning service
    pub service_id: String,
    /// Profile directory
    #[serde(skip)]
    pub profile_dir: PathBuf,
    /// Credential reference used for re-authentication
    #[serde(default)]
    pub credentials_ref: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last successful validation
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
    /// Lock state observed when the profile was loaded
    #[serde(skip)]
    pub lock_state: LockState,
}

impl ServiceProfile {
    /// Driver user data directory
    pub fn user_data_dir(&self) -> PathBuf {
        self.profile_dir.join(BROWSER_DIR)
    }
}

/// Exclusive hold on a profile: in-process slot plus on-disk marker
#[derive(Debug)]
pub struct ProfileGuard {
    profile: ServiceProfile,
    marker: LockMarker,
    _slot: OwnedSemaphorePermit,
}

impl ProfileGuard {
    /// Held profile
    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    /// Remove the marker and free the slot
    pub fn release(self) {
        self.marker.release();
    }
}

/// Store of persistent profiles rooted at one directory
#[derive(Debug)]
pub struct ProfileStore {
    root: PathBuf,
    run_id: Uuid,
    lock_wait: Duration,
    stale_after: Duration,
    slots: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl ProfileStore {
    /// Create a store from configuration
    pub fn new(config: &ProfilesConfig) -> Self {
        Self::with_root(config.root.clone())
            .with_lock_wait(config.lock_wait())
            .with_stale_after(config.stale_after())
    }

    /// Create a store with default timings
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let defaults = ProfilesConfig::default();
        Self {
            root: root.into(),
            run_id: Uuid::new_v4(),
            lock_wait: defaults.lock_wait(),
            stale_after: defaults.stale_after(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Set the bounded wait for a held profile
    #[must_use]
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Set the stale marker threshold
    #[must_use]
    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after = after;
        self
    }

    /// Profile root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifier of this engine run, recorded in lock markers
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Create (or update) a profile for a service
    pub fn register(&self, service_id: &str, credentials_ref: Option<&str>) -> Result<ServiceProfile> {
        let dir = self.profile_dir(service_id)?;
        std::fs::create_dir_all(dir.join(BROWSER_DIR))?;

        let mut profile = match self.load(service_id) {
            Ok(existing) => existing,
            Err(_) => ServiceProfile {
                service_id: service_id.to_string(),
                profile_dir: dir.clone(),
                credentials_ref: None,
                created_at: Utc::now(),
                last_validated_at: None,
                lock_state: LockState::Unlocked,
            },
        };
        if let Some(reference) = credentials_ref {
            profile.credentials_ref = Some(reference.to_string());
        }
        self.write_metadata(&profile)?;

        info!(service = %service_id, dir = %dir.display(), "Registered service profile");
        Ok(profile)
    }

    /// Whether profile metadata exists for a service (readable or not)
    pub fn is_registered(&self, service_id: &str) -> bool {
        self.profile_dir(service_id)
            .map(|dir| dir.join(METADATA_FILE).exists())
            .unwrap_or(false)
    }

    /// Load a profile. Missing or unreadable metadata is `ProfileCorrupt`.
    pub fn load(&self, service_id: &str) -> Result<ServiceProfile> {
        let dir = self.profile_dir(service_id)?;
        let content = match std::fs::read_to_string(dir.join(METADATA_FILE)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::corrupt(service_id, "profile is not registered"));
            }
            Err(e) => return Err(Error::corrupt(service_id, e.to_string())),
        };

        let mut profile: ServiceProfile = serde_json::from_str(&content)
            .map_err(|e| Error::corrupt(service_id, format!("unreadable {}: {}", METADATA_FILE, e)))?;
        if profile.service_id != service_id {
            return Err(Error::corrupt(
                service_id,
                format!("metadata belongs to '{}'", profile.service_id),
            ));
        }
        if !dir.join(BROWSER_DIR).is_dir() {
            return Err(Error::corrupt(service_id, "browser data directory is missing"));
        }

        profile.profile_dir = dir.clone();
        profile.lock_state = classify(read_marker(&dir.join(LOCK_FILE)), self.run_id, self.stale_after);
        Ok(profile)
    }

    /// All readable profiles, sorted by service id
    pub fn list(&self) -> Result<Vec<ServiceProfile>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut profiles = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.load(&name) {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(service = %name, error = %e, "Skipping unreadable profile"),
            }
        }
        profiles.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(profiles)
    }

    /// Record a successful validation
    pub fn mark_validated(&self, service_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut profile = self.load(service_id)?;
        profile.last_validated_at = Some(at);
        self.write_metadata(&profile)
    }

    /// Current lock state of a profile
    pub fn lock_state(&self, service_id: &str) -> Result<LockState> {
        let dir = self.profile_dir(service_id)?;
        Ok(classify(read_marker(&dir.join(LOCK_FILE)), self.run_id, self.stale_after))
    }

    /// Take exclusive hold of a profile.
    ///
    /// Waits at most the configured lock wait, first for the in-process
    /// slot and then for a foreign marker to disappear. Stale markers and
    /// leftover driver lock files are cleared.
    pub async fn acquire(&self, service_id: &str) -> Result<ProfileGuard> {
        let started = Instant::now();
        let slot = self.slot(service_id).await;

        let permit = match tokio::time::timeout(self.lock_wait, slot.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!(service = %service_id, wait_ms = self.lock_wait.as_millis() as u64, "Profile slot busy");
                return Err(Error::ProfileLocked {
                    service: service_id.to_string(),
                });
            }
        };

        let mut profile = self.load(service_id)?;
        let deadline = started + self.lock_wait;
        let marker = self.claim_marker(&profile, deadline).await?;
        clear_driver_artifacts(&profile.user_data_dir());
        profile.lock_state = LockState::Held {
            owner: marker.owner().clone(),
        };

        debug!(service = %service_id, "Acquired profile");
        Ok(ProfileGuard {
            profile,
            marker,
            _slot: permit,
        })
    }

    async fn claim_marker(&self, profile: &ServiceProfile, deadline: Instant) -> Result<LockMarker> {
        let path = profile.profile_dir.join(LOCK_FILE);
        let service = profile.service_id.as_str();

        loop {
            if let Some(marker) = LockMarker::create(path.clone(), LockOwner::current(self.run_id))? {
                return Ok(marker);
            }

            let read = read_marker(&path);
            let own_leak = matches!(&read, MarkerRead::Owner(owner) if owner.run_id == self.run_id);
            match classify(read, self.run_id, self.stale_after) {
                LockState::Unlocked => continue,
                LockState::Stale { owner } => {
                    warn!(
                        service = %service,
                        pid = owner.as_ref().map(|o| o.pid),
                        "Clearing stale profile lock marker"
                    );
                    remove_marker(&path)?;
                }
                LockState::Held { .. } if own_leak => {
                    // This run holds the slot, so the marker outlived its session
                    warn!(service = %service, "Clearing leaked profile lock marker");
                    remove_marker(&path)?;
                }
                state @ (LockState::Held { .. } | LockState::Pending) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let pid = match &state {
                            LockState::Held { owner } => Some(owner.pid),
                            _ => None,
                        };
                        warn!(service = %service, pid = ?pid, "Profile held by another process");
                        return Err(Error::ProfileLocked {
                            service: service.to_string(),
                        });
                    }
                    tokio::time::sleep(MARKER_POLL.min(deadline - now)).await;
                }
            }
        }
    }

    async fn slot(&self, service_id: &str) -> Arc<Semaphore> {
        if let Some(slot) = self.slots.read().await.get(service_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    fn profile_dir(&self, service_id: &str) -> Result<PathBuf> {
        let valid = !service_id.is_empty()
            && service_id != "."
            && service_id != ".."
            && service_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::Configuration(format!(
                "invalid service id for a profile: '{}'",
                service_id
            )));
        }
        Ok(self.root.join(service_id))
    }

    fn write_metadata(&self, profile: &ServiceProfile) -> Result<()> {
        let dir = self.profile_dir(&profile.service_id)?;
        let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
        std::fs::write(&tmp, serde_json::to_vec_pretty(profile)?)?;
        std::fs::rename(&tmp, dir.join(METADATA_FILE))?;
        Ok(())
    }
}

fn remove_marker(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
