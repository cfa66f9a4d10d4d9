//! On-disk lock markers
//!
//! A marker file inside the profile directory records which process and
//! run currently drive the profile. Markers left behind by dead or
//! long-gone processes are classified as stale and may be cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// Marker file name inside a profile directory
pub const LOCK_FILE: &str = ".parley.lock";

/// How long an unreadable marker counts as still being written
const MARKER_WRITE_GRACE: Duration = Duration::from_secs(5);

/// Lock files a browser leaves in its data directory after an unclean exit
const DRIVER_ARTIFACTS: &[&str] = &[
    "SingletonLock",
    "SingletonCookie",
    "SingletonSocket",
    "lockfile",
    "parent.lock",
];

/// Identity recorded in a lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    /// Owning process id
    pub pid: u32,
    /// Engine run that wrote the marker
    pub run_id: Uuid,
    /// When the marker was written
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    pub(crate) fn current(run_id: Uuid) -> Self {
        Self {
            pid: std::process::id(),
            run_id,
            acquired_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }
}

/// Observed lock state of a profile
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    /// No marker present
    #[default]
    Unlocked,
    /// Marker owned by a live operation
    Held {
        /// Marker contents
        owner: LockOwner,
    },
    /// Unreadable marker too young to judge; its writer may still be running
    Pending,
    /// Marker left by a dead process or an expired run, or unreadable and old
    Stale {
        /// Marker contents when readable
        owner: Option<LockOwner>,
    },
}

/// Raw marker contents
pub(crate) enum MarkerRead {
    Absent,
    Owner(LockOwner),
    Garbled { age: Duration },
}

pub(crate) fn read_marker(path: &Path) -> MarkerRead {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(owner) => MarkerRead::Owner(owner),
            Err(_) => MarkerRead::Garbled { age: file_age(path) },
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => MarkerRead::Absent,
        Err(_) => MarkerRead::Garbled { age: file_age(path) },
    }
}

/// Time since the last write; unknown ages count as old
fn file_age(path: &Path) -> Duration {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::MAX)
}

/// Classify a marker relative to the current run
pub(crate) fn classify(read: MarkerRead, current_run: Uuid, stale_after: Duration) -> LockState {
    match read {
        MarkerRead::Absent => LockState::Unlocked,
        MarkerRead::Garbled { age } if age < MARKER_WRITE_GRACE => LockState::Pending,
        MarkerRead::Garbled { .. } => LockState::Stale { owner: None },
        MarkerRead::Owner(owner) => {
            let foreign = owner.run_id != current_run;
            if foreign && (!process_alive(owner.pid) || owner.age() > stale_after) {
                LockState::Stale { owner: Some(owner) }
            } else {
                LockState::Held { owner }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without a cheap liveness probe only marker age decides staleness
    true
}

/// Remove browser singleton files so a fresh launch is not refused
pub(crate) fn clear_driver_artifacts(user_data_dir: &Path) {
    for name in DRIVER_ARTIFACTS {
        let path = user_data_dir.join(name);
        if std::fs::symlink_metadata(&path).is_ok() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale driver lock artifact"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove driver lock artifact"),
            }
        }
    }
}

/// Held lock marker; removed on release or drop
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
    owner: LockOwner,
    released: bool,
}

impl LockMarker {
    /// Atomically create the marker. `Ok(None)` when one already exists.
    ///
    /// The owner is written to a private file first and then hard-linked
    /// into place, so the marker never exists without its contents.
    pub(crate) fn create(path: PathBuf, owner: LockOwner) -> std::io::Result<Option<Self>> {
        let staging = path.with_file_name(format!("{}.{}.tmp", LOCK_FILE, Uuid::new_v4()));
        let published =
            write_staging(&staging, &owner).and_then(|()| std::fs::hard_link(&staging, &path));
        let _ = std::fs::remove_file(&staging);

        match published {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        }

        Ok(Some(Self {
            path,
            owner,
            released: false,
        }))
    }

    /// Marker path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded owner
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Remove the marker
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released profile lock marker"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove profile lock marker"),
        }
    }
}

fn write_staging(path: &Path, owner: &LockOwner) -> std::io::Result<()> {
    let content = serde_json::to_vec(owner).map_err(std::io::Error::other)?;
    let mut file = File::create(path)?;
    file.write_all(&content)?;
    file.sync_all()
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILE);
        let run = Uuid::new_v4();

        let first = LockMarker::create(path.clone(), LockOwner::current(run)).unwrap();
        assert!(first.is_some());
        let second = LockMarker::create(path.clone(), LockOwner::current(run)).unwrap();
        assert!(second.is_none());

        drop(first);
        assert!(!path.exists());
        assert!(LockMarker::create(path, LockOwner::current(run)).unwrap().is_some());
    }

    #[test]
    fn test_live_foreign_marker_is_held() {
        let owner = LockOwner::current(Uuid::new_v4());
        let state = classify(
            MarkerRead::Owner(owner.clone()),
            Uuid::new_v4(),
            Duration::from_secs(3600),
        );
        assert_eq!(state, LockState::Held { owner });
    }

    #[test]
    fn test_old_foreign_marker_is_stale() {
        let owner = LockOwner {
            pid: std::process::id(),
            run_id: Uuid::new_v4(),
            acquired_at: Utc::now() - chrono::Duration::hours(10),
        };
        let state = classify(
            MarkerRead::Owner(owner.clone()),
            Uuid::new_v4(),
            Duration::from_secs(3600),
        );
        assert_eq!(state, LockState::Stale { owner: Some(owner) });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dead_process_marker_is_stale() {
        let owner = LockOwner {
            pid: u32::MAX - 1,
            run_id: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        let state = classify(MarkerRead::Owner(owner), Uuid::new_v4(), Duration::from_secs(3600));
        assert!(matches!(state, LockState::Stale { .. }));
    }

    #[test]
    fn test_fresh_garbled_marker_is_pending() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILE);
        std::fs::write(&path, "").unwrap();
        let state = classify(read_marker(&path), Uuid::new_v4(), Duration::from_secs(60));
        assert_eq!(state, LockState::Pending);
    }

    #[test]
    fn test_old_garbled_marker_is_stale() {
        let read = MarkerRead::Garbled {
            age: MARKER_WRITE_GRACE + Duration::from_secs(1),
        };
        let state = classify(read, Uuid::new_v4(), Duration::from_secs(60));
        assert_eq!(state, LockState::Stale { owner: None });
    }

    #[test]
    fn test_create_publishes_complete_marker() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILE);
        let owner = LockOwner::current(Uuid::new_v4());

        let marker = LockMarker::create(path.clone(), owner.clone()).unwrap().unwrap();
        assert!(matches!(read_marker(&path), MarkerRead::Owner(ref o) if *o == owner));
        assert_eq!(marker.owner(), &owner);

        // staging files are never left behind
        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_clear_driver_artifacts() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("SingletonLock"), "host-123").unwrap();
        std::fs::write(temp.path().join("SingletonCookie"), "1").unwrap();
        std::fs::write(temp.path().join("Preferences"), "{}").unwrap();

        clear_driver_artifacts(temp.path());

        assert!(!temp.path().join("SingletonLock").exists());
        assert!(!temp.path().join("SingletonCookie").exists());
        assert!(temp.path().join("Preferences").exists());
    }
}
