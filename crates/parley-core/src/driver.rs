//! Automation driver abstraction
//!
//! The engine never talks to a browser directly. A [`DriverLauncher`] opens
//! a [`SessionDriver`] bound to one persistent profile directory, and the
//! driver exposes a small set of page primitives addressed by [`Locator`].

mod relay;
mod stealth;

pub use relay::{RelayDriver, RelayLauncher};
pub use stealth::StealthProfile;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::descriptor::Locator;
use crate::error::Result;

/// Parameters for opening a driver on a profile
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Service the driver is opened for
    pub service_id: String,
    /// Persistent browser data directory owned by the profile
    pub user_data_dir: PathBuf,
    /// Fingerprint and pacing settings
    pub stealth: StealthProfile,
}

/// Page-level automation primitives for one open browser context
#[async_trait]
pub trait SessionDriver: Send {
    /// Load a URL and wait for navigation to commit
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// URL of the current page
    async fn current_url(&mut self) -> Result<String>;

    /// Whether an element matching `locator` is currently present
    async fn is_present(&mut self, locator: &Locator) -> Result<bool>;

    /// Text content of the element, `None` when nothing matches
    async fn read_text(&mut self, locator: &Locator) -> Result<Option<String>>;

    /// Type `text` into the element, pausing `keystroke_delay` between keys
    async fn fill(&mut self, locator: &Locator, text: &str, keystroke_delay: Duration) -> Result<()>;

    /// Click the element
    async fn click(&mut self, locator: &Locator) -> Result<()>;

    /// Close the browser context and flush profile state to disk
    async fn close(&mut self) -> Result<()>;
}

/// Opens drivers on persistent profiles
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    /// Launcher name for logs
    fn name(&self) -> &str;

    /// Open a driver for the given profile
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SessionDriver>>;
}

/// Placeholder left behind once a driver has been handed off for closing.
pub(crate) struct DetachedDriver;

#[async_trait]
impl SessionDriver for DetachedDriver {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        Err(detached())
    }

    async fn current_url(&mut self) -> Result<String> {
        Err(detached())
    }

    async fn is_present(&mut self, _locator: &Locator) -> Result<bool> {
        Err(detached())
    }

    async fn read_text(&mut self, _locator: &Locator) -> Result<Option<String>> {
        Err(detached())
    }

    async fn fill(&mut self, _locator: &Locator, _text: &str, _delay: Duration) -> Result<()> {
        Err(detached())
    }

    async fn click(&mut self, _locator: &Locator) -> Result<()> {
        Err(detached())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn detached() -> crate::error::Error {
    crate::error::Error::Driver("driver already closed".to_string())
}
