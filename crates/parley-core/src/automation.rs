//! Descriptor-driven page automation
//!
//! [`ServiceAutomation`] turns a service descriptor into the four steps
//! every chat-style service shares: locate the input, submit text, detect
//! completion and read the output. Nothing here knows a particular service.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::descriptor::{Locator, ServiceDescriptor};
use crate::driver::{SessionDriver, StealthProfile};
use crate::error::{Error, Result};
use crate::wait::{pause, BoundedWait};

/// Automation steps for one service
#[derive(Debug, Clone, Copy)]
pub struct ServiceAutomation<'a> {
    descriptor: &'a ServiceDescriptor,
    stealth: &'a StealthProfile,
}

impl<'a> ServiceAutomation<'a> {
    /// Bind a descriptor and pacing profile
    pub fn new(descriptor: &'a ServiceDescriptor, stealth: &'a StealthProfile) -> Self {
        Self {
            descriptor,
            stealth,
        }
    }

    fn service(&self) -> &str {
        &self.descriptor.id
    }

    /// Wait until `locator` is present, `ElementNotFound` after `timeout`
    pub async fn wait_for(
        &self,
        driver: &mut dyn SessionDriver,
        locator: &Locator,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let wait = BoundedWait::new(timeout, self.descriptor.poll_interval());
        loop {
            if driver.is_present(locator).await? {
                return Ok(());
            }
            if !wait.tick(cancel).await? {
                return Err(self.missing(driver, locator).await);
            }
        }
    }

    /// Locate the prompt input
    pub async fn locate_input(&self, driver: &mut dyn SessionDriver, cancel: &CancellationToken) -> Result<()> {
        self.wait_for(
            driver,
            &self.descriptor.locators.input,
            self.descriptor.submit_timeout(),
            cancel,
        )
        .await
    }

    /// Type the prompt and press submit, bounded by the submit timeout
    pub async fn submit_input(
        &self,
        driver: &mut dyn SessionDriver,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let budget = self.descriptor.submit_timeout();
        let locators = &self.descriptor.locators;

        let submit = async {
            pause(self.stealth.action_delay(), cancel).await?;
            driver
                .fill(&locators.input, text, self.stealth.keystroke_delay())
                .await?;
            pause(self.stealth.action_delay(), cancel).await?;
            driver.click(&locators.submit).await
        };

        match tokio::time::timeout(budget, submit).await {
            Ok(result) => result,
            Err(_) => Err(Error::SubmissionTimeout {
                service: self.service().to_string(),
                after: budget,
            }),
        }
    }

    /// Current output text, if the output element is present
    pub async fn peek_output(&self, driver: &mut dyn SessionDriver) -> Result<Option<String>> {
        driver.read_text(&self.descriptor.locators.output).await
    }

    /// Read the output element, `ElementNotFound` when it is missing
    pub async fn read_output(&self, driver: &mut dyn SessionDriver) -> Result<String> {
        match self.peek_output(driver).await? {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(self.missing(driver, &self.descriptor.locators.output).await),
        }
    }

    /// Wait for the response to finish and return its text.
    ///
    /// `baseline` is the output text before submission; a response only
    /// counts once the text differs from it. With a completion locator the
    /// response is done when that element appears (and the busy indicator,
    /// if any, is gone). Otherwise the text must stay unchanged for the
    /// stability window.
    pub async fn detect_completion(
        &self,
        driver: &mut dyn SessionDriver,
        baseline: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let locators = &self.descriptor.locators;
        let window = self.descriptor.stability_window();
        let wait = BoundedWait::new(timeout, self.descriptor.poll_interval());

        let mut last: Option<String> = None;
        let mut stable_since = tokio::time::Instant::now();
        let mut output_seen = false;

        loop {
            self.check_error_banner(driver).await?;

            let current = self.peek_output(driver).await?;
            match current.as_deref() {
                None if output_seen => {
                    // The element existed and then vanished
                    return Err(self.missing(driver, &locators.output).await);
                }
                None => {
                    if self.on_login_page(driver).await {
                        return Err(self.missing(driver, &locators.output).await);
                    }
                }
                Some(text) => {
                    output_seen = true;
                    if !text.trim().is_empty() && Some(text) != baseline {
                        let busy = match &locators.busy {
                            Some(busy) => driver.is_present(busy).await?,
                            None => false,
                        };

                        let done = match &locators.completion {
                            Some(marker) => !busy && driver.is_present(marker).await?,
                            None => {
                                if current != last {
                                    stable_since = tokio::time::Instant::now();
                                }
                                !busy && stable_since.elapsed() >= window
                            }
                        };

                        if done {
                            debug!(
                                service = %self.service(),
                                elapsed_ms = wait.elapsed().as_millis() as u64,
                                "Response complete"
                            );
                            return Ok(text.trim().to_string());
                        }
                    }
                }
            }
            last = current;

            if !wait.tick(cancel).await? {
                if !output_seen {
                    return Err(self.missing(driver, &locators.output).await);
                }
                return Err(self.timed_out_or_lost(driver, timeout).await);
            }
        }
    }

    async fn check_error_banner(&self, driver: &mut dyn SessionDriver) -> Result<()> {
        let Some(banner) = &self.descriptor.locators.error_banner else {
            return Ok(());
        };
        if let Some(message) = driver.read_text(banner).await? {
            let message = message.trim();
            if !message.is_empty() {
                return Err(Error::ServiceReported {
                    service: self.service().to_string(),
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn on_login_page(&self, driver: &mut dyn SessionDriver) -> bool {
        match driver.current_url().await {
            Ok(url) => self.descriptor.is_login_url(&url),
            Err(_) => false,
        }
    }

    /// A missing element on a login page means the session was signed out
    async fn missing(&self, driver: &mut dyn SessionDriver, locator: &Locator) -> Error {
        if self.on_login_page(driver).await {
            return Error::AuthenticationRequired {
                service: self.service().to_string(),
                reason: "redirected to login page".to_string(),
            };
        }
        Error::element(locator)
    }

    async fn timed_out_or_lost(&self, driver: &mut dyn SessionDriver, after: Duration) -> Error {
        if self.on_login_page(driver).await {
            return Error::AuthenticationRequired {
                service: self.service().to_string(),
                reason: "redirected to login page".to_string(),
            };
        }
        Error::ResponseTimeout {
            service: self.service().to_string(),
            after,
        }
    }
}
