//! Scripted in-memory service for tests
//!
//! [`FakeService`] simulates one chat-style web service: a login page, an
//! optional one-time code step, and a chat page whose answer element is
//! driven by a queue of scripted [`Reply`] values. [`FakeLauncher`] opens
//! drivers against a set of fake services and counts concurrent sessions.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{
    AuthConfig, DispatchConfig, EngineConfig, HealthConfig, ProfilesConfig, ReportsConfig,
    ValidationConfig,
};
use crate::descriptor::{Locator, Locators, ServiceDescriptor};
use crate::driver::{DriverLauncher, LaunchRequest, SessionDriver, StealthProfile};
use crate::error::{Error, Result};
use crate::manager::LocalProcessor;

const INPUT: &str = "#prompt";
const SEND: &str = "#send";
const ANSWER: &str = ".answer";
const BANNER: &str = ".error";
const ACCOUNT: &str = "#account";
const USERNAME: &str = "#user";
const PASSWORD: &str = "#pass";
const LOGIN: &str = "#login";
const OTP: &str = "#otp";
const OTP_SUBMIT: &str = "#otp-submit";

/// Text shown in the answer area before any prompt is sent
pub const WELCOME: &str = "Hi! How can I help you today?";

/// Scripted reaction to one prompt submission
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer appears at once
    Text(String),
    /// Answer grows by one chunk per read, then stays put
    Streaming(Vec<String>),
    /// Nothing ever appears
    Silent,
    /// The answer element disappears from the page
    Vanish,
    /// The service shows an error banner
    Banner(String),
}

#[derive(Debug)]
struct FakeState {
    id: String,
    authenticated: bool,
    current_url: String,
    username: String,
    password: String,
    otp_code: Option<String>,
    otp_pending: bool,
    typed: HashMap<String, String>,
    answer: Option<String>,
    answer_missing: bool,
    banner: Option<String>,
    pending_chunks: VecDeque<String>,
    replies: VecDeque<Reply>,
    prompts: Vec<String>,
    input_hidden: bool,
    drop_auth_on_submit: bool,
    fail_launch: bool,
    launches: usize,
    active: usize,
    peak_active: usize,
    closes: usize,
    logins: usize,
}

impl FakeState {
    fn home_url(&self) -> String {
        format!("https://{}.fake.test/chat", self.id)
    }

    fn login_url(&self) -> String {
        format!("https://{}.fake.test/login", self.id)
    }

    fn on_home(&self) -> bool {
        self.current_url.starts_with(&self.home_url())
    }

    fn on_login(&self) -> bool {
        self.current_url.starts_with(&self.login_url())
    }

    fn present(&self, locator: &str) -> bool {
        let chat = self.on_home() && self.authenticated;
        match locator {
            INPUT | SEND => chat && !self.input_hidden,
            ACCOUNT => chat,
            ANSWER => chat && self.answer.is_some() && !self.answer_missing,
            BANNER => self.banner.is_some(),
            USERNAME | PASSWORD | LOGIN => self.on_login() && !self.otp_pending,
            OTP | OTP_SUBMIT => self.on_login() && self.otp_pending,
            _ => false,
        }
    }

    fn submit(&mut self) {
        let prompt = self.typed.remove(INPUT).unwrap_or_default();
        self.prompts.push(prompt.clone());
        self.answer_missing = false;
        self.banner = None;

        if self.drop_auth_on_submit {
            self.drop_auth_on_submit = false;
            self.authenticated = false;
            self.current_url = self.login_url();
            return;
        }

        match self.replies.pop_front() {
            Some(Reply::Text(text)) => self.answer = Some(text),
            Some(Reply::Streaming(chunks)) => {
                let mut chunks: VecDeque<String> = chunks.into();
                self.answer = Some(chunks.pop_front().unwrap_or_default());
                self.pending_chunks = chunks;
            }
            Some(Reply::Silent) => {}
            Some(Reply::Vanish) => self.answer_missing = true,
            Some(Reply::Banner(message)) => self.banner = Some(message),
            None => self.answer = Some(format!("Echo: {}", prompt)),
        }
    }

    fn login(&mut self) {
        self.logins += 1;
        let user_ok = self.typed.get(USERNAME) == Some(&self.username);
        let pass_ok = self.typed.get(PASSWORD) == Some(&self.password);
        if !(user_ok && pass_ok) {
            self.banner = Some("Invalid credentials".to_string());
            return;
        }
        if self.otp_code.is_some() {
            self.otp_pending = true;
        } else {
            self.authenticated = true;
            let home = self.home_url();
            self.current_url = home;
        }
    }

    fn submit_otp(&mut self) {
        if self.otp_code.is_some() && self.typed.get(OTP) == self.otp_code.as_ref() {
            self.otp_pending = false;
            self.authenticated = true;
            let home = self.home_url();
            self.current_url = home;
        } else {
            self.banner = Some("Invalid code".to_string());
        }
    }
}

/// One simulated web service
#[derive(Debug, Clone)]
pub struct FakeService {
    state: Arc<Mutex<FakeState>>,
}

impl FakeService {
    /// Authenticated service with credentials `user` / `secret`
    pub fn new(id: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                id: id.to_string(),
                authenticated: true,
                current_url: "about:blank".to_string(),
                username: "user".to_string(),
                password: "secret".to_string(),
                otp_code: None,
                otp_pending: false,
                typed: HashMap::new(),
                answer: None,
                answer_missing: false,
                banner: None,
                pending_chunks: VecDeque::new(),
                replies: VecDeque::new(),
                prompts: Vec::new(),
                input_hidden: false,
                drop_auth_on_submit: false,
                fail_launch: false,
                launches: 0,
                active: 0,
                peak_active: 0,
                closes: 0,
                logins: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Service identifier
    pub fn id(&self) -> String {
        self.state().id.clone()
    }

    /// Descriptor matching this fake's pages and locators
    pub fn descriptor(&self) -> ServiceDescriptor {
        let id = self.id();
        ServiceDescriptor {
            id: id.clone(),
            display_name: None,
            home_url: format!("https://{}.fake.test/chat", id),
            login_url: Some(format!("https://{}.fake.test/login", id)),
            authenticated_url_patterns: vec![format!(r"^https://{}\.fake\.test/chat", id)],
            login_url_patterns: vec!["/login".to_string()],
            auth_indicators: vec![Locator::new(ACCOUNT)],
            otp_destination: Some(format!("{}@fake.test", id)),
            credentials_ref: Some(id.to_uppercase()),
            locators: Locators {
                input: Locator::new(INPUT),
                submit: Locator::new(SEND),
                output: Locator::new(ANSWER),
                completion: None,
                busy: None,
                error_banner: Some(Locator::new(BANNER)),
                login_username: Some(Locator::new(USERNAME)),
                login_password: Some(Locator::new(PASSWORD)),
                login_submit: Some(Locator::new(LOGIN)),
                otp_input: Some(Locator::new(OTP)),
                otp_submit: Some(Locator::new(OTP_SUBMIT)),
            },
            response_timeout_secs: 5,
            submit_timeout_secs: 2,
            stability_window_ms: 60,
            poll_interval_ms: 20,
        }
    }

    /// Start signed out
    #[must_use]
    pub fn signed_out(self) -> Self {
        self.state().authenticated = false;
        self
    }

    /// Require a one-time code after the password step
    #[must_use]
    pub fn with_otp(self, code: &str) -> Self {
        self.state().otp_code = Some(code.to_string());
        self
    }

    /// Queue a scripted reply
    pub fn push_reply(&self, reply: Reply) {
        self.state().replies.push_back(reply);
    }

    /// Hide the prompt input (UI drift)
    pub fn hide_input(&self, hidden: bool) {
        self.state().input_hidden = hidden;
    }

    /// Sign the session out on the next submission
    pub fn drop_auth_on_next_submit(&self) {
        self.state().drop_auth_on_submit = true;
    }

    /// Expire the signed-in state
    pub fn sign_out(&self) {
        let mut state = self.state();
        state.authenticated = false;
        state.otp_pending = false;
    }

    /// Make launches fail
    pub fn fail_launch(&self, fail: bool) {
        self.state().fail_launch = fail;
    }

    /// Whether the fake is signed in
    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    /// Prompts submitted so far
    pub fn prompts(&self) -> Vec<String> {
        self.state().prompts.clone()
    }

    /// Driver launches so far
    pub fn launches(&self) -> usize {
        self.state().launches
    }

    /// Open drivers right now
    pub fn active(&self) -> usize {
        self.state().active
    }

    /// Highest number of simultaneously open drivers
    pub fn peak_active(&self) -> usize {
        self.state().peak_active
    }

    /// Driver closes so far
    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Login form submissions so far
    pub fn logins(&self) -> usize {
        self.state().logins
    }
}

/// Driver bound to one [`FakeService`]
#[derive(Debug)]
pub struct FakeDriver {
    service: FakeService,
    closed: bool,
}

#[async_trait]
impl SessionDriver for FakeDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let mut state = self.service.state();
        let target = if url.starts_with(&state.home_url()) && !state.authenticated {
            state.login_url()
        } else {
            url.to_string()
        };
        state.current_url = target;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.service.state().current_url.clone())
    }

    async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
        Ok(self.service.state().present(locator.as_str()))
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<Option<String>> {
        let mut state = self.service.state();
        if !state.present(locator.as_str()) {
            return Ok(None);
        }
        match locator.as_str() {
            ANSWER => {
                if let Some(chunk) = state.pending_chunks.pop_front() {
                    if let Some(answer) = state.answer.as_mut() {
                        answer.push_str(&chunk);
                    }
                }
                Ok(state.answer.clone())
            }
            BANNER => Ok(state.banner.clone()),
            _ => Ok(Some(String::new())),
        }
    }

    async fn fill(&mut self, locator: &Locator, text: &str, _keystroke_delay: Duration) -> Result<()> {
        let mut state = self.service.state();
        if !state.present(locator.as_str()) {
            return Err(Error::element(locator));
        }
        state.typed.insert(locator.as_str().to_string(), text.to_string());
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        let mut state = self.service.state();
        if !state.present(locator.as_str()) {
            return Err(Error::element(locator));
        }
        match locator.as_str() {
            SEND => state.submit(),
            LOGIN => state.login(),
            OTP_SUBMIT => state.submit_otp(),
            _ => {}
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.service.state();
            state.active = state.active.saturating_sub(1);
            state.closes += 1;
        }
        Ok(())
    }
}

/// Launcher over a set of fake services
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    services: HashMap<String, FakeService>,
}

impl FakeLauncher {
    /// Empty launcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service
    #[must_use]
    pub fn with_service(mut self, service: FakeService) -> Self {
        self.services.insert(service.id(), service);
        self
    }
}

#[async_trait]
impl DriverLauncher for FakeLauncher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SessionDriver>> {
        let service = self
            .services
            .get(&request.service_id)
            .cloned()
            .ok_or_else(|| Error::Driver(format!("no fake for '{}'", request.service_id)))?;
        {
            let mut state = service.state();
            if state.fail_launch {
                return Err(Error::Driver("browser failed to start".to_string()));
            }
            state.launches += 1;
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
            state.current_url = "about:blank".to_string();
            state.answer = Some(WELCOME.to_string());
            state.answer_missing = false;
            state.pending_chunks.clear();
            state.banner = None;
            state.typed.clear();
        }
        Ok(Box::new(FakeDriver {
            service,
            closed: false,
        }))
    }
}

/// Engine configuration for a set of fake services.
///
/// Profiles and reports live under `root`; timings are short and pacing
/// is disabled.
pub fn fake_config(root: &Path, services: &[&FakeService]) -> EngineConfig {
    EngineConfig {
        profiles: ProfilesConfig {
            root: root.join("profiles"),
            lock_wait_secs: 5,
            ..ProfilesConfig::default()
        },
        dispatch: DispatchConfig {
            default_timeout_secs: 2,
            max_retries: 1,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
            setup_timeout_secs: 10,
        },
        validation: ValidationConfig {
            budget_ms: 2_000,
            strategy_timeout_ms: 500,
            settle_ms: 10,
        },
        auth: AuthConfig {
            login_step_secs: 1,
            otp_prompt_wait_ms: 200,
            otp_window_secs: 30,
            otp_max_polls: 3,
            otp_poll_interval_ms: 10,
        },
        health: HealthConfig {
            enabled: true,
            interval_secs: 1,
        },
        reports: ReportsConfig {
            enabled: true,
            dir: root.join("reports"),
        },
        stealth: StealthProfile::instant(),
        services: services.iter().map(|s| s.descriptor()).collect(),
        ..EngineConfig::default()
    }
}

/// Local processor answering with a fixed text
#[derive(Debug, Clone, Default)]
pub struct FakeLocalProcessor {
    answer: String,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeLocalProcessor {
    /// Processor answering `answer`
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Arc::default(),
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LocalProcessor for FakeLocalProcessor {
    async fn process(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        Ok(self.answer.clone())
    }
}
