//! Pacing and fingerprint settings
//!
//! Actions are spaced by randomised delays and typing happens key by key.
//! The fingerprint fields are fixed per installation so a profile always
//! presents the same browser.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Human-like pacing and a stable browser fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealthProfile {
    /// Lower bound for the pause between actions, in milliseconds
    #[serde(default = "default_min_action_delay_ms")]
    pub min_action_delay_ms: u64,
    /// Upper bound for the pause between actions, in milliseconds
    #[serde(default = "default_max_action_delay_ms")]
    pub max_action_delay_ms: u64,
    /// Lower bound for the pause between keystrokes, in milliseconds
    #[serde(default = "default_min_keystroke_ms")]
    pub min_keystroke_ms: u64,
    /// Upper bound for the pause between keystrokes, in milliseconds
    #[serde(default = "default_max_keystroke_ms")]
    pub max_keystroke_ms: u64,
    /// User agent override
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Viewport width
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    /// Viewport height
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Browser locale
    #[serde(default = "default_locale")]
    pub locale: String,
    /// IANA timezone
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for StealthProfile {
    fn default() -> Self {
        Self {
            min_action_delay_ms: default_min_action_delay_ms(),
            max_action_delay_ms: default_max_action_delay_ms(),
            min_keystroke_ms: default_min_keystroke_ms(),
            max_keystroke_ms: default_max_keystroke_ms(),
            user_agent: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            locale: default_locale(),
            timezone: None,
        }
    }
}

impl StealthProfile {
    /// No pacing at all (tests, local relays)
    #[must_use]
    pub fn instant() -> Self {
        Self {
            min_action_delay_ms: 0,
            max_action_delay_ms: 0,
            min_keystroke_ms: 0,
            max_keystroke_ms: 0,
            ..Self::default()
        }
    }

    /// Random pause between two actions
    pub fn action_delay(&self) -> Duration {
        jitter(self.min_action_delay_ms, self.max_action_delay_ms)
    }

    /// Random pause between two keystrokes
    pub fn keystroke_delay(&self) -> Duration {
        jitter(self.min_keystroke_ms, self.max_keystroke_ms)
    }
}

fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

fn default_min_action_delay_ms() -> u64 {
    250
}

fn default_max_action_delay_ms() -> u64 {
    900
}

fn default_min_keystroke_ms() -> u64 {
    25
}

fn default_max_keystroke_ms() -> u64 {
    90
}

fn default_viewport_width() -> u32 {
    1366
}

fn default_viewport_height() -> u32 {
    864
}

fn default_locale() -> String {
    "en-US".to_string()
}
