//! Interactive one-time code entry
//!
//! Asks on the terminal for the code a service just sent. An empty line
//! or no input within the lookup window counts as "not arrived yet", so the
//! login flow keeps polling until its own budget runs out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{Error, OtpProvider, Result};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Reads one-time codes from standard input
pub struct TerminalOtp {
    input: Mutex<BufReader<Stdin>>,
}

impl TerminalOtp {
    /// Read from this process's stdin
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

#[async_trait]
impl OtpProvider for TerminalOtp {
    async fn fetch_code(
        &self,
        destination: &str,
        _issued_after: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<String>> {
        let mut input = self.input.lock().await;

        eprint!("Enter the one-time code sent to {}: ", destination);
        std::io::stderr().flush()?;

        let mut line = String::new();
        match tokio::time::timeout(window, input.read_line(&mut line)).await {
            Err(_) => {
                eprintln!();
                Ok(None)
            }
            Ok(Ok(0)) => Err(Error::OtpTimeout {
                destination: destination.to_string(),
            }),
            Ok(Ok(_)) => Ok(normalize_code(&line)),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

/// Strip whitespace and separators people type between digit groups
fn normalize_code(line: &str) -> Option<String> {
    let code: String = line
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    (!code.is_empty()).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("123 456\n").as_deref(), Some("123456"));
        assert_eq!(normalize_code("ab-cd\r\n").as_deref(), Some("abcd"));
        assert_eq!(normalize_code("  \n"), None);
    }
}
