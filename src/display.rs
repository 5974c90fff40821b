//! On-screen text output used when speech is unavailable

use std::time::Duration;

use async_trait::async_trait;

/// Minimum time a fallback bubble stays visible
const MIN_HOLD: Duration = Duration::from_millis(3000);

/// Extra hold per character of text
const PER_CHAR_HOLD: Duration = Duration::from_millis(60);

/// How long `text` should stay on screen
#[must_use]
pub fn fallback_hold(text: &str) -> Duration {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    MIN_HOLD.max(PER_CHAR_HOLD.saturating_mul(chars))
}

/// Somewhere to show text in place of speech
#[async_trait]
pub trait TextDisplay: Send + Sync {
    /// Show `text` and resolve once it has been visible for `hold`
    async fn show(&self, text: &str, hold: Duration);
}

/// Prints a speech bubble to stdout
#[derive(Debug, Clone, Copy)]
pub struct TerminalDisplay {
    /// Whether to wait out the hold time before returning
    pub wait: bool,
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self { wait: true }
    }
}

#[async_trait]
impl TextDisplay for TerminalDisplay {
    async fn show(&self, text: &str, hold: Duration) {
        println!("  ( {text} )");
        if self.wait {
            tokio::time::sleep(hold).await;
        }
    }
}
