//! Keyless reply provider
//!
//! Answers from a small keyword table and falls back to canned fox lines.
//! Selected when no chat API key is configured, so the companion still
//! talks back.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;

use super::{ChatProvider, ChatRequest};
use crate::Result;

/// Pause before answering, so replies don't feel instant
pub const THINKING_DELAY: Duration = Duration::from_secs(1);

/// Keyword phrase and reply, checked in order
///
/// `{name}`, `{time}` and `{date}` are filled in when the reply is made.
const KEYWORD_REPLIES: &[(&str, &str)] = &[
    ("hello", "Hello there! How can I help you today?"),
    ("hi", "Hi! I'm your friendly fox companion. What can I do for you?"),
    ("how are you", "I'm doing great, thanks for asking! How about you?"),
    ("help", "I'd be happy to help! I can chat with you, answer questions, or just keep you company."),
    ("fox", "As a digital fox, I'm quite different from my wild cousins. But I still have a bushy tail... in spirit!"),
    ("name", "You can call me {name}! I'm your friendly digital fox."),
    ("weather", "I can't check the weather while I'm offline, but I hope it's sunny where you are!"),
    ("time", "The current time is {time}."),
    ("date", "Today is {date}."),
    ("thanks", "You're very welcome! Anything else I can help with?"),
    ("thank you", "You're very welcome! Anything else I can help with?"),
    ("bye", "Goodbye! Come back soon to chat more!"),
    ("goodbye", "Goodbye! Come back soon to chat more!"),
];

const CANNED_REPLIES: &[&str] = &[
    "Hello! I'm your friendly fox companion. How can I help you today?",
    "I'm running offline for now, but I'll be smarter once I'm connected!",
    "What a lovely day to be a digital fox! How are you feeling?",
    "I'm listening carefully to everything you say. What else would you like to talk about?",
    "If I were a real fox, I'd probably be sniffing around for mice right now.",
    "Did you know foxes make 40 different sounds? I only need my voice to chat with you!",
    "I'm still learning, but I'm excited to chat with you!",
    "Fox fact: foxes have whiskers on their legs that help them find their way.",
    "I'm all ears... well, digital ears anyway! What can I do for you?",
];

/// [`ChatProvider`] that needs no network or key
#[derive(Debug, Clone)]
pub struct OfflineChat {
    name: String,
    delay: Duration,
}

impl OfflineChat {
    /// Responder that introduces itself as `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: THINKING_DELAY,
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reply to `input`: the first matching keyword, else a canned line
    #[must_use]
    pub fn respond<R: Rng + ?Sized>(&self, input: &str, rng: &mut R) -> String {
        self.keyword_reply(input).unwrap_or_else(|| {
            CANNED_REPLIES
                .choose(rng)
                .copied()
                .unwrap_or_default()
                .to_string()
        })
    }

    fn keyword_reply(&self, input: &str) -> Option<String> {
        let lower = input.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let (_, reply) = KEYWORD_REPLIES
            .iter()
            .find(|(phrase, _)| contains_phrase(&words, phrase))?;

        let now = chrono::Local::now();
        Some(
            reply
                .replace("{name}", &self.name)
                .replace("{time}", &now.format("%H:%M").to_string())
                .replace("{date}", &now.format("%A, %B %-d").to_string()),
        )
    }
}

/// Whether `phrase` appears in `words` as whole consecutive words
fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let phrase: Vec<&str> = phrase.split(' ').collect();
    words.windows(phrase.len()).any(|w| w == phrase.as_slice())
}

#[async_trait]
impl ChatProvider for OfflineChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let input = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or("", |m| m.content.as_str());

        let reply = self.respond(input, &mut rand::thread_rng());
        tracing::debug!(input_len = input.len(), "offline reply");

        tokio::time::sleep(self.delay).await;
        Ok(reply)
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::chat::ChatMessage;

    fn fox() -> OfflineChat {
        OfflineChat::new("Nicolas").with_delay(Duration::ZERO)
    }

    #[test]
    fn test_keyword_reply() {
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(fox().respond("Hello, little fox!", &mut rng), "Hello there! How can I help you today?");
        assert_eq!(
            fox().respond("so... how ARE you?", &mut rng),
            "I'm doing great, thanks for asking! How about you?"
        );
        assert!(fox().respond("What's your name?", &mut rng).contains("Nicolas"));
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "this" must not count as "hi"
        let mut rng = StdRng::seed_from_u64(7);
        let reply = fox().respond("this is it", &mut rng);
        assert!(CANNED_REPLIES.contains(&reply.as_str()));
    }

    #[test]
    fn test_time_is_filled_in() {
        let mut rng = StdRng::seed_from_u64(7);
        let reply = fox().respond("what time is it", &mut rng);
        assert!(reply.starts_with("The current time is "));
        assert!(!reply.contains('{'));
    }

    #[test]
    fn test_fallback_is_canned() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let reply = fox().respond("quantum chromodynamics", &mut rng);
            assert!(CANNED_REPLIES.contains(&reply.as_str()), "{reply}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_answers_last_user_message_after_a_pause() {
        let chat = OfflineChat::new("Nicolas");
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are Nicolas.".to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: "bye now".to_string(),
                },
            ],
            max_tokens: 300,
        };

        let start = tokio::time::Instant::now();
        let reply = chat.complete(&request).await.unwrap();

        assert_eq!(reply, "Goodbye! Come back soon to chat more!");
        assert!(start.elapsed() >= THINKING_DELAY);
    }
}
