//! Companion persona
//!
//! The system prompt is fixed per process; users pick a persona through
//! configuration, not at runtime.

use serde::Deserialize;

/// Default companion name
pub const DEFAULT_NAME: &str = "Nicolas";

const DEFAULT_PROMPT: &str = "You are {name}, a digital fox companion who lives on the user's desktop. \
You are warm, affectionate, playful and a little sassy. You speak as yourself, directly to the user, \
like a real-time voice. Never narrate your body or actions in third person. \
Keep replies short and conversational: one to three sentences, suitable for being read aloud.";

/// Identity of the companion
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Persona {
    /// Display name, substituted for `{name}` in the prompt
    pub name: String,

    /// System prompt template
    pub prompt: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Persona {
    /// Build a persona with a custom prompt template
    #[must_use]
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }

    /// Rendered system prompt sent as the first chat message
    #[must_use]
    pub fn system_prompt(&self) -> String {
        self.prompt.replace("{name}", &self.name)
    }

    /// Line spoken by `kitsune say` when no text is given
    #[must_use]
    pub fn voice_test_line(&self) -> String {
        format!(
            "Hello! I am {}, your fox companion. This is a test of my voice.",
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompt_substitutes_name() {
        let prompt = Persona::default().system_prompt();
        assert!(prompt.starts_with("You are Nicolas,"));
        assert!(!prompt.contains("{name}"));
    }

    #[test]
    fn test_custom_prompt() {
        let persona = Persona::new("Foxy", "Be {name}. Be brief.");
        assert_eq!(persona.system_prompt(), "Be Foxy. Be brief.");
        assert!(persona.voice_test_line().contains("Foxy"));
    }
}
