use serde::Deserialize;
use serde_json::Value;

use super::{Manager, ManagerError, ManagerId};
use crate::types::ConversationState;

/// Manager-data key holding the rendered persona text.
pub const BASE_PERSONALITY: &str = "base_personality";

/// Static character sheet. Loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub bio: Vec<String>,
    #[serde(default)]
    pub lore: Vec<String>,
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl Persona {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Minimal persona when no character file is configured.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Render as prompt text. Empty lists are left out.
    pub fn render(&self) -> String {
        let mut out = format!("Your name is {}.", self.name);
        let blocks: [(&str, &[String]); 5] = [
            ("About you", &self.bio),
            ("Background", &self.lore),
            ("How you write", &self.style),
            ("Topics you care about", &self.topics),
            ("Example posts", &self.examples),
        ];
        for (title, lines) in blocks {
            if lines.is_empty() {
                continue;
            }
            out.push_str(&format!("\n\n{title}:"));
            for line in lines {
                out.push_str(&format!("\n- {line}"));
            }
        }
        out
    }
}

pub struct PersonalityManager {
    persona: Persona,
}

impl PersonalityManager {
    pub fn new(persona: Persona) -> Self {
        Self { persona }
    }
}

#[async_trait::async_trait]
impl Manager for PersonalityManager {
    fn id(&self) -> ManagerId {
        ManagerId::Personality
    }

    async fn context(&self, _state: &ConversationState) -> Result<Vec<(String, Value)>, ManagerError> {
        Ok(vec![(BASE_PERSONALITY.to_owned(), Value::String(self.persona.render()))])
    }
}
