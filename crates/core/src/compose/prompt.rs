use crate::types::ConversationState;

/// Ordered prompt sections with `{{key}}` placeholders, resolved against a
/// conversation state. Sections are joined with blank lines; sections that
/// render empty are dropped.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, template: impl Into<String>) -> Self {
        self.sections.push(template.into());
        self
    }

    pub fn sections<I, S>(self, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        templates.into_iter().fold(self, Self::section)
    }

    pub fn render(&self, state: &ConversationState) -> String {
        self.sections
            .iter()
            .map(|s| substitute(s, state))
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Replace every `{{key}}` with the state's value for `key`.
/// Unknown keys become empty text; an unterminated `{{` is kept literally.
pub fn substitute(template: &str, state: &ConversationState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                out.push_str(&state.lookup(key).unwrap_or_default());
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentIdentity, Fragment};

    fn state() -> ConversationState {
        let mut s = ConversationState::new(Fragment::seed(&AgentIdentity::new("hana", "hana_bot")));
        s.add_custom_data("agent_name", "hana");
        s.set_manager_data("topic", serde_json::Value::String("markets".into()));
        s
    }

    #[test]
    fn placeholders_resolve_from_both_sources() {
        let s = state();
        assert_eq!(substitute("I am {{agent_name}}, into {{ topic }}.", &s), "I am hana, into markets.");
    }

    #[test]
    fn unknown_keys_render_empty() {
        assert_eq!(substitute("[{{nope}}]", &state()), "[]");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute("a {{b", &state()), "a {{b");
    }

    #[test]
    fn empty_sections_are_dropped() {
        let prompt = PromptBuilder::new()
            .section("first {{agent_name}}")
            .section("{{missing}}")
            .section("last")
            .render(&state());
        assert_eq!(prompt, "first hana\n\nlast");
    }
}
