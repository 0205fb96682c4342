//! Prompt templates: named text files referenced by `system.tool_prompts`,
//! plus the generated MCP prompt addendum used in prompt mode.

use std::collections::HashMap;
use std::path::PathBuf;

use aria_domain::tool::ToolDefinition;

const DEFAULT_PROACTIVE_PROMPT: &str = "Please say something.";

#[derive(Clone)]
pub struct PromptRegistry {
    dir: PathBuf,
    mapping: HashMap<String, String>,
}

impl PromptRegistry {
    pub fn new(dir: impl Into<PathBuf>, mapping: HashMap<String, String>) -> Self {
        Self {
            dir: dir.into(),
            mapping,
        }
    }

    /// Load a named template. Returns None when unmapped or unreadable.
    pub fn load(&self, name: &str) -> Option<String> {
        let file = self.mapping.get(name)?;
        match std::fs::read_to_string(self.dir.join(file)) {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                tracing::warn!(prompt = %name, file = %file, error = %e, "failed to load prompt template");
                None
            }
        }
    }

    /// The synthetic input used for `ai-speak-signal` turns.
    pub fn proactive_speak_prompt(&self) -> String {
        self.load("proactive_speak_prompt")
            .unwrap_or_else(|| DEFAULT_PROACTIVE_PROMPT.to_string())
    }
}

/// Build the system-prompt addendum that teaches a tool-less model to call
/// tools by emitting a JSON envelope in its text.
pub fn build_mcp_prompt(definitions: &[ToolDefinition]) -> String {
    if definitions.is_empty() {
        return String::new();
    }

    let mut prompt = String::from(
        "You have access to the following tools. To call one or more tools, \
         reply with ONLY a JSON array of objects, each shaped like \
         {\"name\": \"<tool name>\", \"args\": {...}}. \
         Do not wrap the JSON in code fences or add commentary around it.\n\nTools:\n",
    );
    for def in definitions {
        prompt.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            def.name, def.description, def.parameters
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_mapped_template_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("speak.txt"), "Say hello!\n").unwrap();

        let mapping = HashMap::from([(
            "proactive_speak_prompt".to_string(),
            "speak.txt".to_string(),
        )]);
        let registry = PromptRegistry::new(dir.path(), mapping);
        assert_eq!(registry.proactive_speak_prompt(), "Say hello!");
    }

    #[test]
    fn missing_mapping_falls_back_to_default() {
        let registry = PromptRegistry::new("/tmp", HashMap::new());
        assert_eq!(registry.proactive_speak_prompt(), DEFAULT_PROACTIVE_PROMPT);
    }

    #[test]
    fn mcp_prompt_lists_every_tool() {
        let defs = vec![
            ToolDefinition {
                name: "get_time".into(),
                description: "Current time".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            ToolDefinition {
                name: "get_weather".into(),
                description: "Weather lookup".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        ];
        let prompt = build_mcp_prompt(&defs);
        assert!(prompt.contains("get_time"));
        assert!(prompt.contains("get_weather"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn no_tools_means_no_prompt() {
        assert!(build_mcp_prompt(&[]).is_empty());
    }
}
