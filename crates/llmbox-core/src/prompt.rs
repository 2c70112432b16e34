use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder replaced by the user's input inside a prompt template.
pub const INPUT_PLACEHOLDER: &str = "%1";

const DEFAULT_SYSTEM_PROMPT: &str = "You are {name}, a fully-capable Large Language Model personal assistant that can help with virtually anything.
The current date is {date}.
The current time is {time}.
For tabular information return it in Markdown format, do not return HTML.
";

const DEFAULT_TEMPLATE: &str = "### Instruction:
The prompt below is a question to answer, a task to complete, or a conversation
to respond to; decide which and write a response.

### Prompt:
%1
### Response: ";

/// Per-model prompt shape. Both parts fall back to built-in defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// May contain `{name}`, `{date}` and `{time}`.
    pub system_prompt: Option<String>,
    /// Must contain [`INPUT_PLACEHOLDER`]; otherwise the input is appended.
    pub prompt_template: Option<String>,
}

impl PromptTemplate {
    pub fn new(system_prompt: Option<String>, prompt_template: Option<String>) -> Self {
        Self {
            system_prompt,
            prompt_template,
        }
    }

    /// Build the full text handed to the engine.
    pub fn render(&self, name: &str, input: &str, now: DateTime<Utc>) -> String {
        let system = self
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .replace("{name}", name)
            .replace("{date}", &now.format("%A %B %d %Y").to_string())
            .replace("{time}", &now.format("%H:%M:%S UTC").to_string());

        let template = self.prompt_template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let body = if template.contains(INPUT_PLACEHOLDER) {
            template.replace(INPUT_PLACEHOLDER, input)
        } else {
            format!("{template}{input}")
        };

        if system.is_empty() {
            body
        } else if self.system_prompt.is_none() {
            format!("### System:\n{system}\n{body}")
        } else {
            format!("{system}\n{body}")
        }
    }
}
