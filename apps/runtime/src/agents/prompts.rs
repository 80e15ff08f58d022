// Prompt templates for LLM interactions
//
// Templates use `{{name}}` placeholders. Unknown placeholders are left as-is
// so a missing variable is visible in the rendered prompt.

use std::collections::HashMap;

/// Prompt template structure
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub system: String,
    pub user_template: String,
}

impl PromptTemplate {
    /// Render the user template with variables
    ///
    /// One left-to-right pass: substituted values are never scanned again.
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut rendered = String::with_capacity(self.user_template.len());
        let mut rest = self.user_template.as_str();

        while let Some(start) = rest.find("{{") {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                rendered.push_str(&rest[start..]);
                return rendered;
            };
            let key = &after[..end];
            match variables.get(key) {
                Some(value) => rendered.push_str(value),
                None => rendered.push_str(&rest[start..start + end + 4]),
            }
            rest = &after[end + 2..];
        }

        rendered.push_str(rest);
        rendered
    }
}

pub mod library {
    use super::PromptTemplate;

    /// Single-shot task execution by a completion worker
    pub fn task_execution() -> PromptTemplate {
        PromptTemplate {
            name: "task_execution".to_string(),
            version: "1.0.0".to_string(),
            system: "You are a focused worker agent in a larger team. \
                     Complete the task you are given and answer with the result only."
                .to_string(),
            user_template: "Task: {{title}}\n\
                            Type: {{task_type}}\n\n\
                            Input:\n\
                            {{payload}}"
                .to_string(),
        }
    }
}
