//! Built-in prompt templates
//!
//! [`PromptCatalog`] holds the prompts served through `prompts/list` and
//! `prompts/get`. Templates use `{{name}}` placeholders; rendering fails
//! with a protocol error when the prompt is unknown or a required argument
//! is missing. Optional arguments that were not supplied render as empty.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{QuerywireError, Result};
use crate::mcp::types::{Content, GetPromptResult, Prompt, PromptArgument, PromptMessage, Role};

#[derive(Debug, Clone)]
struct PromptTemplate {
    prompt: Prompt,
    body: &'static str,
}

/// Catalog of prompt templates.
#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    templates: Vec<PromptTemplate>,
}

fn argument(name: &str, description: &str, required: bool) -> PromptArgument {
    PromptArgument {
        name: name.to_string(),
        description: Some(description.to_string()),
        required,
    }
}

/// Substitute `{{name}}` placeholders in one pass over `body`. Inserted
/// values are never scanned again, and unknown placeholders stay as written.
fn fill(body: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after
            .find("}}")
            .and_then(|end| values.get(&after[..end]).map(|v| (end, v)))
        {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

impl PromptCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with `analyze_table`, `summarize_query` and `explore_schema`.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add(
            Prompt {
                name: "analyze_table".into(),
                description: Some("Inspect a table's structure and suggest useful queries".into()),
                arguments: vec![
                    argument("table_name", "Table to analyze", true),
                    argument("focus", "Aspect to concentrate on", false),
                ],
            },
            "Use describe_table on '{{table_name}}' and explain what each column \
             stores. Then propose three read-only SELECT queries that would give \
             useful insight into the data. Focus: {{focus}}",
        );
        catalog.add(
            Prompt {
                name: "summarize_query".into(),
                description: Some("Run a query and summarize its result".into()),
                arguments: vec![argument("query", "SELECT statement to run", true)],
            },
            "Run the following statement with execute_query and summarize the \
             rows it returns in plain language, pointing out totals and \
             outliers:\n\n{{query}}",
        );
        catalog.add(
            Prompt {
                name: "explore_schema".into(),
                description: Some("Walk through every table in the database".into()),
                arguments: vec![],
            },
            "Call get_tables, then describe_table for each table returned, and \
             produce a short overview of the schema and how the tables relate.",
        );
        catalog
    }

    /// Add a template. Lookups return the first template with a matching
    /// name.
    pub fn add(&mut self, prompt: Prompt, body: &'static str) {
        self.templates.push(PromptTemplate { prompt, body });
    }

    /// Descriptors for `prompts/list`.
    pub fn list(&self) -> Vec<Prompt> {
        self.templates.iter().map(|t| t.prompt.clone()).collect()
    }

    /// Render prompt `name` with `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Protocol`] for an unknown prompt or a
    /// missing required argument.
    pub fn render(&self, name: &str, arguments: &Map<String, Value>) -> Result<GetPromptResult> {
        let template = self
            .templates
            .iter()
            .find(|t| t.prompt.name == name)
            .ok_or_else(|| QuerywireError::Protocol(format!("Unknown prompt: {name}")))?;

        let mut values = HashMap::new();
        for arg in &template.prompt.arguments {
            let value = match arguments.get(&arg.name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None if arg.required => {
                    return Err(QuerywireError::Protocol(format!(
                        "Missing required argument '{}' for prompt {name}",
                        arg.name
                    ))
                    .into());
                }
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            values.insert(arg.name.as_str(), value);
        }
        let text = fill(template.body, &values);

        Ok(GetPromptResult {
            description: template.prompt.description.clone(),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(text),
            }],
        })
    }
}
