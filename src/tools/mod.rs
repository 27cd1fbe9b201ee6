//! Tools the recipe agent can call, and the registry it owns them through.
//!
//! A tool is described to the model in the system prompt (signature,
//! description, worked example) and invoked with the JSON object the model
//! writes after a `Call <name>:` marker.

pub mod access_memory;
pub mod query_vectordb;
pub mod scrape_web_recipe;
pub mod substitution_filter;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use access_memory::AccessMemory;
pub use query_vectordb::QueryVectorDb;
pub use scrape_web_recipe::ScrapeWebRecipe;
pub use substitution_filter::{fuzzy_ratio, substitution_filter, SubstitutionFilter};

/// Keyword arguments as parsed from the model's JSON block.
pub type ToolArguments = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("Tool failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ToolFunction: Send + Sync {
    async fn call(&self, arguments: &ToolArguments) -> Result<Value, ToolError>;
}

pub fn required_str<'a>(arguments: &'a ToolArguments, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string argument '{}'", key)))
}

pub fn optional_usize(arguments: &ToolArguments, key: &str, default: usize) -> Result<usize, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' must be a non-negative integer", key))),
    }
}

pub fn string_list(arguments: &ToolArguments, key: &str) -> Result<Vec<String>, ToolError> {
    let invalid = || ToolError::InvalidArguments(format!("'{}' must be a list of strings", key));
    match arguments.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        // A lone string is read as a one-element list.
        Some(Value::String(single)) => Ok(vec![single.clone()]),
        _ => Err(invalid()),
    }
}

#[derive(Clone)]
pub struct ToolDescription {
    pub name: String,
    pub signature: String,
    pub description: String,
    pub example_json: String,
    pub function: Arc<dyn ToolFunction>,
}

impl ToolDescription {
    pub fn new(
        name: impl Into<String>,
        signature: impl Into<String>,
        description: impl Into<String>,
        example_json: impl Into<String>,
        function: Arc<dyn ToolFunction>,
    ) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            description: description.into(),
            example_json: example_json.into(),
            function,
        }
    }

    /// How the tool is presented in the system prompt.
    pub fn get_prompt(&self) -> String {
        format!(
            "{}: {}\nExample:\n{}",
            self.signature, self.description, self.example_json
        )
    }

    /// Literal text that signals the model wants this tool.
    pub fn call_marker(&self) -> String {
        format!("Call {}", self.name)
    }
}

impl fmt::Debug for ToolDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescription")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Ordered set of tools. Order matters: simultaneous calls are resolved in
/// registry order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescription>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolDescription>) -> anyhow::Result<Self> {
        for (i, tool) in tools.iter().enumerate() {
            if tools[..i].iter().any(|earlier| earlier.name == tool.name) {
                anyhow::bail!("Duplicate tool name '{}'", tool.name);
            }
        }
        Ok(Self { tools })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescription> {
        self.tools.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescription> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name.as_str())
    }

    pub fn format_descriptions(&self) -> String {
        self.tools
            .iter()
            .map(ToolDescription::get_prompt)
            .collect::<Vec<_>>()
            .join("\n-")
    }

    /// Tools whose marker appears anywhere in `text`, in registry order.
    pub fn detect_calls(&self, text: &str) -> Vec<&ToolDescription> {
        self.tools
            .iter()
            .filter(|tool| text.contains(&tool.call_marker()))
            .collect()
    }
}

/// The four standard tools, described exactly as the model is taught them.
pub fn default_registry(
    query_vectordb: QueryVectorDb,
    substitution_filter: SubstitutionFilter,
    scrape_web_recipe: ScrapeWebRecipe,
    access_memory: AccessMemory,
) -> ToolRegistry {
    ToolRegistry {
        tools: vec![
            ToolDescription::new(
                "query_vectordb",
                "query_vectordb(query: str, n_results=1)",
                "This function searches a vector database for recipes similar to the query argument.",
                "Call query_vectordb:\n```json\n{\n\"query\": \"banana bread recipe\"\n}\n```",
                Arc::new(query_vectordb),
            ),
            ToolDescription::new(
                "substitution_filter",
                "substitution_filter(to_replace: list[str])",
                "This function searches for ingredient alternatives based on a list of ingredients to be substituted. \
                 Only the ingredients to substitute should be provided as arguments.",
                "Call substitution_filter:\n```json\n{\n\"to_replace\": [\"eggs\", \"flour\"]\n}\n```",
                Arc::new(substitution_filter),
            ),
            ToolDescription::new(
                "scrape_web_recipe",
                "scrape_web_recipe(link: str)",
                "This function scrapes the recipe at the provided link. Use when a user provides a recipe link.",
                "Call scrape_web_recipe:\n```json\n{\n\"link\": \"https://www.allrecipes.com/lemon-garlic-butter\"\n}\n```",
                Arc::new(scrape_web_recipe),
            ),
            ToolDescription::new(
                "access_memory",
                "access_memory(query: str, n_results=1)",
                "This function retrieves the most similar previous agent-user conversation for context.",
                "Call access_memory:\n```json\n{\n\"query\": \"eggless banana bread recipe\"\n}\n```",
                Arc::new(access_memory),
            ),
        ],
    }
}
