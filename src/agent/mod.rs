pub mod evaluation;
pub mod extract;
pub mod recipe_agent;
pub mod types;

pub use evaluation::EvaluationAgent;
pub use extract::{extract_json, Extraction};
pub use recipe_agent::{AgentError, RecipeAgent};
pub use types::{AgentResponse, Message, Role, TextResponse, ToolResponse};
