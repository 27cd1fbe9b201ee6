use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::extract::extract_json;
use super::types::{AgentResponse, Message, Role, TextResponse, ToolResponse};
use crate::api_connection::{ApiConnectionError, ChatBackend, ChatMessage};
use crate::config::AgentConfig;
use crate::memory::{self, SharedMemory};
use crate::tools::{ToolError, ToolRegistry};

pub const BASE_SYSTEM_PROMPT: &str = "You are a highly accurate recipe-writing agent that assists users in creating recipes tailored to their dietary restrictions. \
If no dietary restrictions are specified, proceed to create a recipe without requesting clarification, assuming a standard diet. \
To respond to a user query, you must:\n\
1. Make tool calls to retrieve additional information or substitutions, formatting arguments as well-structured JSON as specified in the tool description.\n\
2. Wait for and use the tool responses explicitly from the user before proceeding. Do NOT assume or hallucinate tool responses.\n\n\
Guidelines:\n\
- Only search substitutions for ingredients explicitly requested by the user.\n\
- After retrieving complete context from tool responses, create a recipe tailored to the user’s needs.\n\
- If no dietary restrictions are provided, generate a recipe assuming no restrictions.\n\
- You can only call each tool available once.\n\
- Include any URLs retrieved as a '## References' section in your recipe response.\n\n\
When making a tool call:\n\
- Start with 'Call function_name:' on a new line, where function_name is replaced.\n\
- Follow with a properly formatted JSON object as described in the tool's specifications.\n\n\
Give your response in Markdown format.";

pub const SUMMARY_PROMPT: &str = "You are an expert at distilling user queries into precise, concise strings for multi-turn agent interaction. \
Using only the information explicitly provided in the user's query, summarize:\n\
1. The core intent of the query.\n\
2. Any key details or parameters required to fulfill the request.\n\n\
Do not infer or assume additional context.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Backend(#[from] ApiConnectionError),
    #[error("Tool '{tool}' failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },
    #[error("Memory error: {0}")]
    Memory(#[source] anyhow::Error),
}

pub fn system_prompt(tools: &ToolRegistry) -> String {
    format!(
        "{}You have access to {} tools:\n\n{}",
        BASE_SYSTEM_PROMPT,
        tools.len(),
        tools.format_descriptions()
    )
}

/// Recipe-writing agent that resolves tool calls embedded in its own output.
///
/// Each turn keeps only the system prompt and the previous turn's last
/// message, then alternates generation and tool execution until the model
/// stops asking for tools or `max_internal_iteration` rounds have run. A tool
/// may be executed at most once per turn.
pub struct RecipeAgent {
    backend: Arc<dyn ChatBackend>,
    tools: ToolRegistry,
    memory: SharedMemory,
    config: AgentConfig,
    conversation: Vec<Message>,
    tool_results: BTreeMap<String, Value>,
}

impl RecipeAgent {
    /// Builds an agent and empties `memory`, so every agent starts without
    /// recollection of earlier sessions.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        tools: ToolRegistry,
        memory: SharedMemory,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        memory::lock(&memory)
            .and_then(|mut store| store.clear())
            .map_err(AgentError::Memory)?;

        let conversation = vec![Message::system(system_prompt(&tools))];
        Ok(Self {
            backend,
            tools,
            memory,
            config,
            conversation,
            tool_results: BTreeMap::new(),
        })
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// Results of the tools executed during the latest turn, by tool name.
    pub fn tool_results(&self) -> &BTreeMap<String, Value> {
        &self.tool_results
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn chat_completion(&self, messages: &[Message]) -> Result<String, AgentError> {
        let messages: Vec<ChatMessage> = messages.iter().map(ChatMessage::from).collect();
        Ok(self
            .backend
            .chat_completion(&messages, &self.config.model, self.config.temperature)
            .await?)
    }

    /// Handles one user turn. Returns the final text and every step taken,
    /// tool calls first, with the final text as the last step.
    pub async fn respond(
        &mut self,
        user_message: &str,
        add_to_memory: bool,
    ) -> Result<(TextResponse, Vec<AgentResponse>), AgentError> {
        let mut steps = Vec::new();
        self.tool_results.clear();

        if self.conversation.len() > 1 {
            let last = self.conversation.swap_remove(self.conversation.len() - 1);
            self.conversation.truncate(1);
            self.conversation.push(last);
        }
        self.conversation.push(Message::user(user_message));
        info!(transcript = self.conversation.len(), "Starting turn");

        let mut completion = self.chat_completion(&self.conversation).await?;
        self.conversation.push(Message::assistant(completion.clone()));

        let mut requested = self.tools.detect_calls(&completion);
        let mut iteration = 0;
        while !requested.is_empty() && iteration < self.config.max_internal_iteration {
            self.conversation.retain(|message| message.role != Role::Assistant);

            for tool in &requested {
                if self.tool_results.contains_key(&tool.name) {
                    debug!(tool = %tool.name, iteration, "Refusing repeated tool call");
                    self.conversation.push(Message::user(format!(
                        "Already executed {}. Do not use again.",
                        tool.name
                    )));
                    continue;
                }

                let Some(arguments) = extract_json(&completion, &tool.name, 0).into_arguments() else {
                    debug!(tool = %tool.name, iteration, "No parsable arguments for tool call");
                    continue;
                };

                info!(tool = %tool.name, iteration, "Calling tool");
                let result = tool
                    .function
                    .call(&arguments)
                    .await
                    .map_err(|source| AgentError::Tool {
                        tool: tool.name.clone(),
                        source,
                    })?;

                let arguments = Value::Object(arguments).to_string();
                self.conversation.push(Message::user(format!(
                    "Assistant Call {}:\n{}\nreturned:\n{}",
                    tool.name, arguments, result
                )));
                self.tool_results.insert(tool.name.clone(), result.clone());
                steps.push(AgentResponse::Tool(ToolResponse {
                    tool_name: tool.name.clone(),
                    text: arguments,
                    tool_result: result,
                }));
            }

            completion = self.chat_completion(&self.conversation).await?;
            self.conversation.push(Message::assistant(completion.clone()));
            requested = self.tools.detect_calls(&completion);
            iteration += 1;
        }

        if !requested.is_empty() {
            warn!(
                iterations = iteration,
                pending = ?requested.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>(),
                "Iteration limit reached with unresolved tool calls"
            );
        }

        let response = TextResponse { text: completion };
        steps.push(AgentResponse::Text(response.clone()));

        if add_to_memory {
            let id = memory::lock(&self.memory)
                .and_then(|mut memory| memory.add(&response.text))
                .map_err(AgentError::Memory)?;
            debug!(id = %id, "Response added to memory");
        }

        Ok((response, steps))
    }

    /// Condenses free text into a short query, without touching the
    /// conversation.
    pub async fn summarize(&self, text: &str) -> Result<String, AgentError> {
        let conversation = [
            Message::system(SUMMARY_PROMPT),
            Message::user(format!("Text to summarize:\n{}", text)),
        ];
        self.chat_completion(&conversation).await
    }
}
