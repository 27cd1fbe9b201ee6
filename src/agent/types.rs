use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::api_connection::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        ChatMessage::new(message.role.as_str(), message.content.clone())
    }
}

/// Final text of a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextResponse {
    pub text: String,
}

/// One tool invocation made during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub tool_name: String,
    /// The arguments as sent to the tool, rendered as JSON text.
    pub text: String,
    pub tool_result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    Tool(ToolResponse),
    Text(TextResponse),
}

impl AgentResponse {
    pub fn as_tool(&self) -> Option<&ToolResponse> {
        match self {
            AgentResponse::Tool(tool) => Some(tool),
            AgentResponse::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextResponse> {
        match self {
            AgentResponse::Text(text) => Some(text),
            AgentResponse::Tool(_) => None,
        }
    }
}
