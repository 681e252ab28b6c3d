//! Session log records.
//!
//! Each line of a session file is one request/response exchange. Parsing
//! happens in two stages so the corpus loader can tell a broken line
//! ([`LabError::MalformedRecord`]) from a well-formed record missing required
//! fields ([`LabError::MalformedTurn`]).

use std::borrow::Cow;

use serde::de::{self, Deserializer};
use serde::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LabError, Result};

/// The `type` tag of a tool invocation block.
pub const TOOL_USE_TYPE: &str = "tool_use";

/// One logged request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTurn {
    /// What the model was asked.
    pub request: SessionRequest,
    /// What the model answered.
    pub response: SessionResponse,
}

/// Request half of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// System prompt, usually a string. Absent or null reads as empty.
    #[serde(default)]
    pub system: Option<Value>,
    /// Tool definitions the request carried. Null reads as absent.
    #[serde(default)]
    pub tools: Option<Value>,
    /// Conversation history, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl SessionRequest {
    /// System prompt as text, empty when absent.
    ///
    /// Structured prompts render as compact JSON, like message content.
    #[must_use]
    pub fn system(&self) -> Cow<'_, str> {
        match &self.system {
            None | Some(Value::Null) => Cow::Borrowed(""),
            Some(value) => render_text(value),
        }
    }
}

/// One message of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker role, used as the block tag (`user`, `assistant`, ...).
    pub role: String,
    /// Message body: usually a string, sometimes an array of content blocks.
    pub content: Value,
}

impl Message {
    /// Message body as prompt text.
    ///
    /// Strings are used verbatim; structured content is rendered as compact
    /// JSON.
    #[must_use]
    pub fn content_text(&self) -> Cow<'_, str> {
        render_text(&self.content)
    }
}

/// Strings verbatim, anything else as compact JSON.
fn render_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        other => Cow::Owned(other.to_string()),
    }
}

/// Response half of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Response body. Absent reads as empty text.
    #[serde(default)]
    pub content: ResponseContent,
}

/// A response is either plain text or a sequence of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseContent {
    /// Assistant reply.
    Text(String),
    /// Tool invocations, in emission order.
    ToolCalls(ToolCalls),
}

impl Default for ResponseContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl<'de> Deserialize<'de> for ResponseContent {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Array(items) => ToolCalls::from_values(items)
                .map(Self::ToolCalls)
                .map_err(de::Error::custom),
            other => Err(de::Error::custom(format!(
                "response content must be a string or an array of tool_use blocks, found {}",
                json_kind(&other)
            ))),
        }
    }
}

/// A single tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Always [`TOOL_USE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Caller-supplied call ID.
    pub id: String,
    /// Name of the tool being called.
    pub name: String,
    /// Tool parameters.
    pub input: Value,
    /// Any further fields, kept so the block serializes back unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolUseBlock {
    fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let block = Self::deserialize(value).map_err(|e| e.to_string())?;
        if block.kind != TOOL_USE_TYPE {
            return Err(format!(
                "expected type `{TOOL_USE_TYPE}`, found `{}`",
                block.kind
            ));
        }
        Ok(block)
    }
}

/// Validated tool invocations alongside the blocks exactly as logged.
///
/// Serializes as the logged array, so key order and every field survive.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCalls {
    blocks: Vec<ToolUseBlock>,
    raw: Vec<Value>,
}

impl ToolCalls {
    /// Validate every element of `items` as a `tool_use` block.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first offending block.
    pub fn from_values(items: Vec<Value>) -> std::result::Result<Self, String> {
        let blocks = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                ToolUseBlock::from_value(item)
                    .map_err(|e| format!("response content block {index}: {e}"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { blocks, raw: items })
    }

    /// Typed blocks, in emission order.
    #[must_use]
    pub fn blocks(&self) -> &[ToolUseBlock] {
        &self.blocks
    }

    /// Blocks as logged.
    #[must_use]
    pub fn raw(&self) -> &[Value] {
        &self.raw
    }

    /// Number of calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no calls were made.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Serialize for ToolCalls {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.raw.serialize(serializer)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl SessionTurn {
    /// Parse one session file line.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::MalformedRecord`] if the line is not JSON, and
    /// [`LabError::MalformedTurn`] if it lacks required fields.
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| LabError::MalformedRecord(e.to_string()))?;
        Self::from_value(value)
    }

    /// Shape an already-parsed record into a turn.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::MalformedTurn`] if `request` or `response` is
    /// absent, a message lacks `role` or `content`, or the response content
    /// is neither text nor tool calls.
    pub fn from_value(value: Value) -> Result<Self> {
        let turn: Self =
            serde_json::from_value(value).map_err(|e| LabError::MalformedTurn(e.to_string()))?;

        if let Some(index) = turn
            .request
            .messages
            .iter()
            .position(|message| message.content.is_null())
        {
            return Err(LabError::MalformedTurn(format!(
                "message {index} has no content"
            )));
        }

        Ok(turn)
    }
}
