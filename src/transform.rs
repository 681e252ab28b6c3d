//! Session turn to training example transformation.
//!
//! The prompt is a sequence of role-tagged blocks separated by blank lines:
//!
//! ```text
//! <|system|>
//! {system prompt}
//! <|end|>
//!
//! <|tools|>
//! {tools, pretty-printed JSON}
//! <|end|>
//!
//! <|user|>
//! {message}
//! <|end|>
//! ```
//!
//! Field values are not escaped. Content that itself contains a tag makes the
//! prompt ambiguous; [`contains_sentinel`] detects such content.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ToolCatalog;
use crate::error::Result;
use crate::inject::{self, attach_catalog};
use crate::session::{ResponseContent, SessionTurn};

/// Closing tag of every block.
pub const END_TAG: &str = "<|end|>";

/// Separator between blocks.
const BLOCK_SEPARATOR: &str = "\n\n";

/// Supervised training pair derived from one session turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    /// Prompt text.
    pub input: String,
    /// Target completion.
    pub output: String,
    /// Facts about how the example was built.
    pub metadata: ExampleMetadata,
}

/// Metadata attached to each [`TrainingExample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleMetadata {
    /// Whether the turn was trained with a tools value.
    pub has_tools: bool,
    /// Number of messages in the request history.
    pub num_messages: usize,
    /// Shape of the response.
    pub response_type: ResponseType,
}

/// Shape of a turn's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Plain assistant text.
    Text,
    /// A sequence of tool invocations.
    ToolCalls,
}

impl ResponseType {
    /// Wire name of the response type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ToolCalls => "tool_calls",
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Injection switches for a transformation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Prepend the tool-use preamble to the system prompt.
    pub inject_preamble: bool,
    /// Attach the tool catalog to turns without tools.
    pub inject_catalog: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            inject_preamble: true,
            inject_catalog: true,
        }
    }
}

/// Maps session turns to training examples.
///
/// Holds the tool catalog when catalog injection is on, so every turn of a
/// run sees the same catalog.
#[derive(Debug, Clone)]
pub struct TurnTransformer {
    inject_preamble: bool,
    catalog: Option<Arc<ToolCatalog>>,
}

impl TurnTransformer {
    /// Transformer that injects `catalog` into turns without tools, when given.
    #[must_use]
    pub fn new(inject_preamble: bool, catalog: Option<Arc<ToolCatalog>>) -> Self {
        Self {
            inject_preamble,
            catalog,
        }
    }

    /// Build a transformer from `options`, loading the catalog from
    /// `catalog_path` only when catalog injection is on.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LabError::CatalogUnavailable`] if injection is on and
    /// the catalog cannot be loaded.
    pub fn from_options(
        options: TransformOptions,
        catalog_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let catalog = if options.inject_catalog {
            Some(Arc::new(ToolCatalog::load(catalog_path)?))
        } else {
            None
        };
        Ok(Self::new(options.inject_preamble, catalog))
    }

    /// Effective injection switches.
    #[must_use]
    pub fn options(&self) -> TransformOptions {
        TransformOptions {
            inject_preamble: self.inject_preamble,
            inject_catalog: self.catalog.is_some(),
        }
    }

    /// Catalog attached to turns without tools, if any.
    #[must_use]
    pub fn catalog(&self) -> Option<&ToolCatalog> {
        self.catalog.as_deref()
    }

    /// Turn one session record into a training example.
    ///
    /// # Errors
    ///
    /// See [`process_session_turn`].
    pub fn transform(&self, turn: &SessionTurn) -> Result<TrainingExample> {
        process_session_turn(turn, self.inject_preamble, self.catalog())
    }

    /// Shape and transform an already-parsed record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LabError::MalformedTurn`] if the record lacks
    /// required fields.
    pub fn transform_value(&self, value: Value) -> Result<TrainingExample> {
        self.transform(&SessionTurn::from_value(value)?)
    }
}

/// Transform a single turn.
///
/// The preamble is prepended when `inject_preamble` is set; `catalog` is
/// attached when the turn carries no tools of its own.
///
/// # Errors
///
/// Returns an error only if a tools or tool-call value cannot be
/// serialized.
pub fn process_session_turn(
    turn: &SessionTurn,
    inject_preamble: bool,
    catalog: Option<&ToolCatalog>,
) -> Result<TrainingExample> {
    let request = &turn.request;
    let system_prompt = request.system();
    let system = inject::inject_preamble(&system_prompt, inject_preamble);
    let tools = attach_catalog(request.tools.as_ref(), catalog);

    let mut blocks = Vec::with_capacity(request.messages.len() + 2);
    blocks.push(block("system", &system));

    if let Some(tools) = tools.filter(|tools| !is_empty_tools(tools)) {
        blocks.push(block("tools", &serde_json::to_string_pretty(tools)?));
    }

    for message in &request.messages {
        blocks.push(block(&message.role, &message.content_text()));
    }

    let (output, response_type) = match &turn.response.content {
        ResponseContent::Text(text) => (text.clone(), ResponseType::Text),
        ResponseContent::ToolCalls(calls) => {
            (serde_json::to_string(calls)?, ResponseType::ToolCalls)
        }
    };

    Ok(TrainingExample {
        input: blocks.join(BLOCK_SEPARATOR),
        output,
        metadata: ExampleMetadata {
            has_tools: tools.is_some(),
            num_messages: request.messages.len(),
            response_type,
        },
    })
}

fn block(role: &str, content: &str) -> String {
    format!("<|{role}|>\n{content}\n{END_TAG}")
}

fn is_empty_tools(tools: &Value) -> bool {
    match tools {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(text) => text.is_empty(),
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
    }
}

/// Whether `text` contains a block tag (`<|...|>`) that would confuse a
/// reader of the delimited prompt.
#[must_use]
pub fn contains_sentinel(text: &str) -> bool {
    text.match_indices("<|").any(|(start, _)| {
        let rest = &text[start + 2..];
        rest.find("|>").is_some_and(|end| {
            let tag = &rest[..end];
            !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
    })
}
