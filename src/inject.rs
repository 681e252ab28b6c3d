//! Tool-use preamble and catalog injection.
//!
//! Both operations are pure: they borrow the turn and return the value to use
//! in its place.

use std::borrow::Cow;

use serde_json::Value;

use crate::catalog::ToolCatalog;

/// Instructions on the tool-calling protocol, prepended to system prompts.
pub const TOOL_PREAMBLE: &str = r#"
<TOOL_PREAMBLE>
You can optionally call tools. Available tools are provided in the tools section.

FORMAT
- To call a tool, output exactly one JSON object per tool call:
  {"type":"tool_use","id":"toolu_<unique_id>","name":"<tool_name>","input":{<parameters>}}
- The "id" field must be unique for each tool call (e.g., "toolu_01AbCdEfGhIjKlMnOp")
- The "input" field contains the tool parameters as a JSON object
- If no tool is needed, write a normal assistant reply (no JSON).
- You can make multiple tool calls in one response by outputting an array of tool_use objects
- After a tool_result is shown in the conversation, ground your reply in that result. If another call is needed, emit new tool_use objects.

RULES
- Use only tools available in the provided tools catalog.
- Parameters in "input" must be valid JSON and match the tool's input_schema exactly (no extra keys).
- Required parameters must always be provided; optional parameters can be omitted.
- Parameters account_id, user_id, and session_id are auto-injected by the system - do not include them in your tool calls.
- If the needed tool is missing, say so and propose a manual workaround.
- Never fabricate tool results; only reason over provided tool_result blocks.
- Prefer making all needed tool calls at once when possible; if multi-step reasoning is required, do it turn-by-turn.

VALIDATION
- If you receive a validator error (type=tool_error, name=_validator), correct the call and emit a new tool_use object.

OUTPUT
- Do not wrap the JSON in code fences or add commentary on the same line.
- Choose a tool only when it adds essential info or executes an action.
</TOOL_PREAMBLE>
"#;

/// Prepend [`TOOL_PREAMBLE`] to `system_prompt`, separated by a blank line.
///
/// Returns the prompt unchanged when `enabled` is false.
#[must_use]
pub fn inject_preamble(system_prompt: &str, enabled: bool) -> Cow<'_, str> {
    if !enabled {
        return Cow::Borrowed(system_prompt);
    }
    Cow::Owned(format!("{TOOL_PREAMBLE}\n\n{system_prompt}"))
}

/// Resolve the tools value a turn is trained with.
///
/// A turn's own non-null `tools` always wins. Otherwise the catalog document
/// is attached when one is given; callers pass `None` to disable injection.
#[must_use]
pub fn attach_catalog<'a>(
    tools: Option<&'a Value>,
    catalog: Option<&'a ToolCatalog>,
) -> Option<&'a Value> {
    match tools {
        Some(Value::Null) | None => catalog.map(ToolCatalog::document),
        Some(own) => Some(own),
    }
}
