//! Human-readable previews and statistics of prepared examples.

use std::fmt::{self, Write as _};

use crate::transform::{contains_sentinel, ResponseType, TrainingExample};

/// Characters of input/output shown per example.
pub const PREVIEW_CHARS: usize = 500;

const WIDE_RULE: usize = 80;
const NARROW_RULE: usize = 40;

/// Render up to `count` examples with metadata and truncated text.
#[must_use]
pub fn render(examples: &[TrainingExample], count: usize) -> String {
    let shown = count.min(examples.len());
    let wide = "=".repeat(WIDE_RULE);
    let dashes = "-".repeat(WIDE_RULE);
    let narrow = "-".repeat(NARROW_RULE);

    let mut out = String::new();
    let _ = writeln!(out, "\n{wide}");
    let _ = writeln!(out, "PREVIEW OF {shown} TRAINING EXAMPLES");
    let _ = writeln!(out, "{wide}\n");

    for (index, example) in examples.iter().take(count).enumerate() {
        let meta = &example.metadata;
        let _ = writeln!(out, "\n{dashes}");
        let _ = writeln!(out, "EXAMPLE {}", index + 1);
        let _ = writeln!(out, "{dashes}");
        let _ = writeln!(
            out,
            "\nMETADATA: has_tools={}, num_messages={}, response_type={}",
            meta.has_tools, meta.num_messages, meta.response_type
        );
        let _ = writeln!(out, "\n[INPUT] ({} chars)", example.input.chars().count());
        let _ = writeln!(out, "{narrow}");
        let _ = writeln!(out, "{}", truncate(&example.input, PREVIEW_CHARS));
        let _ = writeln!(out, "\n[OUTPUT] ({} chars)", example.output.chars().count());
        let _ = writeln!(out, "{narrow}");
        let _ = writeln!(out, "{}", truncate(&example.output, PREVIEW_CHARS));
    }

    let _ = writeln!(out, "\n{wide}");
    out
}

/// First `max_chars` characters of `text`, with `...` appended if cut.
#[must_use]
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

/// Aggregate figures over a set of examples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DatasetStats {
    /// Number of examples.
    pub total: usize,
    /// Mean input length in characters.
    pub avg_input_chars: f64,
    /// Mean output length in characters.
    pub avg_output_chars: f64,
    /// Examples answered with plain text.
    pub text_responses: usize,
    /// Examples answered with tool calls.
    pub tool_call_responses: usize,
    /// Examples trained with a tools value.
    pub with_tools: usize,
    /// Examples whose text contains a block tag.
    pub sentinel_collisions: usize,
}

impl DatasetStats {
    /// Compute statistics for `examples`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_examples(examples: &[TrainingExample]) -> Self {
        let mut stats = Self {
            total: examples.len(),
            ..Self::default()
        };
        let mut input_chars = 0usize;
        let mut output_chars = 0usize;

        for example in examples {
            input_chars += example.input.chars().count();
            output_chars += example.output.chars().count();
            match example.metadata.response_type {
                ResponseType::Text => stats.text_responses += 1,
                ResponseType::ToolCalls => stats.tool_call_responses += 1,
            }
            if example.metadata.has_tools {
                stats.with_tools += 1;
            }
            if contains_sentinel(&example.output) || has_foreign_sentinel(&example.input) {
                stats.sentinel_collisions += 1;
            }
        }

        if stats.total > 0 {
            stats.avg_input_chars = input_chars as f64 / stats.total as f64;
            stats.avg_output_chars = output_chars as f64 / stats.total as f64;
        }
        stats
    }

    /// `count` as a percentage of all examples; zero for an empty set.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }
}

/// Whether a delimited prompt holds more tags than its own block structure.
///
/// Every block contributes exactly one `<|role|>` and one `<|end|>` line, so
/// any tag not at the start of a line, or an `<|end|>` count that differs
/// from the open count, means content smuggled a tag in.
fn has_foreign_sentinel(input: &str) -> bool {
    let mut opens = 0usize;
    let mut ends = 0usize;
    for line in input.lines() {
        if line == crate::transform::END_TAG {
            ends += 1;
        } else if line.len() > 4
            && line.starts_with("<|")
            && line.ends_with("|>")
            && !line[2..line.len() - 2].contains('|')
        {
            opens += 1;
        } else if contains_sentinel(line) {
            return true;
        }
    }
    opens != ends
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wide = "=".repeat(WIDE_RULE);
        writeln!(f, "\n{wide}")?;
        writeln!(f, "DATASET STATISTICS")?;
        writeln!(f, "{wide}\n")?;
        writeln!(f, "Total examples: {}", self.total)?;
        writeln!(f, "Average input length: {:.0} chars", self.avg_input_chars)?;
        writeln!(f, "Average output length: {:.0} chars", self.avg_output_chars)?;
        writeln!(f, "\nResponse types:")?;
        writeln!(
            f,
            "  - Text responses: {} ({:.1}%)",
            self.text_responses,
            self.percent(self.text_responses)
        )?;
        writeln!(
            f,
            "  - Tool call responses: {} ({:.1}%)",
            self.tool_call_responses,
            self.percent(self.tool_call_responses)
        )?;
        writeln!(
            f,
            "  - Examples with tools available: {} ({:.1}%)",
            self.with_tools,
            self.percent(self.with_tools)
        )?;
        if self.sentinel_collisions > 0 {
            writeln!(
                f,
                "\nWarning: {} examples contain block tags inside field text",
                self.sentinel_collisions
            )?;
        }
        Ok(())
    }
}
