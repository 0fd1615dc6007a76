//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This
//! approximation is accurate within ~10% for BPE tokenizers on English
//! text, and — critically for trimming — it is deterministic and makes
//! no external calls.

use palaver_core::message::{ContentPart, Message, Turn};

/// Flat cost charged for an image part. Providers bill images by
/// resolution tiers the heuristic cannot see; a fixed constant keeps
/// trimming deterministic.
pub const IMAGE_PART_TOKENS: usize = 64;

/// Per-message overhead for role name, delimiters, and formatting
/// markers in the API wire format.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single content part.
pub fn estimate_part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => estimate_tokens(text),
        ContentPart::Image { .. } => IMAGE_PART_TOKENS,
        ContentPart::ToolCall {
            name, arguments, ..
        } => estimate_tokens(name) + estimate_tokens(&arguments.to_string()),
        ContentPart::ToolResult { name, payload, .. } => {
            estimate_tokens(name) + estimate_tokens(payload)
        }
    }
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD_TOKENS + message.parts.iter().map(estimate_part_tokens).sum::<usize>()
}

/// Estimate tokens for a whole turn.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    turn.messages.iter().map(estimate_message_tokens).sum()
}
