//! Working context — the bounded, request-ready projection of an archive.
//!
//! Trimming is a read-time concern: it shapes the request, never the
//! durable archive. The algorithm is deterministic and FIFO by turn.

use palaver_core::collab::{Summarizer, summarize_with_timeout};
use palaver_core::message::{ContentPart, Message, Turn, group_turns};
use std::time::Duration;
use tracing::{debug, warn};

use crate::token::estimate_turn_tokens;

/// Budget constraints for one working context.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    /// Maximum number of turns
    pub max_turns: usize,

    /// Soft token cap (character-heuristic estimate)
    pub max_tokens_soft: usize,

    /// Synthesize a summary message for dropped turns
    pub summarize: bool,
}

/// The bounded view used to build requests. Recomputed per request and
/// discarded after use.
#[derive(Debug, Clone)]
pub struct WorkingContext {
    /// Synthesized summary of dropped turns, when summarization is on
    pub summary: Option<Message>,

    /// The retained turns, oldest first
    pub turns: Vec<Turn>,

    /// Estimated token cost of the retained turns
    pub soft_token_estimate: usize,

    /// How many turns were dropped from the archive view
    pub turns_dropped: usize,
}

impl WorkingContext {
    /// Recompute the token estimate. Must be called whenever turns are
    /// added or removed.
    pub fn recompute_estimate(&mut self) {
        self.soft_token_estimate = self.turns.iter().map(estimate_turn_tokens).sum();
    }

    /// All retained messages in order, summary first when present.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.summary
            .iter()
            .chain(self.turns.iter().flat_map(|t| t.messages.iter()))
    }

    /// The turn index of the oldest retained turn (the working-context
    /// boundary), or 0 when empty.
    pub fn boundary_turn(&self) -> u64 {
        self.turns.first().map_or(0, |t| t.index)
    }
}

/// Build a working context from an ordered archive slice.
///
/// Algorithm:
/// 1. Group messages into turns and keep the most recent `max_turns`.
/// 2. Estimate token cost per turn with the character heuristic.
/// 3. While the cumulative estimate exceeds `max_tokens_soft`, drop the
///    oldest remaining turn.
/// 4. If turns were dropped and `summarize` is set, ask the summarizer
///    for a single system-role summary of the dropped span and prepend
///    it. Summarizer failure skips the summary; it never fails the
///    build.
pub async fn build_working_context(
    messages: &[Message],
    budget: &ContextBudget,
    summarizer: Option<&dyn Summarizer>,
    summarize_timeout: Duration,
) -> WorkingContext {
    let all_turns = group_turns(messages);
    let total = all_turns.len();

    let keep_from = total.saturating_sub(budget.max_turns);
    let mut dropped: Vec<Turn> = all_turns[..keep_from].to_vec();
    let mut turns: Vec<Turn> = all_turns[keep_from..].to_vec();

    let mut estimate: usize = turns.iter().map(estimate_turn_tokens).sum();
    while estimate > budget.max_tokens_soft && !turns.is_empty() {
        let oldest = turns.remove(0);
        estimate -= estimate_turn_tokens(&oldest);
        dropped.push(oldest);
    }

    let turns_dropped = dropped.len();
    let mut summary = None;
    if turns_dropped > 0 {
        debug!(
            turns_dropped,
            retained = turns.len(),
            estimate,
            "Working context trimmed"
        );
        if budget.summarize {
            if let Some(summarizer) = summarizer {
                let span_text = dropped
                    .iter()
                    .map(Turn::joined_text)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                match summarize_with_timeout(summarizer, &span_text, summarize_timeout).await {
                    Ok(text) if !text.trim().is_empty() => {
                        summary = Some(Message::system(format!(
                            "Summary of earlier conversation: {text}"
                        )));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Summarizer failed, continuing without summary");
                    }
                }
            }
        }
    }

    WorkingContext {
        summary,
        turns,
        soft_token_estimate: estimate,
        turns_dropped,
    }
}

/// Load a session's archive and project it into a working context in
/// one step. Trimming never drops anything from the durable archive —
/// only from the returned view.
pub async fn load_working_context(
    store: &dyn crate::ArchiveStore,
    key: &palaver_core::message::SessionKey,
    budget: &ContextBudget,
    summarizer: Option<&dyn Summarizer>,
    summarize_timeout: Duration,
) -> Result<WorkingContext, palaver_core::error::ContextError> {
    let messages = store.load(key).await?;
    Ok(build_working_context(&messages, budget, summarizer, summarize_timeout).await)
}

/// Remove tool-call traces from a working context (degradation step).
/// Messages left without parts are dropped entirely.
pub fn drop_tool_traces(ctx: &mut WorkingContext) {
    for turn in &mut ctx.turns {
        for msg in &mut turn.messages {
            msg.parts.retain(|p| !p.is_tool_part());
        }
        turn.messages.retain(|m| !m.parts.is_empty());
    }
    ctx.turns.retain(|t| !t.messages.is_empty());
    ctx.recompute_estimate();
}

/// Collapse image parts to textual placeholders (degradation step).
pub fn collapse_images(ctx: &mut WorkingContext, placeholder: &str) {
    for turn in &mut ctx.turns {
        for msg in &mut turn.messages {
            for part in &mut msg.parts {
                if matches!(part, ContentPart::Image { .. }) {
                    *part = ContentPart::text(placeholder);
                }
            }
        }
    }
    ctx.recompute_estimate();
}

/// Keep only the most recent `cap` turns (degradation step).
pub fn tighten_turns(ctx: &mut WorkingContext, cap: usize) {
    if ctx.turns.len() > cap {
        let removed = ctx.turns.len() - cap;
        ctx.turns.drain(..removed);
        ctx.turns_dropped += removed;
        ctx.recompute_estimate();
    }
}
