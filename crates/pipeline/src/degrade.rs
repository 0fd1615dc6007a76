//! The degradation ladder — ordered context-reduction strategies.
//!
//! Each level applies a cumulative prefix of the configured steps to the
//! working context, yielding a progressively smaller/simpler request.
//! The ordering lives in configuration, not code.

use palaver_config::RetryConfig;
use palaver_context::working::{
    WorkingContext, collapse_images, drop_tool_traces, tighten_turns,
};
use palaver_core::degrade::DegradeStep;
use tracing::debug;

use crate::sanitize::IMAGE_PLACEHOLDER;

/// The configured ladder plus the turn caps its tighten steps use.
#[derive(Debug, Clone)]
pub struct DegradeLadder {
    steps: Vec<DegradeStep>,
    turn_caps: Vec<usize>,
}

impl DegradeLadder {
    pub fn new(steps: Vec<DegradeStep>, turn_caps: Vec<usize>) -> Self {
        Self { steps, turn_caps }
    }

    pub fn from_config(retry: &RetryConfig) -> Self {
        Self::new(
            retry.degrade_ladder.clone(),
            retry.degraded_turn_caps.clone(),
        )
    }

    /// The highest meaningful level.
    pub fn max_level(&self) -> u8 {
        self.steps.len().min(u8::MAX as usize) as u8
    }

    /// Apply the first `level` steps to a working context. Level 0 is a
    /// no-op; levels beyond the ladder clamp to the full ladder.
    pub fn apply(&self, level: u8, mut context: WorkingContext) -> WorkingContext {
        let take = (level as usize).min(self.steps.len());
        let mut tighten_seen = 0usize;
        for step in &self.steps[..take] {
            match step {
                DegradeStep::DropToolTraces => drop_tool_traces(&mut context),
                DegradeStep::CollapseImages => collapse_images(&mut context, IMAGE_PLACEHOLDER),
                DegradeStep::TightenTurns => {
                    let cap = self
                        .turn_caps
                        .get(tighten_seen)
                        .copied()
                        .unwrap_or(1)
                        .max(1);
                    tighten_turns(&mut context, cap);
                    tighten_seen += 1;
                }
            }
        }
        if take > 0 {
            debug!(
                level,
                turns = context.turns.len(),
                estimate = context.soft_token_estimate,
                "Applied degradation ladder"
            );
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_context::ContextBudget;
    use palaver_context::working::build_working_context;
    use palaver_core::message::{ContentPart, Message, Role};
    use std::time::Duration;

    async fn rich_context() -> WorkingContext {
        let mut messages = Vec::new();
        for i in 0..6u64 {
            messages.push(Message::user(format!("question {i}")).with_turn_index(i + 1));
            messages.push(
                Message::new(
                    Role::Assistant,
                    vec![
                        ContentPart::text(format!("answer {i}")),
                        ContentPart::ToolCall {
                            call_id: format!("c{i}"),
                            name: "search".into(),
                            arguments: serde_json::json!({}),
                        },
                    ],
                    i + 1,
                )
                .with_turn_index(i + 1),
            );
            messages.push(
                Message::new(
                    Role::User,
                    vec![ContentPart::image(format!("img-{i}"), "image/png")],
                    i + 1,
                )
                .with_turn_index(i + 1),
            );
        }
        build_working_context(
            &messages,
            &ContextBudget {
                max_turns: 50,
                max_tokens_soft: 100_000,
                summarize: false,
            },
            None,
            Duration::from_secs(1),
        )
        .await
    }

    fn ladder() -> DegradeLadder {
        DegradeLadder::new(
            vec![
                DegradeStep::DropToolTraces,
                DegradeStep::CollapseImages,
                DegradeStep::TightenTurns,
            ],
            vec![2],
        )
    }

    #[tokio::test]
    async fn level_zero_is_identity() {
        let ctx = rich_context().await;
        let turns_before = ctx.turns.len();
        let estimate_before = ctx.soft_token_estimate;
        let ctx = ladder().apply(0, ctx);
        assert_eq!(ctx.turns.len(), turns_before);
        assert_eq!(ctx.soft_token_estimate, estimate_before);
    }

    #[tokio::test]
    async fn levels_are_cumulative() {
        let ladder = ladder();

        let l1 = ladder.apply(1, rich_context().await);
        assert!(l1.messages().all(|m| !m.has_tool_parts()));
        assert!(
            l1.messages()
                .flat_map(|m| m.parts.iter())
                .any(|p| matches!(p, ContentPart::Image { .. }))
        );

        let l2 = ladder.apply(2, rich_context().await);
        assert!(l2.messages().all(|m| !m.has_tool_parts()));
        assert!(
            l2.messages()
                .flat_map(|m| m.parts.iter())
                .all(|p| !matches!(p, ContentPart::Image { .. }))
        );

        let l3 = ladder.apply(3, rich_context().await);
        assert!(l3.turns.len() <= 2);
    }

    #[tokio::test]
    async fn each_level_shrinks_the_estimate() {
        let ladder = ladder();
        let base = rich_context().await.soft_token_estimate;
        let l1 = ladder.apply(1, rich_context().await).soft_token_estimate;
        let l3 = ladder.apply(3, rich_context().await).soft_token_estimate;
        assert!(l1 < base);
        assert!(l3 < l1);
    }

    #[tokio::test]
    async fn level_beyond_ladder_clamps() {
        let ladder = ladder();
        let ctx = ladder.apply(9, rich_context().await);
        assert!(ctx.turns.len() <= 2);
    }

    #[test]
    fn max_level_matches_step_count() {
        assert_eq!(ladder().max_level(), 3);
        assert_eq!(DegradeLadder::new(vec![], vec![]).max_level(), 0);
    }
}
