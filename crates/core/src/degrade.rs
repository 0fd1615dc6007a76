//! Degradation ladder vocabulary.
//!
//! Each step names one category of context richness that can be removed
//! when the provider keeps returning empty responses. The ordering of
//! steps is configuration, not code — level N applies the first N steps
//! of the configured ladder cumulatively. The apply logic lives with the
//! working-context machinery; this module only defines the vocabulary so
//! configuration can reference it.

use serde::{Deserialize, Serialize};

/// One rung of the degradation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeStep {
    /// Remove tool-call traces (tool_call / tool_result parts) from the
    /// working context.
    DropToolTraces,

    /// Collapse image parts to textual placeholders.
    CollapseImages,

    /// Keep only the most recent turns, under a tighter cap than the
    /// normal budget.
    TightenTurns,
}
