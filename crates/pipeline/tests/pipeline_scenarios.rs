//! End-to-end pipeline scenarios against an in-memory archive and a
//! scripted provider.

use async_trait::async_trait;
use palaver_config::PalaverConfig;
use palaver_context::{ArchiveFilter, ArchiveStore, InMemoryArchive};
use palaver_core::capability::ProviderKind;
use palaver_core::error::ProviderError;
use palaver_core::message::{ContentPart, Message, Role, SessionKey};
use palaver_core::provider::{PlanMessage, Provider, ProviderResponse, RequestPlan, ToolCall};
use palaver_core::tool::{ToolHandler, ToolRegistry};
use palaver_pipeline::{ChatPipeline, IncomingMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Replays a script of responses and records every received plan.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    plans: Mutex<Vec<RequestPlan>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            plans: Mutex::new(Vec::new()),
        })
    }

    fn text(content: &str) -> ProviderResponse {
        ProviderResponse {
            content: content.into(),
            tool_calls: vec![],
            usage: None,
            model: "scripted".into(),
        }
    }

    fn empty() -> ProviderResponse {
        Self::text("")
    }

    fn tool_request(name: &str) -> ProviderResponse {
        Self::tool_request_with(name, serde_json::json!({"query": "x"}))
    }

    fn tool_request_with(name: &str, arguments: serde_json::Value) -> ProviderResponse {
        ProviderResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: "call_1".into(),
                name: name.into(),
                arguments,
            }],
            usage: None,
            model: "scripted".into(),
        }
    }

    fn calls(&self) -> usize {
        self.plans.lock().unwrap().len()
    }

    fn plan(&self, index: usize) -> RequestPlan {
        self.plans.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompat
    }
    async fn send(&self, plan: RequestPlan) -> Result<ProviderResponse, ProviderError> {
        self.plans.lock().unwrap().push(plan);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Self::text("default reply"))
        } else {
            Ok(responses.remove(0))
        }
    }
}

struct CountingTool {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolHandler for CountingTool {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "searches the web"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }
    async fn invoke(
        &self,
        _arguments: serde_json::Value,
    ) -> Result<String, palaver_core::error::ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok("search output".into())
    }
}

fn fast_config() -> PalaverConfig {
    let mut config = PalaverConfig::default();
    config.retry.transport_retry_delay_ms = 1;
    config.retry.empty_reply_retry_delay_ms = 1;
    config
}

fn pipeline_with(
    config: PalaverConfig,
    archive: Arc<InMemoryArchive>,
    provider: Arc<ScriptedProvider>,
    registry: ToolRegistry,
) -> ChatPipeline {
    ChatPipeline::new(config, archive, provider, Arc::new(registry))
}

fn plan_text(plan: &RequestPlan) -> String {
    plan.messages
        .iter()
        .map(PlanMessage::joined_text)
        .collect::<Vec<_>>()
        .join("\n")
}

async fn seed_turns(archive: &InMemoryArchive, key: &SessionKey, turns: usize) {
    for i in 0..turns {
        archive
            .append(
                key,
                Message::user(format!("question {i}")).with_turn_index(i as u64 + 1),
            )
            .await
            .unwrap();
        archive
            .append(
                key,
                Message::assistant(format!("answer {i}")).with_turn_index(i as u64 + 1),
            )
            .await
            .unwrap();
    }
}

// Scenario A: 35 archived turns, max_turns = 30 → the request carries
// only the most recent 30; the oldest 5 are absent from the request but
// still present in query_archive.
#[tokio::test]
async fn old_turns_leave_the_request_but_not_the_archive() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("42");
    seed_turns(&archive, &key, 35).await;

    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("hello")]);
    let pipeline = pipeline_with(
        fast_config(),
        Arc::clone(&archive),
        Arc::clone(&provider),
        ToolRegistry::new(),
    );

    let reply = pipeline
        .handle(IncomingMessage::text_only("m-new", "latest question"), key.clone())
        .await
        .unwrap();
    assert_eq!(reply.text, "hello");

    let sent = plan_text(&provider.plan(0));
    assert!(!sent.contains("question 0"));
    assert!(!sent.contains("question 4"));
    assert!(sent.contains("question 5"));
    assert!(sent.contains("question 34"));
    assert!(sent.contains("latest question"));

    // The archive still has everything, plus the new turn.
    let archived = pipeline
        .query_archive(
            &key,
            &ArchiveFilter {
                contains: Some("question 0".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(archived.len(), 1);
}

// Scenario B: tools unsupported (explicit override) with tool traffic in
// history → the request carries zero tool-role messages and zero schema
// entries.
#[tokio::test]
async fn toolless_provider_sees_no_tool_traffic() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::private("u7");
    archive
        .append(&key, Message::user("find it").with_turn_index(1))
        .await
        .unwrap();
    archive
        .append(
            &key,
            Message::new(
                Role::Assistant,
                vec![ContentPart::ToolCall {
                    call_id: "c1".into(),
                    name: "web_search".into(),
                    arguments: serde_json::json!({"query": "it"}),
                }],
                1,
            )
            .with_turn_index(1),
        )
        .await
        .unwrap();
    archive
        .append(
            &key,
            Message::tool_result("c1", "web_search", "found", 2000).with_turn_index(1),
        )
        .await
        .unwrap();
    archive
        .append(&key, Message::user("thanks, more?").with_turn_index(2))
        .await
        .unwrap();
    archive
        .append(
            &key,
            Message::new(
                Role::Assistant,
                vec![ContentPart::ToolCall {
                    call_id: "c2".into(),
                    name: "web_search".into(),
                    arguments: serde_json::json!({"query": "more"}),
                }],
                2,
            )
            .with_turn_index(2),
        )
        .await
        .unwrap();
    archive
        .append(
            &key,
            Message::tool_result("c2", "web_search", "more", 2000).with_turn_index(2),
        )
        .await
        .unwrap();

    let mut config = fast_config();
    config.provider.capabilities.supports_tools = Some(false);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CountingTool {
        invocations: Arc::new(AtomicUsize::new(0)),
    }));

    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("plain answer")]);
    let pipeline = pipeline_with(config, archive, Arc::clone(&provider), registry);

    pipeline
        .handle(IncomingMessage::text_only("m-3", "third question"), key)
        .await
        .unwrap();

    let plan = provider.plan(0);
    assert!(plan.tools.is_empty());
    assert!(plan.messages.iter().all(|m| m.role != Role::Tool));
    assert!(
        plan.messages
            .iter()
            .flat_map(|m| m.parts.iter())
            .all(|p| !p.is_tool_part())
    );
}

// Scenario C: tool_max_rounds = 2 and the provider keeps requesting
// tools → the loop ends at the round-2 boundary with a terminal
// failure; no third request is sent.
#[tokio::test]
async fn tool_round_limit_is_terminal_not_empty_success() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");

    let mut config = fast_config();
    config.tools.max_rounds = 2;

    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CountingTool {
        invocations: Arc::clone(&invocations),
    }));

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_request("web_search"),
        ScriptedProvider::tool_request("web_search"),
        ScriptedProvider::tool_request("web_search"),
    ]);
    let pipeline = pipeline_with(config, Arc::clone(&archive), Arc::clone(&provider), registry);

    let err = pipeline
        .handle(IncomingMessage::text_only("m-1", "dig deep"), key.clone())
        .await
        .unwrap_err();

    assert_eq!(err.diagnostic.classification, "tool_loop_exhausted");
    assert_eq!(provider.calls(), 2);

    // Both rounds were archived for audit.
    let tool_messages = pipeline
        .query_archive(
            &key,
            &ArchiveFilter {
                role: Some(Role::Tool),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(tool_messages.len(), 2);
}

// Scenario D: success status with empty content,
// empty_reply_local_retries = 1, degradation disabled → exactly one
// retried identical request, then a terminal generic message.
#[tokio::test]
async fn empty_reply_with_degradation_disabled() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");

    let mut config = fast_config();
    config.retry.empty_reply_local_retries = 1;
    config.retry.degradation_enabled = false;

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::empty(),
        ScriptedProvider::empty(),
        ScriptedProvider::text("should never be reached"),
    ]);
    let pipeline = pipeline_with(config, archive, Arc::clone(&provider), ToolRegistry::new());

    let err = pipeline
        .handle(IncomingMessage::text_only("m-1", "hello?"), key)
        .await
        .unwrap_err();

    assert_eq!(provider.calls(), 2);
    // The two requests were identical replays.
    assert_eq!(provider.plan(0).fingerprint(), provider.plan(1).fingerprint());
    assert_eq!(
        err.user_message,
        PalaverConfig::default().messages.generic_failure
    );
    assert_eq!(err.diagnostic.classification, "empty_response");
}

// Empty replies escalate the ladder and can recover at a higher level.
#[tokio::test]
async fn degradation_recovers_from_empty_replies() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");
    seed_turns(&archive, &key, 6).await;

    let mut config = fast_config();
    config.retry.empty_reply_local_retries = 0;

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::empty(),
        ScriptedProvider::text("degraded reply"),
    ]);
    let pipeline = pipeline_with(config, archive, Arc::clone(&provider), ToolRegistry::new());

    let reply = pipeline
        .handle(IncomingMessage::text_only("m-1", "anyone there?"), key)
        .await
        .unwrap();

    assert_eq!(reply.text, "degraded reply");
    assert_eq!(reply.degrade_level, 1);
    assert_eq!(provider.calls(), 2);
    assert_eq!(pipeline.metrics().snapshot().degradations_total, 1);
}

// A cancelled event lets in-flight work finish but appends nothing
// beyond the already-recorded user message.
#[tokio::test]
async fn cancellation_discards_results() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");

    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("too late")]);
    let pipeline = pipeline_with(
        fast_config(),
        Arc::clone(&archive),
        provider,
        ToolRegistry::new(),
    );

    let event = IncomingMessage::text_only("m-1", "never mind");
    event.cancellation.cancel();

    let err = pipeline.handle(event, key.clone()).await.unwrap_err();
    assert_eq!(err.diagnostic.classification, "cancelled");

    // Only the user message made it to the archive.
    let messages = archive.load(&key).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

// The happy path appends the user turn and the assistant reply under
// the same turn index.
#[tokio::test]
async fn reply_is_archived_with_the_turn() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::private("u1");

    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("archived reply")]);
    let pipeline = pipeline_with(
        fast_config(),
        Arc::clone(&archive),
        provider,
        ToolRegistry::new(),
    );

    pipeline
        .handle(IncomingMessage::text_only("m-1", "hi"), key.clone())
        .await
        .unwrap();

    let messages = archive.load(&key).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[0].turn_index, messages[1].turn_index);
    assert_eq!(messages[1].joined_text(), "archived reply");
}

// Re-delivered platform events (same message id) do not duplicate the
// user turn in the archive.
#[tokio::test]
async fn duplicate_message_ids_do_not_duplicate_turns() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::text("first"),
        ScriptedProvider::text("second"),
    ]);
    let pipeline = pipeline_with(
        fast_config(),
        Arc::clone(&archive),
        provider,
        ToolRegistry::new(),
    );

    pipeline
        .handle(IncomingMessage::text_only("same-id", "hello"), key.clone())
        .await
        .unwrap();
    pipeline
        .handle(IncomingMessage::text_only("same-id", "hello"), key.clone())
        .await
        .unwrap();

    let user_messages = archive
        .query(
            &key,
            &ArchiveFilter {
                role: Some(Role::User),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(user_messages.len(), 1);
}

// The model can reach messages that trimming excluded from the request
// window by searching the durable archive through a tool.
#[tokio::test]
async fn history_search_tool_reads_beyond_the_context_window() {
    use palaver_tools::HistorySearchTool;

    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");
    archive
        .append(
            &key,
            Message::user("the deploy password hint is xylophone").with_turn_index(1),
        )
        .await
        .unwrap();
    seed_turns(&archive, &key, 40).await;

    // A tight window pushes turn 1 out of every request.
    let mut config = fast_config();
    config.context.max_turns = 5;

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(HistorySearchTool::new(
        archive.clone() as Arc<dyn ArchiveStore>,
        key.clone(),
    )));

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_request_with(
            "history_search",
            serde_json::json!({"query": "xylophone"}),
        ),
        ScriptedProvider::text("the hint was xylophone"),
    ]);
    let pipeline = pipeline_with(config, Arc::clone(&archive), Arc::clone(&provider), registry);

    let reply = pipeline
        .handle(
            IncomingMessage::text_only("m-1", "what was that hint again?"),
            key,
        )
        .await
        .unwrap();
    assert_eq!(reply.text, "the hint was xylophone");

    // The first request never saw the old turn; the tool result folded
    // into the second request recovered it from the archive.
    assert!(!plan_text(&provider.plan(0)).contains("xylophone"));
    let recovered = provider
        .plan(1)
        .messages
        .iter()
        .flat_map(|m| m.parts.iter())
        .any(|p| {
            matches!(p, ContentPart::ToolResult { payload, .. } if payload.contains("xylophone"))
        });
    assert!(recovered);
}

// Tool flow end-to-end: request → tool round → final text, with the
// round archived.
#[tokio::test]
async fn tool_round_trip_end_to_end() {
    let archive = Arc::new(InMemoryArchive::new());
    let key = SessionKey::group("g");

    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CountingTool {
        invocations: Arc::clone(&invocations),
    }));

    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_request("web_search"),
        ScriptedProvider::text("based on the search: done"),
    ]);
    let pipeline = pipeline_with(fast_config(), Arc::clone(&archive), Arc::clone(&provider), registry);

    let reply = pipeline
        .handle(IncomingMessage::text_only("m-1", "search for it"), key.clone())
        .await
        .unwrap();

    assert_eq!(reply.text, "based on the search: done");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // The second request carried the tool schema and the folded result.
    let second = provider.plan(1);
    assert!(!second.tools.is_empty());
    assert!(second.messages.iter().any(|m| m.role == Role::Tool));

    // user, assistant(tool_call), tool, assistant(final)
    let messages = archive.load(&key).await.unwrap();
    assert_eq!(messages.len(), 4);
    assert!(messages[1].has_tool_parts());
    assert_eq!(messages[3].joined_text(), "based on the search: done");
}
