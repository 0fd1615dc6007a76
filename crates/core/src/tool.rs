//! Tool handler trait and the allowlist-checked registry.
//!
//! Tools are referenced by stable string name; live handler references
//! never travel through the context model. The registry is the single
//! place where policy (allowlist) is enforced.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The core tool handler trait.
///
/// Registered per tool name; only allowlisted names are ever invoked.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The unique name of this tool (e.g., "history_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments, returning the textual
    /// result to fold back into context.
    async fn invoke(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools plus the execution allowlist.
///
/// The tool loop uses this to:
/// 1. Get definitions for the allowed tools to send to the LLM
/// 2. Check policy and look up handlers when the LLM requests calls
///
/// An allowlist of `None` permits every registered tool; `Some(set)`
/// restricts execution to exactly those names.
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    allowlist: Option<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            allowlist: None,
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        self.handlers.insert(tool.name().to_string(), tool);
    }

    /// Restrict execution to the given tool names.
    pub fn with_allowlist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Map a provider-prefixed tool name to its registered name
    /// (e.g. `google:web_search` → `web_search`). Names that already
    /// resolve are returned unchanged.
    pub fn resolve_alias<'a>(&self, requested: &'a str) -> &'a str {
        let requested = requested.trim();
        if self.handlers.contains_key(requested) {
            return requested;
        }
        if let Some((_, candidate)) = requested.split_once(':') {
            let candidate = candidate.trim();
            if !candidate.is_empty() && self.handlers.contains_key(candidate) {
                return candidate;
            }
        }
        requested
    }

    /// Whether policy permits invoking this (already alias-resolved) name.
    pub fn is_allowed(&self, name: &str) -> bool {
        match &self.allowlist {
            Some(set) => set.contains(name),
            None => self.handlers.contains_key(name),
        }
    }

    /// Get a handler by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    /// Definitions for every tool that is both registered and allowed.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .handlers
            .values()
            .filter(|t| self.is_allowed(t.name()))
            .map(|t| t.to_definition())
            .collect();
        // HashMap iteration order is arbitrary; the request builder must
        // stay deterministic.
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn invoke(
            &self,
            arguments: serde_json::Value,
        ) -> std::result::Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn default_policy_allows_registered_tools_only() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.is_allowed("echo"));
        assert!(!registry.is_allowed("shell"));
    }

    #[test]
    fn explicit_allowlist_restricts_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let registry = registry.with_allowlist(["other_tool"]);
        assert!(!registry.is_allowed("echo"));
        // Definitions only expose allowed tools
        assert!(registry.definitions().is_empty());
    }

    #[test]
    fn alias_resolution_strips_provider_prefix() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.resolve_alias("google:echo"), "echo");
        assert_eq!(registry.resolve_alias("echo"), "echo");
        assert_eq!(registry.resolve_alias("google:unknown"), "google:unknown");
    }

    #[tokio::test]
    async fn handler_invocation() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let out = registry
            .get("echo")
            .unwrap()
            .invoke(serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        struct Named(&'static str);
        #[async_trait]
        impl ToolHandler for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                "test"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            async fn invoke(
                &self,
                _arguments: serde_json::Value,
            ) -> std::result::Result<String, ToolError> {
                Ok(String::new())
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }
}
