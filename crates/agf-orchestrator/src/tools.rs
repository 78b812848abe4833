// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool handler registration and dispatch.
//!
//! Handlers register under `(tool_name, arg_schema)` and return the
//! canonical [`AdapterRunResult`] envelope. Each tool carries a circuit
//! breaker consulted before dispatch; an open circuit surfaces an error hint
//! instead of a call.

use agf_core::AdapterRunResult;
use agf_registry::{CircuitBreaker, CircuitConfig, CircuitState};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A registered tool handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Registered tool name.
    fn name(&self) -> &str;

    /// JSON Schema of the accepted arguments.
    fn arg_schema(&self) -> serde_json::Value;

    /// Invoke the tool.
    async fn invoke(&self, args: serde_json::Value) -> AdapterRunResult;
}

struct ToolEntry {
    handler: Arc<dyn ToolHandler>,
    breaker: Arc<CircuitBreaker>,
}

/// Registry of tool handlers with per-tool circuit breakers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
    circuit_config: CircuitConfig,
}

/// A tool's name plus argument schema, for the arbitration catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Argument schema.
    pub arg_schema: serde_json::Value,
    /// Circuit state at catalog time.
    pub circuit_state: CircuitState,
}

impl ToolRegistry {
    /// An empty registry with default circuit configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry with the given circuit configuration.
    #[must_use]
    pub fn with_circuit_config(circuit_config: CircuitConfig) -> Self {
        Self {
            circuit_config,
            ..Self::default()
        }
    }

    /// Register a handler under its own name, replacing any previous one.
    pub fn register<H: ToolHandler + 'static>(&mut self, handler: H) {
        let name = handler.name().to_string();
        self.tools.insert(
            name,
            ToolEntry {
                handler: Arc::new(handler),
                breaker: Arc::new(CircuitBreaker::new(self.circuit_config.clone())),
            },
        );
    }

    /// Sorted catalog of registered tools with live circuit states.
    #[must_use]
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|(name, entry)| ToolDescriptor {
                name: name.clone(),
                arg_schema: entry.handler.arg_schema(),
                circuit_state: entry.breaker.state(),
            })
            .collect()
    }

    /// The handler registered under `name`.
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|e| Arc::clone(&e.handler))
    }

    /// The circuit breaker for `name`.
    #[must_use]
    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.tools.get(name).map(|e| Arc::clone(&e.breaker))
    }

    /// Whether any tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn arg_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, args: serde_json::Value) -> AdapterRunResult {
            AdapterRunResult::succeeded(Uuid::nil(), args)
        }
    }

    #[tokio::test]
    async fn registered_tool_dispatches() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let handler = registry.handler("echo").unwrap();
        let result = handler.invoke(json!({"x": 1})).await;
        assert!(result.is_success());
        assert_eq!(result.data, json!({"x": 1}));
    }

    #[test]
    fn catalog_is_sorted_and_carries_circuit_state() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "echo");
        assert_eq!(catalog[0].circuit_state, CircuitState::Closed);
    }

    #[test]
    fn unknown_tool_has_no_handler() {
        let registry = ToolRegistry::new();
        assert!(registry.handler("nope").is_none());
        assert!(registry.breaker("nope").is_none());
    }
}
