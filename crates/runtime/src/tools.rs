//! Tool invocation contract. The engine knows nothing about a tool beyond
//! this trait: a name, the parameters it requires, and an execute call that
//! either yields an output value or a failure with an optional status code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A failed tool call. `status` carries an HTTP-like code when the tool has
/// one; a statusless failure is treated as a transient network fault.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ToolFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl ToolFailure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    pub fn statusless(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parameter names that must be present in the resolved input object.
    fn required_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolFailure>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Checks the resolved input against the tool's declared requirements before
/// anything is dispatched. A miss is a validation failure, never retried.
pub fn validate_input(tool: &dyn Tool, input: &Value) -> Result<(), ToolFailure> {
    for required in tool.required_params() {
        let present = input.get(required).map(|value| !value.is_null()).unwrap_or(false);
        if !present {
            return Err(ToolFailure::new(
                400,
                format!("tool {} requires parameter `{required}`", tool.name()),
            ));
        }
    }
    Ok(())
}
