use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use jsonschema::validator_for;
use relay_ai::ToolDefinition;
use serde_json::Value;

/// Outcome of one tool invocation. Never carries a raised error; failures are
/// flagged with `success == false` and described in `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: message.into(),
        }
    }
}

/// A named local function the model may invoke.
///
/// Implementations may block (HTTP lookups use a blocking client); the
/// dispatcher keeps them off async worker threads.
pub trait LocalTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn execute(&self, arguments: &Value) -> Result<String, String>;
}

/// Static name-to-tool mapping. Read-only once built, so lookups take no lock.
#[derive(Clone, Default)]
pub struct ToolDispatcher {
    tools: Arc<BTreeMap<String, Arc<dyn LocalTool>>>,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct ToolDispatcherBuilder {
    tools: BTreeMap<String, Arc<dyn LocalTool>>,
}

impl ToolDispatcherBuilder {
    /// Registers `tool`, replacing any earlier tool with the same name.
    pub fn register(mut self, tool: impl LocalTool + 'static) -> Self {
        let name = tool.definition().name;
        self.tools.insert(name, Arc::new(tool));
        self
    }

    pub fn build(self) -> ToolDispatcher {
        ToolDispatcher {
            tools: Arc::new(self.tools),
        }
    }
}

impl ToolDispatcher {
    pub fn builder() -> ToolDispatcherBuilder {
        ToolDispatcherBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn execute(&self, name: &str, arguments: &Value) -> ToolResult {
        let Some(tool) = self.tools.get(name).cloned() else {
            tracing::warn!(tool = name, "unknown tool requested");
            return ToolResult::error(format!("unknown tool '{name}'"));
        };

        let definition = tool.definition();
        if let Err(error) = validate_tool_arguments(&definition, arguments) {
            tracing::debug!(tool = name, %error, "tool arguments rejected");
            return ToolResult::error(error);
        }

        let result = if tokio::runtime::Handle::try_current().is_ok() {
            run_off_runtime(tool, arguments.clone())
        } else {
            run_guarded(tool.as_ref(), arguments)
        };
        tracing::debug!(tool = name, success = result.success, "tool executed");
        result
    }
}

fn run_guarded(tool: &dyn LocalTool, arguments: &Value) -> ToolResult {
    match catch_unwind(AssertUnwindSafe(|| tool.execute(arguments))) {
        Ok(Ok(content)) => ToolResult::ok(content),
        Ok(Err(message)) => ToolResult::error(message),
        Err(_) => ToolResult::error(format!("tool '{}' panicked", tool.definition().name)),
    }
}

// Blocking clients must not run on an async worker thread.
fn run_off_runtime(tool: Arc<dyn LocalTool>, arguments: Value) -> ToolResult {
    std::thread::scope(|scope| {
        let worker = scope.spawn(|| run_guarded(tool.as_ref(), &arguments));
        worker
            .join()
            .unwrap_or_else(|_| ToolResult::error("tool worker thread panicked"))
    })
}

pub(crate) fn validate_tool_arguments(
    definition: &ToolDefinition,
    arguments: &Value,
) -> Result<(), String> {
    let validator = validator_for(&definition.parameters)
        .map_err(|error| format!("invalid JSON schema for '{}': {error}", definition.name))?;

    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!(
            "invalid arguments for '{}': {}",
            definition.name, first
        ));
    }
    Ok(())
}
