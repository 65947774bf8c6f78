//! Local tools a cloud back-end may invoke during a turn.

mod builtin;
mod dispatcher;

pub use builtin::{BotInfoTool, CalculateTool, EarthquakeSearchTool, DEFAULT_EARTHQUAKE_API_BASE};
pub use dispatcher::{LocalTool, ToolDispatcher, ToolDispatcherBuilder, ToolResult};

/// Dispatcher with every built-in tool registered.
pub fn default_dispatcher(backend: &str, earthquake_api_base: &str) -> ToolDispatcher {
    ToolDispatcher::builder()
        .register(CalculateTool)
        .register(BotInfoTool::new(backend))
        .register(EarthquakeSearchTool::new(earthquake_api_base, 30_000))
        .build()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::default_dispatcher;

    #[test]
    fn default_dispatcher_registers_builtins() {
        let dispatcher = default_dispatcher("rule_based", "http://localhost/query");
        assert_eq!(
            dispatcher.tool_names(),
            vec!["calculate", "earthquake_search", "get_bot_info"]
        );
        let result = dispatcher.execute("calculate", &json!({ "expression": "6 * 7" }));
        assert!(result.success);
        assert_eq!(result.content, "6 * 7 = 42");
    }

    #[test]
    fn schema_rejects_unknown_operation() {
        let dispatcher = default_dispatcher("rule_based", "http://localhost/query");
        let result = dispatcher.execute(
            "calculate",
            &json!({ "operation": "pow", "a": 2, "b": 3 }),
        );
        assert!(!result.success);
        assert!(result.content.contains("invalid arguments for 'calculate'"));
    }
}
