use relay_ai::ToolDefinition;
use serde_json::{json, Value};

use crate::LocalTool;

/// Describes the running bot: active back-end and the commands it accepts.
#[derive(Debug, Clone)]
pub struct BotInfoTool {
    backend: String,
}

impl BotInfoTool {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

impl LocalTool for BotInfoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_bot_info".to_string(),
            description: "Describe this bot, its active back-end and its commands.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "detail_level": { "type": "string", "enum": ["basic", "detailed"] }
                },
                "additionalProperties": false
            }),
        }
    }

    fn execute(&self, arguments: &Value) -> Result<String, String> {
        let detailed = arguments.get("detail_level").and_then(Value::as_str) == Some("detailed");
        let mut info = format!(
            "Relay chat bot v{}\nBack-end: {}\nTools: calculate, get_bot_info, earthquake_search",
            env!("CARGO_PKG_VERSION"),
            self.backend
        );
        if detailed {
            info.push_str(
                "\n\nCommands:\n\
                 /help - show what the bot can do\n\
                 /new - start a new conversation\n\
                 Send a photo with a caption to ask about an image.",
            );
        }
        Ok(info)
    }
}
