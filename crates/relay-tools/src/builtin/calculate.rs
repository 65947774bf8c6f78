use relay_ai::ToolDefinition;
use relay_rules::{evaluate, format_number};
use serde_json::{json, Value};

use crate::LocalTool;

/// Arithmetic via the restricted evaluator, or a single binary operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculateTool;

impl LocalTool for CalculateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculate".to_string(),
            description: "Evaluate arithmetic. Pass `expression` (digits and + - * / % ^ ( ) only), \
                          or `operation` with operands `a` and `b`."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": { "type": "string" },
                    "operation": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide"]
                    },
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "additionalProperties": false
            }),
        }
    }

    fn execute(&self, arguments: &Value) -> Result<String, String> {
        if let Some(expression) = arguments.get("expression").and_then(Value::as_str) {
            let value = evaluate(expression).map_err(|error| error.to_string())?;
            return Ok(format!("{} = {}", expression.trim(), format_number(value)));
        }

        let operation = arguments.get("operation").and_then(Value::as_str);
        let a = arguments.get("a").and_then(Value::as_f64);
        let b = arguments.get("b").and_then(Value::as_f64);
        let (Some(operation), Some(a), Some(b)) = (operation, a, b) else {
            return Err("provide `expression`, or `operation` with both `a` and `b`".to_string());
        };

        let (symbol, value) = match operation {
            "add" => ("+", a + b),
            "subtract" => ("-", a - b),
            "multiply" => ("×", a * b),
            "divide" if b == 0.0 => return Err("division by zero".to_string()),
            "divide" => ("÷", a / b),
            other => return Err(format!("unsupported operation '{other}'")),
        };
        Ok(format!(
            "{} {symbol} {} = {}",
            format_number(a),
            format_number(b),
            format_number(value)
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::CalculateTool;
    use crate::LocalTool;

    #[test]
    fn evaluates_expressions() {
        let output = CalculateTool
            .execute(&json!({ "expression": "sqrt" }))
            .expect_err("letters are rejected");
        assert!(output.contains("unexpected character"));
        assert_eq!(
            CalculateTool.execute(&json!({ "expression": " (2 + 3) * 4 " })),
            Ok("(2 + 3) * 4 = 20".to_string())
        );
    }

    #[test]
    fn applies_binary_operations() {
        assert_eq!(
            CalculateTool.execute(&json!({ "operation": "add", "a": 25, "b": 17 })),
            Ok("25 + 17 = 42".to_string())
        );
        assert_eq!(
            CalculateTool.execute(&json!({ "operation": "divide", "a": 1, "b": 4 })),
            Ok("1 ÷ 4 = 0.25".to_string())
        );
        assert_eq!(
            CalculateTool.execute(&json!({ "operation": "divide", "a": 1, "b": 0 })),
            Err("division by zero".to_string())
        );
    }

    #[test]
    fn missing_operands_are_reported() {
        assert!(CalculateTool
            .execute(&json!({ "operation": "add", "a": 1 }))
            .is_err());
    }
}
