//! Tool registry — the tool catalog fetched from the MCP server.
//!
//! Provides:
//! - Tool lookup by name
//! - Validation that a tool call carries the schema's required fields
//! - Conversion of the catalog into OpenAI function-tool definitions

use crate::inference::types::{FunctionDefinition, ToolDefinition};

use super::errors::McpError;
use super::types::ToolSpec;

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Tool catalog in server order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }

    pub fn get_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn all_tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a tool call against the registered schema.
    ///
    /// Only checks presence of `required` fields; full JSON Schema
    /// validation is left to the server.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let def = self.get_tool(tool_name).ok_or(McpError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        if let Some(required) = def.input_schema.get("required").and_then(|r| r.as_array()) {
            let args_obj = arguments.as_object();
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                let has_field = args_obj
                    .map(|obj| obj.contains_key(field_name))
                    .unwrap_or(false);
                if !has_field {
                    return Err(McpError::InvalidArguments {
                        tool: tool_name.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Catalog as OpenAI function tools, in server order.
    pub fn to_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(to_tool_definition).collect()
    }
}

/// Convert one MCP tool into an OpenAI function-tool definition.
pub fn to_tool_definition(spec: &ToolSpec) -> ToolDefinition {
    ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.input_schema.clone(),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool(name: &str, required: &[&str]) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": required,
            }),
        }
    }

    #[test]
    fn test_conversion_preserves_order_and_schema() {
        let registry = ToolRegistry::new(vec![sample_tool("b", &[]), sample_tool("a", &["city"])]);
        let defs = registry.to_tool_definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].function.name, "b");
        assert_eq!(defs[1].r#type, "function");
        assert_eq!(defs[1].function.description, "a tool");
        assert_eq!(defs[1].function.parameters["required"][0], "city");
    }

    #[test]
    fn test_validate_unknown_tool() {
        let registry = ToolRegistry::new(vec![sample_tool("weather", &[])]);
        let err = registry
            .validate_tool_call("nope", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
    }

    #[test]
    fn test_validate_missing_required_field() {
        let registry = ToolRegistry::new(vec![sample_tool("weather", &["city"])]);
        assert!(registry
            .validate_tool_call("weather", &serde_json::json!({"city": "Oslo"}))
            .is_ok());
        let err = registry
            .validate_tool_call("weather", &serde_json::json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.to_tool_definitions().is_empty());
    }
}
