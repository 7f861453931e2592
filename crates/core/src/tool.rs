//! Tool trait, registry, and control-signal dispatch.
//!
//! Tools are opaque side-effecting capabilities: the core only sees their
//! declared schema (forwarded to the LLM) and the result string. Two
//! reserved names, `finish` and `ask_user`, are loop-control signals and
//! never reach an executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// Reserved tool name that terminates the agent loop with a summary.
pub const FINISH_TOOL: &str = "finish";

/// Reserved tool name that suspends the loop pending user input.
pub const ASK_USER_TOOL: &str = "ask_user";

/// A decoded request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,
}

/// Decode a wire-format argument string into a JSON object.
///
/// Malformed payloads yield an empty object for that one call; sibling
/// calls in the same turn are unaffected.
pub fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
}

/// How a tool call from the model should be handled by the loop driver.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// An ordinary tool: look up the registry and execute.
    Call(ToolCall),

    /// Terminate the loop with a summary of what was accomplished.
    Finish { call_id: String, summary: String },

    /// Suspend the loop and hand the question back to the user.
    AskUser { call_id: String, question: String },
}

impl Dispatch {
    /// Classify a wire-format tool call, decoding its arguments leniently.
    pub fn classify(call: &MessageToolCall) -> Self {
        let arguments = decode_arguments(&call.arguments);
        match call.name.as_str() {
            FINISH_TOOL => Dispatch::Finish {
                call_id: call.id.clone(),
                summary: arguments["summary"].as_str().unwrap_or_default().to_string(),
            },
            ASK_USER_TOOL => Dispatch::AskUser {
                call_id: call.id.clone(),
                question: arguments["message"].as_str().unwrap_or_default().to_string(),
            },
            _ => Dispatch::Call(ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            }),
        }
    }
}

/// Definitions for the reserved control-signal tools, advertised to the
/// model alongside the registry's tools.
pub fn control_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: FINISH_TOOL.into(),
            description: "Signal that the current task is complete and ready for review."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "A summary of what you accomplished"
                    }
                },
                "required": ["summary"]
            }),
        },
        ToolDefinition {
            name: ASK_USER_TOOL.into(),
            description: "Ask the user a question when blocked or in need of clarification."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The question to show the user"
                    }
                },
                "required": ["message"]
            }),
        },
    ]
}

/// The core Tool trait.
///
/// Implementations live outside this workspace; the driver only relies on
/// the declared schema and the returned output.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions plus the reserved control signals, for the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs.extend(control_definitions());
        defs
    }

    /// Parameter names a tool declares as required in its schema.
    pub fn required_parameters(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|t| t.parameters_schema())
            .and_then(|schema| {
                schema["required"].as_array().map(|params| {
                    params
                        .iter()
                        .filter_map(|p| p.as_str().map(String::from))
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    /// Execute a tool call.
    pub async fn execute(
        &self,
        call: &ToolCall,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
