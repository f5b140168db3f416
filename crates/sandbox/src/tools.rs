//! Sandbox tools implementing the `Tool` trait.
//!
//! `CodeSandbox` wraps one sandbox instance behind three operations the
//! agent can call. None of them ever returns an error: the consumer is a
//! tool-calling agent that cannot catch exceptions, so every failure path is
//! flattened into a descriptive string.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use codexec_core::events::{EventEnvelope, EventType, ToolExecPayload};
use codexec_core::traits::{EventEmitter, Tool};
use codexec_core::types::{ToolOutput, ToolRiskLevel};
use codexec_core::Result;

use crate::context;
use crate::contract::Sandbox;

/// Shown when a snippet succeeds without printing anything.
const EMPTY_OUTPUT_PLACEHOLDER: &str = "Code executed successfully (no output).";

/// Shown when the namespace has no entries.
const EMPTY_NAMESPACE_MESSAGE: &str = "(sandbox namespace is empty)";

/// Longest value preview rendered per variable.
const PREVIEW_LIMIT: usize = 80;

// =============================================================================
// Code Sandbox Adapter
// =============================================================================

/// Agent-facing wrapper around one sandbox instance.
pub struct CodeSandbox {
    sandbox: Arc<dyn Sandbox>,
    event_emitter: Option<Arc<dyn EventEmitter>>,
}

impl CodeSandbox {
    /// Wrap a sandbox instance.
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            event_emitter: None,
        }
    }

    /// Set an event emitter for auditing executions.
    pub fn with_event_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.event_emitter = Some(emitter);
        self
    }

    /// Run a snippet; the outcome is always a descriptive string.
    pub async fn execute_code(&self, code: &str) -> String {
        let started = Instant::now();
        let result = self.sandbox.run(code).await;

        let rendered = if result.is_success() {
            if result.stdout.is_empty() {
                EMPTY_OUTPUT_PLACEHOLDER.to_string()
            } else {
                result.stdout.clone()
            }
        } else {
            let kind = result
                .error_kind
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "UnknownError".to_string());
            let message = result.error_message.as_deref().unwrap_or("execution failed");
            let mut text = match result.error_line {
                Some(line) => format!("Error ({kind}) at line {line}: {message}"),
                None => format!("Error ({kind}): {message}"),
            };
            if let Some(hint) = &result.recovery_hint {
                text.push('\n');
                text.push_str(hint);
            }
            text
        };

        if let Some(emitter) = &self.event_emitter {
            let payload = ToolExecPayload {
                tool_name: "execute_code".to_string(),
                input: Some(json!({ "code": code })),
                output: Some(rendered.clone()),
                duration_ms: Some(started.elapsed().as_millis() as u64),
                error: if result.is_success() {
                    None
                } else {
                    result.error_message.clone()
                },
            };
            emitter
                .emit(
                    EventEnvelope::new(
                        EventType::ToolExecFinished,
                        serde_json::to_value(payload).unwrap_or_default(),
                    )
                    .with_actor("code-sandbox"),
                )
                .await;
        }

        rendered
    }

    /// Summarize the namespace for agent introspection: one line per
    /// variable with its type and a truncated preview.
    pub async fn get_sandbox_context(&self) -> String {
        let snapshot = self.sandbox.get_context().await;
        let variables = match context::decode(snapshot.as_str()) {
            Ok(variables) => variables,
            Err(err) => return format!("Error (ContextError): {err}"),
        };

        if variables.is_empty() {
            return EMPTY_NAMESPACE_MESSAGE.to_string();
        }

        let mut lines = Vec::with_capacity(variables.len());
        for (name, value) in &variables {
            lines.push(format!(
                "{name} ({}): {}",
                value_type_name(value),
                preview(value)
            ));
        }
        lines.join("\n")
    }

    /// Clear the namespace entirely.
    pub async fn reset_sandbox(&self) -> String {
        self.sandbox.reset().await;
        "Sandbox namespace cleared.".to_string()
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "unit",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(fields) if fields.contains_key("$fnptr") => "function",
        Value::Object(_) => "map",
    }
}

fn preview(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= PREVIEW_LIMIT {
        return rendered;
    }
    let truncated: String = rendered.chars().take(PREVIEW_LIMIT).collect();
    format!("{truncated}…")
}

// =============================================================================
// Tool Wrappers
// =============================================================================

/// Tool for executing code in the persistent sandbox namespace.
///
/// Risk level: HIGH.
pub struct ExecuteCodeTool {
    adapter: Arc<CodeSandbox>,
}

impl ExecuteCodeTool {
    pub fn new(adapter: Arc<CodeSandbox>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute a code snippet in the sandbox. Variables persist between \
         calls, so the task can be built up step by step. Returns the \
         snippet's printed output, or a descriptive error with recovery \
         guidance."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The code snippet to execute"
                }
            },
            "required": ["code"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::High
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let Some(code) = args.get("code").and_then(|v| v.as_str()) else {
            // Even argument errors come back as descriptive text.
            return Ok(ToolOutput::error(
                "Error (InvalidArguments): 'code' is required and must be a string",
            ));
        };
        Ok(ToolOutput::text(self.adapter.execute_code(code).await))
    }
}

/// Tool for inspecting the sandbox namespace.
///
/// Risk level: LOW.
pub struct SandboxContextTool {
    adapter: Arc<CodeSandbox>,
}

impl SandboxContextTool {
    pub fn new(adapter: Arc<CodeSandbox>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Tool for SandboxContextTool {
    fn name(&self) -> &str {
        "get_sandbox_context"
    }

    fn description(&self) -> &str {
        "List the variables currently defined in the sandbox namespace, with \
         their types and value previews."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::text(self.adapter.get_sandbox_context().await))
    }
}

/// Tool for clearing the sandbox namespace.
///
/// Risk level: MEDIUM.
pub struct ResetSandboxTool {
    adapter: Arc<CodeSandbox>,
}

impl ResetSandboxTool {
    pub fn new(adapter: Arc<CodeSandbox>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Tool for ResetSandboxTool {
    fn name(&self) -> &str {
        "reset_sandbox"
    }

    fn description(&self) -> &str {
        "Clear all variables from the sandbox namespace, starting fresh."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Medium
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::text(self.adapter.reset_sandbox().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inprocess::InProcessSandbox;

    fn adapter() -> Arc<CodeSandbox> {
        Arc::new(CodeSandbox::new(Arc::new(InProcessSandbox::default())))
    }

    #[tokio::test]
    async fn execute_code_returns_stdout() {
        let adapter = adapter();
        let output = adapter.execute_code(r#"print("hi there");"#).await;
        assert_eq!(output, "hi there\n");
    }

    #[tokio::test]
    async fn execute_code_placeholder_for_silent_success() {
        let adapter = adapter();
        let output = adapter.execute_code("let quiet = 1;").await;
        assert_eq!(output, EMPTY_OUTPUT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn execute_code_formats_failures_with_hint() {
        let adapter = adapter();
        let output = adapter.execute_code("let d = 0; 1 / d").await;
        assert!(output.starts_with("Error (DivisionByZeroError)"), "{output}");
        assert!(output.lines().count() > 1, "hint should follow the error line");
    }

    #[tokio::test]
    async fn context_summary_lists_types_and_previews() {
        let adapter = adapter();
        adapter
            .execute_code(r#"let n = 7; let s = "abc"; let xs = [1, 2];"#)
            .await;

        let summary = adapter.get_sandbox_context().await;
        assert!(summary.contains("n (int): 7"));
        assert!(summary.contains("s (string): abc"));
        assert!(summary.contains("xs (array): [1,2]"));
    }

    #[tokio::test]
    async fn context_summary_reports_empty_namespace() {
        let adapter = adapter();
        assert_eq!(adapter.get_sandbox_context().await, EMPTY_NAMESPACE_MESSAGE);
    }

    #[tokio::test]
    async fn reset_then_reference_is_an_error_string_not_a_crash() {
        let adapter = adapter();
        adapter.execute_code("let x = 1;").await;
        assert_eq!(adapter.reset_sandbox().await, "Sandbox namespace cleared.");

        let output = adapter.execute_code("print(x);").await;
        assert!(output.starts_with("Error (UndefinedVariableError)"), "{output}");
    }

    #[tokio::test]
    async fn tools_never_error_even_on_bad_arguments() {
        let tool = ExecuteCodeTool::new(adapter());
        let output = tool.execute(json!({})).await.unwrap();
        assert!(!output.success);
        assert!(output.content.contains("InvalidArguments"));

        let output = tool
            .execute(json!({"code": "definitely not valid ]]]"}))
            .await
            .unwrap();
        assert!(output.success, "failures are descriptive text, not errors");
        assert!(output.content.starts_with("Error (SyntaxError)"));
    }

    #[tokio::test]
    async fn risk_levels_match_operation_impact() {
        let adapter = adapter();
        assert_eq!(
            ExecuteCodeTool::new(adapter.clone()).risk_level(),
            ToolRiskLevel::High
        );
        assert_eq!(
            ResetSandboxTool::new(adapter.clone()).risk_level(),
            ToolRiskLevel::Medium
        );
        assert_eq!(
            SandboxContextTool::new(adapter).risk_level(),
            ToolRiskLevel::Low
        );
    }
}
