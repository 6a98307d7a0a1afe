//! Agent-facing tools implementing the `Tool` trait.
//!
//! These tools are what the orchestration layer registers. Both delegate to a
//! shared [`ExecutionDispatcher`], so whichever backend was configured at
//! startup serves every call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use code_interpreter_core::{traits::Tool, types::ToolOutput, types::ToolRiskLevel, Result};

use crate::dispatcher::ExecutionDispatcher;

// =============================================================================
// Code Execution Tool
// =============================================================================

/// Tool running source code through the configured backend.
///
/// Risk level: HIGH. It executes arbitrary code.
pub struct CodeExecutionTool {
    dispatcher: Arc<ExecutionDispatcher>,
    description: String,
}

impl CodeExecutionTool {
    pub fn new(dispatcher: Arc<ExecutionDispatcher>) -> Self {
        let languages = language_names(&dispatcher);
        let description = format!(
            "Execute source code in an isolated {} environment and return its output. \
             Supported languages: {}. Defaults to {} when no language is given. \
             Print results explicitly; only written output is returned.",
            dispatcher.kind(),
            languages.join(", "),
            dispatcher.default_language(),
        );
        Self {
            dispatcher,
            description,
        }
    }
}

fn language_names(dispatcher: &ExecutionDispatcher) -> Vec<&'static str> {
    dispatcher
        .supported_languages()
        .iter()
        .map(|l| l.as_str())
        .collect()
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The source code to execute"
                },
                "language": {
                    "type": "string",
                    "description": "Programming language of the code",
                    "enum": language_names(&self.dispatcher),
                    "default": self.dispatcher.default_language().as_str()
                }
            },
            "required": ["code"]
        })
    }

    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::High
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| code_interpreter_core::Error::invalid_request("code is required"))?;
        let language = args.get("language").and_then(|v| v.as_str());

        let result = self.dispatcher.execute_detailed(code, language).await;
        let data = json!({
            "backend": self.dispatcher.kind().to_string(),
            "language": language.unwrap_or(self.dispatcher.default_language().as_str()),
            "error_detail": result.error_detail,
        });

        let succeeded = result.succeeded;
        let text = result.into_text();
        let output = if succeeded {
            ToolOutput::text(text)
        } else {
            ToolOutput::error(text)
        };
        Ok(output.with_data(data))
    }
}

// =============================================================================
// Clear Cache Tool
// =============================================================================

/// Tool asking the sandbox runtime to drop cached state.
///
/// Risk level: MEDIUM.
pub struct ClearSandboxCacheTool {
    dispatcher: Arc<ExecutionDispatcher>,
}

impl ClearSandboxCacheTool {
    pub fn new(dispatcher: Arc<ExecutionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Tool for ClearSandboxCacheTool {
    fn name(&self) -> &str {
        "clear_sandbox_cache"
    }

    fn description(&self) -> &str {
        "Clear cached state held by the code execution sandbox."
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
        let message = self.dispatcher.clear_cache().await;
        if message.starts_with("Error:") {
            Ok(ToolOutput::error(message))
        } else {
            Ok(ToolOutput::text(message))
        }
    }
}
