//! Tool traits consumed by the agent orchestration layer.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{ToolDefinition, ToolOutput, ToolRiskLevel};

/// Tool interface for atomic operations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of the tool.
    fn name(&self) -> &str;

    /// Get the human-readable description.
    fn description(&self) -> &str;

    /// Get the JSON Schema for parameters.
    fn parameters(&self) -> Value;

    /// Risk classification used by approval gates.
    fn risk_level(&self) -> ToolRiskLevel {
        ToolRiskLevel::Low
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolOutput>;

    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
