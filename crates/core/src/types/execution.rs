use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// =============================================================================
// Execution Types
// =============================================================================

/// Source language of a submitted workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[serde(alias = "js")]
    JavaScript,
    C,
    #[serde(alias = "c++")]
    Cpp,
}

impl Language {
    /// Every language the interpreter knows about.
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::C,
        Language::Cpp,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    /// File extension (without the dot) used for workload files.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::JavaScript => "js",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::JavaScript),
            "c" => Ok(Self::C),
            "cpp" | "c++" => Ok(Self::Cpp),
            other => Err(Error::unsupported_language(format!(
                "Unsupported language '{}'. Supported languages: {}",
                other,
                Language::ALL.map(|l| l.as_str()).join(", ")
            ))),
        }
    }
}

/// Which execution strategy a dispatcher uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Short-lived, environment-stripped subprocess.
    #[default]
    Process,
    /// External VM-isolated sandbox runtime.
    VmSandbox,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => f.write_str("process"),
            Self::VmSandbox => f.write_str("vm-sandbox"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" | "python" => Ok(Self::Process),
            "vm-sandbox" | "vm_sandbox" | "hyperlight" => Ok(Self::VmSandbox),
            other => Err(Error::invalid_request(format!(
                "Unknown backend '{}'. Expected 'process' or 'vm-sandbox'",
                other
            ))),
        }
    }
}

/// One unit of submitted work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source text to run.
    pub source: String,
    /// Language of `source`.
    pub language: Language,
    /// Wall-clock budget in seconds.
    pub timeout_secs: u64,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>, language: Language, timeout_secs: u64) -> Self {
        Self {
            source: source.into(),
            language,
            timeout_secs,
        }
    }
}

/// Normalized outcome of running a workload on any backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the workload ran to a successful completion.
    pub succeeded: bool,
    /// Captured (possibly truncated) output.
    pub output: String,
    /// Additional failure detail, if any.
    pub error_detail: Option<String>,
}

impl ExecutionResult {
    /// Text shown when an execution produced nothing at all.
    pub const NO_OUTPUT: &'static str = "(No output)";

    /// Create a successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            error_detail: None,
        }
    }

    /// Create a failed result whose output is the user-facing explanation.
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output: output.into(),
            error_detail: None,
        }
    }

    /// Attach failure detail.
    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// The single human-readable string handed back to the caller. Never empty.
    pub fn into_text(self) -> String {
        if !self.output.trim().is_empty() {
            return self.output;
        }
        match self.error_detail {
            Some(detail) if !detail.trim().is_empty() => detail,
            _ => Self::NO_OUTPUT.to_string(),
        }
    }
}
