//! Stage identities, stage specs and model responses

use serde::{Deserialize, Serialize};

/// One analytical step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Segmentation,
    Emotion,
    Roles,
    Topics,
    Synthesis,
    Evaluation,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [StageName; 6] = [
        StageName::Segmentation,
        StageName::Emotion,
        StageName::Roles,
        StageName::Topics,
        StageName::Synthesis,
        StageName::Evaluation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::Emotion => "emotion",
            Self::Roles => "roles",
            Self::Topics => "topics",
            Self::Synthesis => "synthesis",
            Self::Evaluation => "evaluation",
        }
    }

    pub fn from_name(s: &str) -> Result<Self, StageNameParseError> {
        match s {
            "segmentation" => Ok(Self::Segmentation),
            "emotion" => Ok(Self::Emotion),
            "roles" => Ok(Self::Roles),
            "topics" => Ok(Self::Topics),
            "synthesis" => Ok(Self::Synthesis),
            "evaluation" => Ok(Self::Evaluation),
            _ => Err(StageNameParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing StageName from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNameParseError(pub String);

impl std::fmt::Display for StageNameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid stage name: {}", self.0)
    }
}

impl std::error::Error for StageNameParseError {}

/// Invocation mode of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// First attempt
    Primary,
    /// Stricter decoding after an output-contract violation
    Repair,
    /// Second full attempt with adjusted decoding (synthesis only)
    Retry,
}

impl StageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Repair => "repair",
            Self::Retry => "retry",
        }
    }
}

/// Per-stage, per-mode decoding configuration. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub stage: StageName,
    pub mode: StageMode,
    pub model_alias: String,
    pub prompt_alias: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Raw output of one model invocation. Scoped to a single stage call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Model identity that actually served the call
    pub model: String,
    /// Prompt alias actually used
    pub prompt_alias: String,
}
