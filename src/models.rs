use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::JavaScript, Language::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "cpp" | "c++" => Ok(Language::Cpp),
            _ => Err(format!("unsupported language: {s}")),
        }
    }
}

/// One queued execution request. The payload travels through the queue
/// backend as JSON, so everything here must round-trip through serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub language: Language,
    pub source: String,
    pub submitted_at_ms: u64,
    /// Times this job has been handed to a worker. Incremented by the queue
    /// backend on dequeue and preserved across lease-expiry requeues.
    #[serde(default)]
    pub deliveries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CompileError,
    RuntimeError,
    TimeoutError,
    ResourceError,
    InfrastructureError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { stdout: String },
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// The single normalized result every execution resolves to, successful or
/// not. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Resource ceilings for one sandboxed execution. Constructed fresh per
/// execution from config defaults; never shared across executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub wall_clock_ms: u64,
    pub compile_wall_clock_ms: u64,
    pub memory_bytes: u64,
    pub max_output_bytes: usize,
    pub allow_network: bool,
}

impl SandboxLimits {
    pub fn normalized(mut self) -> Self {
        self.wall_clock_ms = self.wall_clock_ms.clamp(50, 120_000);
        self.compile_wall_clock_ms = self.compile_wall_clock_ms.clamp(500, 300_000);
        self.memory_bytes = self.memory_bytes.clamp(16 << 20, 8 << 30);
        self.max_output_bytes = self.max_output_bytes.clamp(1024, 4 * 1024 * 1024);
        self.allow_network = false;
        self
    }
}

pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{Job, Language, SandboxLimits};

    #[test]
    fn normalizes_limits_to_safe_bounds() {
        let normalized = SandboxLimits {
            wall_clock_ms: 1,
            compile_wall_clock_ms: 1,
            memory_bytes: 1,
            max_output_bytes: 99_000_000,
            allow_network: true,
        }
        .normalized();

        assert_eq!(normalized.wall_clock_ms, 50);
        assert_eq!(normalized.compile_wall_clock_ms, 500);
        assert_eq!(normalized.memory_bytes, 16 << 20);
        assert_eq!(normalized.max_output_bytes, 4 * 1024 * 1024);
        assert!(!normalized.allow_network);
    }

    #[test]
    fn job_payload_round_trips_without_deliveries_field() {
        let raw = r#"{"id":"6f9b6d2a-8a1e-4f6c-9a2e-3f4b5c6d7e8f","language":"python","source":"print(1)","submitted_at_ms":0}"#;
        let job: Job = serde_json::from_str(raw).expect("payload parses");
        assert_eq!(job.language, Language::Python);
        assert_eq!(job.deliveries, 0);
    }
}
