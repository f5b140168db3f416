//! The sandbox execution contract.
//!
//! Every backend (in-process, subprocess, remote) implements the same
//! [`Sandbox`] trait: `run` never fails at the type level (all failures are
//! folded into [`ExecutionResult`]), `get_context` always yields the maximal
//! transportable snapshot, and `update_context` merges previously exported
//! state back in.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use codexec_core::config::SandboxSettings;
use codexec_core::Result;

use crate::taxonomy::{recovery_hint, Classified, ErrorKind};

/// A transportable namespace snapshot: identifier → tagged JSON value.
pub type VarMap = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Execution Result
// =============================================================================

/// Coarse outcome signal carried by every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ExitCode {
    /// The snippet ran to completion.
    Success,
    /// The snippet failed to parse or raised at runtime.
    Error,
    /// The execution budget expired before the snippet finished.
    Timeout,
}

impl From<ExitCode> for u8 {
    fn from(code: ExitCode) -> u8 {
        match code {
            ExitCode::Success => 0,
            ExitCode::Error => 1,
            ExitCode::Timeout => 2,
        }
    }
}

impl TryFrom<u8> for ExitCode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(ExitCode::Success),
            1 => Ok(ExitCode::Error),
            2 => Ok(ExitCode::Timeout),
            other => Err(format!("invalid exit code: {other}")),
        }
    }
}

/// The outcome of one `run` call.
///
/// Always produced, even when the backend itself misbehaves: a caller can
/// rely on receiving one of these for every snippet it submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 0 = success, 1 = error, 2 = timeout.
    pub exit_code: ExitCode,
    /// Captured standard output (never echoed to the real stdout).
    pub stdout: String,
    /// Captured diagnostic output (`debug(..)` calls, worker noise).
    pub stderr: String,
    /// Classified failure kind, when `exit_code != 0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human/agent-readable failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 1-based source line of the failure, when the engine reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_line: Option<usize>,
    /// Actionable guidance for retrying, from the error taxonomy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
    /// Transportable bindings that are new or changed relative to the state
    /// before the call.
    #[serde(default)]
    pub updated_variables: VarMap,
}

impl ExecutionResult {
    /// Build a success result.
    pub fn success(stdout: String, stderr: String, updated_variables: VarMap) -> Self {
        Self {
            exit_code: ExitCode::Success,
            stdout,
            stderr,
            error_kind: None,
            error_message: None,
            error_line: None,
            recovery_hint: None,
            updated_variables,
        }
    }

    /// Build a failure result from a classified error. The exit code follows
    /// the kind (`Timeout` → 2, anything else → 1) and the recovery hint is
    /// looked up from the taxonomy.
    pub fn failure(classified: Classified, stdout: String, stderr: String) -> Self {
        let exit_code = if classified.kind == ErrorKind::Timeout {
            ExitCode::Timeout
        } else {
            ExitCode::Error
        };
        let mut hint = recovery_hint(classified.kind).to_string();
        if let Some(suffix) = &classified.hint_suffix {
            hint.push('\n');
            hint.push_str(suffix);
        }
        Self {
            exit_code,
            stdout,
            stderr,
            error_kind: Some(classified.kind),
            error_message: Some(classified.message),
            error_line: classified.line,
            recovery_hint: Some(hint),
            updated_variables: VarMap::new(),
        }
    }

    /// Shorthand for a failure with no captured output.
    pub fn bare_failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::failure(Classified::new(kind, message), String::new(), String::new())
    }

    /// Whether the snippet ran to completion.
    pub fn is_success(&self) -> bool {
        self.exit_code == ExitCode::Success
    }
}

// =============================================================================
// Context Transfer
// =============================================================================

/// An opaque, versioned, text-safe encoding of a filtered namespace snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot(pub String);

impl ContextSnapshot {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input to `update_context`: either a previously exported blob or raw values
/// already in the caller's runtime.
#[derive(Debug, Clone)]
pub enum ContextUpdate {
    /// A blob produced by `get_context` (possibly on another instance).
    Blob(String),
    /// A raw map of transportable values.
    Values(VarMap),
}

impl From<ContextSnapshot> for ContextUpdate {
    fn from(snapshot: ContextSnapshot) -> Self {
        ContextUpdate::Blob(snapshot.0)
    }
}

impl From<VarMap> for ContextUpdate {
    fn from(values: VarMap) -> Self {
        ContextUpdate::Values(values)
    }
}

/// Source snippets replayed into a fresh worker namespace before the user
/// code runs. Functions and imports cannot cross the boundary as values, so
/// they travel as source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraDefinitions {
    /// `import` statements evaluated first.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Function/constant definition snippets evaluated next.
    #[serde(default)]
    pub functions: Vec<String>,
}

impl ExtraDefinitions {
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.functions.is_empty()
    }
}

// =============================================================================
// Options
// =============================================================================

/// Per-instance execution policy.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Budget for the snippet itself.
    pub timeout: Duration,
    /// Extra wall-clock allowance for worker startup/teardown.
    pub startup_grace: Duration,
    /// Namespace entries never exported across a serialization boundary.
    pub exclude_names: Vec<String>,
    /// Name prefixes never exported.
    pub exclude_prefixes: Vec<String>,
    /// Drop function pointers from exported context.
    pub exclude_callables: bool,
    /// Prefix that marks dynamically-loaded tool references in diagnostics.
    pub tool_prefix: String,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            startup_grace: Duration::from_secs(5),
            exclude_names: Vec::new(),
            exclude_prefixes: Vec::new(),
            exclude_callables: false,
            tool_prefix: "tool_".to_string(),
        }
    }
}

impl SandboxOptions {
    /// Build options from the loaded configuration section.
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.default_timeout_ms),
            startup_grace: Duration::from_millis(settings.startup_grace_ms),
            exclude_names: settings.exclude_names.clone(),
            exclude_prefixes: settings.exclude_prefixes.clone(),
            exclude_callables: settings.exclude_callables,
            tool_prefix: settings.tool_prefix.clone(),
        }
    }

    /// Override the execution budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// =============================================================================
// Sandbox Trait
// =============================================================================

/// Uniform execution contract across all backends.
///
/// Implementations serialize `run`, `get_context`, `update_context`, and
/// `reset` behind one per-instance lock: only one operation is mid-flight at
/// a time, and two instances never share state except through explicit
/// context transfer.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute one snippet against the persistent namespace.
    ///
    /// Never returns an error: parse failures, runtime exceptions, timeouts,
    /// and transport failures all come back as a populated
    /// [`ExecutionResult`].
    async fn run(&self, code: &str) -> ExecutionResult;

    /// Export the transportable subset of the current namespace. Never
    /// fails; entries that cannot cross the boundary are simply absent.
    async fn get_context(&self) -> ContextSnapshot;

    /// Merge bindings into the namespace, overwriting same-named keys.
    async fn update_context(&self, update: ContextUpdate) -> Result<()>;

    /// Clear the namespace entirely.
    async fn reset(&self);

    /// Release any child process or remote session held by this instance.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_round_trips_through_u8() {
        for code in [ExitCode::Success, ExitCode::Error, ExitCode::Timeout] {
            let raw: u8 = code.into();
            assert_eq!(ExitCode::try_from(raw).unwrap(), code);
        }
        assert!(ExitCode::try_from(3u8).is_err());
    }

    #[test]
    fn failure_result_carries_hint_and_exit_code() {
        let result = ExecutionResult::bare_failure(ErrorKind::DivisionByZero, "1 / 0");
        assert_eq!(result.exit_code, ExitCode::Error);
        assert!(!result.recovery_hint.as_deref().unwrap_or("").is_empty());

        let timeout = ExecutionResult::bare_failure(ErrorKind::Timeout, "budget expired");
        assert_eq!(timeout.exit_code, ExitCode::Timeout);
    }
}
