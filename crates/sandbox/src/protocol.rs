//! Worker wire protocol.
//!
//! One framed request travels down the child's stdin, one framed response
//! comes back up its stdout. Frames are a `u32` little-endian byte length
//! followed by a JSON payload; length framing removes any partial-read
//! ambiguity on the pipe. The worker reads synchronously, the parent
//! asynchronously, so both flavors live here.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::contract::{ExecutionResult, ExitCode, ExtraDefinitions, VarMap};
use crate::taxonomy::{recovery_hint, ErrorKind};

/// Wire protocol version; bumped on any incompatible frame change.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame. Large enough for any realistic namespace,
/// small enough to stop a corrupted length prefix from allocating the moon.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Transport-level framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")]
    TooLarge(usize),
}

// =============================================================================
// Messages
// =============================================================================

/// Request sent to the worker. Constructed fresh per call; immutable once
/// sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Always `"execute"`; rejected otherwise so future commands can be
    /// added without ambiguity.
    pub command: String,
    /// Wire protocol version.
    pub protocol: u32,
    /// The snippet to run.
    pub code: String,
    /// The parent's transportable namespace at call time.
    pub base_namespace: VarMap,
    /// Extra bindings layered over the base namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_delta: Option<VarMap>,
    /// Source snippets replayed before the code runs.
    #[serde(default)]
    pub extra_definitions: ExtraDefinitions,
    /// Execution budget for the snippet, in milliseconds.
    pub timeout_ms: u64,
}

impl WorkerRequest {
    pub fn execute(
        code: impl Into<String>,
        base_namespace: VarMap,
        context_delta: Option<VarMap>,
        extra_definitions: ExtraDefinitions,
        timeout_ms: u64,
    ) -> Self {
        Self {
            command: "execute".to_string(),
            protocol: PROTOCOL_VERSION,
            code: code.into(),
            base_namespace,
            context_delta,
            extra_definitions,
            timeout_ms,
        }
    }
}

/// Coarse worker outcome on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Success,
    Error,
    Timeout,
}

/// Response from the worker: the `ExecutionResult` equivalent that crosses
/// the pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub status: WorkerStatus,
    /// Captured standard output.
    pub output: String,
    /// Captured diagnostic output.
    #[serde(default)]
    pub stderr: String,
    /// Transportable bindings that are new or changed.
    #[serde(default)]
    pub variables: VarMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_line: Option<usize>,
    /// Full hint text, so tool-specific augmentation computed in the worker
    /// survives the hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
}

impl WorkerResponse {
    /// Project a locally built result onto the wire shape.
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            status: match result.exit_code {
                ExitCode::Success => WorkerStatus::Success,
                ExitCode::Error => WorkerStatus::Error,
                ExitCode::Timeout => WorkerStatus::Timeout,
            },
            output: result.stdout.clone(),
            stderr: result.stderr.clone(),
            variables: result.updated_variables.clone(),
            error_kind: result.error_kind,
            error_message: result.error_message.clone(),
            error_line: result.error_line,
            recovery_hint: result.recovery_hint.clone(),
        }
    }

    /// Rebuild the caller-facing result on the parent side.
    pub fn into_result(self) -> ExecutionResult {
        let exit_code = match self.status {
            WorkerStatus::Success => ExitCode::Success,
            WorkerStatus::Error => ExitCode::Error,
            WorkerStatus::Timeout => ExitCode::Timeout,
        };
        let recovery_hint = self
            .recovery_hint
            .or_else(|| self.error_kind.map(|kind| recovery_hint(kind).to_string()));
        ExecutionResult {
            exit_code,
            stdout: self.output,
            stderr: self.stderr,
            error_kind: self.error_kind,
            error_message: self.error_message,
            error_line: self.error_line,
            recovery_hint,
            updated_variables: self.variables,
        }
    }
}

// =============================================================================
// Framing
// =============================================================================

/// Read one frame (worker side, blocking).
pub fn read_frame(reader: &mut impl Read) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Write one frame (worker side, blocking).
pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> Result<(), FrameError> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame (parent side, async).
pub async fn read_frame_async<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame (parent side, async).
pub async fn write_frame_async<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"hello frame").unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let payload = read_frame(&mut cursor).unwrap();
        assert_eq!(payload, b"hello frame");
    }

    #[test]
    fn truncated_frame_is_an_io_error() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"hello frame").unwrap();
        buffer.truncate(7);

        let mut cursor = std::io::Cursor::new(buffer);
        assert!(matches!(read_frame(&mut cursor), Err(FrameError::Io(_))));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(u32::MAX).to_le_bytes());
        buffer.extend_from_slice(b"junk");

        let mut cursor = std::io::Cursor::new(buffer);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[tokio::test]
    async fn async_and_sync_framing_interoperate() {
        let mut buffer = std::io::Cursor::new(Vec::new());
        write_frame_async(&mut buffer, b"cross-flavor").await.unwrap();

        let mut cursor = std::io::Cursor::new(buffer.into_inner());
        assert_eq!(read_frame(&mut cursor).unwrap(), b"cross-flavor");
    }

    #[test]
    fn request_and_response_serde_round_trip() {
        let request = WorkerRequest::execute(
            "let x = 1;",
            VarMap::new(),
            None,
            ExtraDefinitions::default(),
            1_000,
        );
        let bytes = serde_json::to_vec(&request).unwrap();
        let decoded: WorkerRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.command, "execute");
        assert_eq!(decoded.protocol, PROTOCOL_VERSION);
        assert_eq!(decoded.timeout_ms, 1_000);

        let result = ExecutionResult::bare_failure(ErrorKind::Timeout, "budget expired");
        let response = WorkerResponse::from_result(&result);
        let bytes = serde_json::to_vec(&response).unwrap();
        let decoded: WorkerResponse = serde_json::from_slice(&bytes).unwrap();
        let rebuilt = decoded.into_result();
        assert_eq!(rebuilt.exit_code, ExitCode::Timeout);
        assert_eq!(rebuilt.error_kind, Some(ErrorKind::Timeout));
        assert!(!rebuilt.recovery_hint.unwrap_or_default().is_empty());
    }
}
