//! Subprocess execution backend.
//!
//! Every `run` spawns one disposable worker process, sends it a single
//! framed request, and reads a single framed response. A crashed, hung, or
//! memory-hungry snippet takes the worker down with it; the parent only
//! ever absorbs the variables the worker explicitly returned. This is state
//! isolation, not a security boundary: the worker is not confined.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

use codexec_core::{Error, Result};

use crate::context;
use crate::contract::{
    ContextSnapshot, ContextUpdate, ExecutionResult, ExtraDefinitions, Sandbox, SandboxOptions,
    VarMap,
};
use crate::filter::TransportFilter;
use crate::protocol::{read_frame_async, write_frame_async, WorkerRequest, WorkerResponse};
use crate::taxonomy::{Classified, ErrorKind};

/// How long to wait for an already-answered worker to exit before killing it.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Name of the worker executable, expected next to the current binary when
/// no explicit path is configured.
pub const WORKER_BIN: &str = "codexec-worker";

/// Sandbox backend running each snippet in a fresh child process.
pub struct SubprocessSandbox {
    id: String,
    options: SandboxOptions,
    filter: TransportFilter,
    worker_path: PathBuf,
    extra_definitions: ExtraDefinitions,
    state: Mutex<VarMap>,
}

impl SubprocessSandbox {
    /// Create a backend, resolving the worker binary next to the current
    /// executable.
    pub fn new(options: SandboxOptions) -> Result<Self> {
        let worker_path = default_worker_path()?;
        Ok(Self::with_worker_path(options, worker_path))
    }

    /// Create a backend with an explicit worker binary path.
    pub fn with_worker_path(options: SandboxOptions, worker_path: PathBuf) -> Self {
        let id = format!("sbx-{}", Uuid::new_v4());
        tracing::info!(
            sandbox_id = %id,
            worker = %worker_path.display(),
            timeout = ?options.timeout,
            "subprocess sandbox created"
        );
        Self {
            filter: TransportFilter::from_options(&options),
            options,
            id,
            worker_path,
            extra_definitions: ExtraDefinitions::default(),
            state: Mutex::new(VarMap::new()),
        }
    }

    /// Source snippets replayed into every fresh worker before the user code
    /// runs (function definitions cannot cross the boundary as values).
    pub fn with_extra_definitions(mut self, definitions: ExtraDefinitions) -> Self {
        self.extra_definitions = definitions;
        self
    }

    /// The instance identifier used in tracing fields.
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn spawn_and_communicate(&self, request: &WorkerRequest) -> ExecutionResult {
        let payload = match serde_json::to_vec(request) {
            Ok(payload) => payload,
            Err(err) => {
                return ExecutionResult::bare_failure(
                    ErrorKind::Deserialization,
                    format!("failed to encode worker request: {err}"),
                );
            }
        };

        let mut child = match Command::new(&self.worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return ExecutionResult::bare_failure(
                    ErrorKind::Deserialization,
                    format!(
                        "failed to spawn worker '{}': {err}",
                        self.worker_path.display()
                    ),
                );
            }
        };

        let Some(mut stdin) = child.stdin.take() else {
            return ExecutionResult::bare_failure(
                ErrorKind::Deserialization,
                "worker stdin was not captured",
            );
        };
        let Some(mut stdout) = child.stdout.take() else {
            return ExecutionResult::bare_failure(
                ErrorKind::Deserialization,
                "worker stdout was not captured",
            );
        };

        // Drain stderr in the background so a chatty worker cannot block on
        // a full pipe.
        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut collected).await;
            }
            String::from_utf8_lossy(&collected).into_owned()
        });

        if let Err(err) = write_frame_async(&mut stdin, &payload).await {
            let _ = child.kill().await;
            return ExecutionResult::bare_failure(
                ErrorKind::Deserialization,
                format!("failed to send request to worker: {err}"),
            );
        }
        // Close stdin so the worker sees EOF after the single frame.
        drop(stdin);

        let deadline = self.options.timeout + self.options.startup_grace;
        let frame = match tokio::time::timeout(deadline, read_frame_async(&mut stdout)).await {
            Err(_elapsed) => {
                tracing::warn!(
                    sandbox_id = %self.id,
                    timeout = ?self.options.timeout,
                    "worker exceeded its deadline; killing"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return ExecutionResult::failure(
                    Classified::new(
                        ErrorKind::Timeout,
                        format!(
                            "execution exceeded {:?} (worker killed after {:?})",
                            self.options.timeout, deadline
                        ),
                    ),
                    String::new(),
                    String::new(),
                );
            }
            Ok(Err(frame_err)) => {
                let _ = child.kill().await;
                let stderr_tail = stderr_task.await.unwrap_or_default();
                return ExecutionResult::failure(
                    Classified::new(
                        ErrorKind::Deserialization,
                        format!("worker reply could not be read: {frame_err}"),
                    ),
                    String::new(),
                    stderr_tail,
                );
            }
            Ok(Ok(frame)) => frame,
        };

        // Let the worker exit on its own; it has nothing left to do.
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        let worker_stderr = stderr_task.await.unwrap_or_default();
        if !worker_stderr.is_empty() {
            tracing::debug!(sandbox_id = %self.id, stderr = %worker_stderr, "worker stderr");
        }

        match serde_json::from_slice::<WorkerResponse>(&frame) {
            Ok(response) => response.into_result(),
            Err(err) => ExecutionResult::failure(
                Classified::new(
                    ErrorKind::Deserialization,
                    format!("worker reply was not a valid response message: {err}"),
                ),
                String::new(),
                worker_stderr,
            ),
        }
    }
}

/// Resolve the worker binary as a sibling of the current executable.
fn default_worker_path() -> Result<PathBuf> {
    let current = std::env::current_exe()
        .map_err(|err| Error::worker(format!("cannot locate current executable: {err}")))?;
    let dir = current
        .parent()
        .ok_or_else(|| Error::worker("current executable has no parent directory"))?;
    let candidate = dir.join(WORKER_BIN);
    if candidate.is_file() {
        return Ok(candidate);
    }
    Err(Error::worker(format!(
        "worker binary not found at {}; configure sandbox.worker_path",
        candidate.display()
    )))
}

#[async_trait]
impl Sandbox for SubprocessSandbox {
    async fn run(&self, code: &str) -> ExecutionResult {
        let mut state = self.state.lock().await;

        let request = WorkerRequest::execute(
            code,
            state.clone(),
            None,
            self.extra_definitions.clone(),
            self.options.timeout.as_millis() as u64,
        );

        let result = self.spawn_and_communicate(&request).await;

        // The returned variables are the only state that outlives the
        // worker; everything else died with the process.
        if result.is_success() {
            for (name, value) in &result.updated_variables {
                state.insert(name.clone(), value.clone());
            }
        }
        result
    }

    async fn get_context(&self) -> ContextSnapshot {
        let state = self.state.lock().await;
        context::encode(self.filter.filter_values(&state))
    }

    async fn update_context(&self, update: ContextUpdate) -> Result<()> {
        let variables = match update {
            ContextUpdate::Blob(blob) => context::decode(&blob)?,
            ContextUpdate::Values(values) => values,
        };
        let mut state = self.state.lock().await;
        for (name, value) in variables {
            state.insert(name, value);
        }
        Ok(())
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.clear();
        tracing::info!(sandbox_id = %self.id, "namespace cleared");
    }
}
