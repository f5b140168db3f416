//! In-process execution backend.
//!
//! Snippets run inside the parent's own runtime, sharing the namespace
//! directly. The fastest backend and the least isolated one. Evaluation is
//! pushed onto a blocking thread so snippets may block freely; the engine's
//! deadline hook bounds them.

use std::time::Instant;

use async_trait::async_trait;
use rhai::AST;
use tokio::sync::Mutex;
use uuid::Uuid;

use codexec_core::Result;

use crate::context;
use crate::contract::{
    ContextSnapshot, ContextUpdate, ExecutionResult, Sandbox, SandboxOptions,
};
use crate::filter::{import_value, TransportFilter};
use crate::interpreter::{evaluate_snippet, to_execution_result, Namespace};
use crate::taxonomy::ErrorKind;

struct InProcessState {
    namespace: Namespace,
    definitions: AST,
}

/// Sandbox backend executing inside the calling process.
pub struct InProcessSandbox {
    id: String,
    options: SandboxOptions,
    filter: TransportFilter,
    state: Mutex<InProcessState>,
}

impl InProcessSandbox {
    /// Create a backend with an empty namespace.
    pub fn new(options: SandboxOptions) -> Self {
        let id = format!("sbx-{}", Uuid::new_v4());
        tracing::info!(sandbox_id = %id, timeout = ?options.timeout, "in-process sandbox created");
        Self {
            filter: TransportFilter::from_options(&options),
            options,
            id,
            state: Mutex::new(InProcessState {
                namespace: Namespace::new(),
                definitions: AST::empty(),
            }),
        }
    }

    /// The instance identifier used in tracing fields.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for InProcessSandbox {
    fn default() -> Self {
        Self::new(SandboxOptions::default())
    }
}

#[async_trait]
impl Sandbox for InProcessSandbox {
    async fn run(&self, code: &str) -> ExecutionResult {
        let mut state = self.state.lock().await;

        let base = self.filter.snapshot(&state.namespace);
        let namespace = state.namespace.clone();
        let definitions = state.definitions.clone();
        let deadline = Instant::now() + self.options.timeout;
        let snippet = code.to_string();

        let eval = match tokio::task::spawn_blocking(move || {
            evaluate_snippet(&snippet, namespace, definitions, deadline)
        })
        .await
        {
            Ok(eval) => eval,
            Err(join_err) => {
                tracing::error!(sandbox_id = %self.id, error = %join_err, "evaluation task failed");
                return ExecutionResult::bare_failure(
                    ErrorKind::Unexpected,
                    format!("evaluation task failed: {join_err}"),
                );
            }
        };

        state.namespace = eval.namespace.clone();
        state.definitions = eval.definitions.clone();

        let result = to_execution_result(&eval, &base, &self.filter, &self.options.tool_prefix);
        if !result.is_success() {
            tracing::debug!(
                sandbox_id = %self.id,
                kind = ?result.error_kind,
                "snippet failed"
            );
        }
        result
    }

    async fn get_context(&self) -> ContextSnapshot {
        let state = self.state.lock().await;
        context::encode(self.filter.snapshot(&state.namespace))
    }

    async fn update_context(&self, update: ContextUpdate) -> Result<()> {
        let variables = match update {
            ContextUpdate::Blob(blob) => context::decode(&blob)?,
            ContextUpdate::Values(values) => values,
        };
        let mut state = self.state.lock().await;
        for (name, value) in &variables {
            state.namespace.insert(name.clone(), import_value(value));
        }
        Ok(())
    }

    async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.namespace.clear();
        state.definitions = AST::empty();
        tracing::info!(sandbox_id = %self.id, "namespace cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ExitCode;
    use codexec_core::Error;
    use std::time::Duration;

    fn sandbox() -> InProcessSandbox {
        InProcessSandbox::default()
    }

    #[tokio::test]
    async fn variables_persist_across_calls() {
        let sb = sandbox();
        assert!(sb.run("let x = 42;").await.is_success());

        let result = sb.run("print(x);").await;
        assert!(result.is_success());
        assert_eq!(result.stdout, "42\n");
    }

    #[tokio::test]
    async fn instances_are_isolated() {
        let a = sandbox();
        let b = sandbox();
        assert!(a.run("let shared = 1;").await.is_success());

        let result = b.run("print(shared);").await;
        assert_eq!(result.exit_code, ExitCode::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::UndefinedVariable));
    }

    #[tokio::test]
    async fn hello_world_capture() {
        let result = sandbox().run(r#"print("hello world");"#).await;
        assert_eq!(result.exit_code, ExitCode::Success);
        assert_eq!(result.stdout, "hello world\n");
    }

    #[tokio::test]
    async fn division_by_zero_is_classified_with_hint() {
        let result = sandbox().run("let d = 0; 1 / d").await;
        assert_eq!(result.exit_code, ExitCode::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::DivisionByZero));
        assert!(!result.recovery_hint.as_deref().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn runaway_loop_times_out() {
        let sb = InProcessSandbox::new(
            SandboxOptions::default().with_timeout(Duration::from_millis(300)),
        );
        let started = Instant::now();
        let result = sb.run("while true {}").await;
        assert_eq!(result.exit_code, ExitCode::Timeout);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The instance is still usable afterwards.
        assert!(sb.run("let after = 1;").await.is_success());
    }

    #[tokio::test]
    async fn context_round_trip_between_instances() {
        let a = sandbox();
        assert!(a
            .run(r#"let x = 42; let name = "ada"; let xs = [1, 2, 3];"#)
            .await
            .is_success());

        let blob = a.get_context().await;

        let b = sandbox();
        b.update_context(blob.into()).await.unwrap();
        let result = b.run("print(x); print(name); print(xs[2]);").await;
        assert!(result.is_success());
        assert_eq!(result.stdout, "42\nada\n3\n");
    }

    #[tokio::test]
    async fn nontransportable_values_are_absent_not_fatal() {
        let a = sandbox();
        assert!(a.run("let t = timestamp(); let n = 5;").await.is_success());

        let blob = a.get_context().await;
        let variables = context::decode(blob.as_str()).unwrap();
        assert!(variables.contains_key("n"));
        assert!(!variables.contains_key("t"));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let sb = sandbox();
        assert!(sb.run("let x = 1; fn f() { 2 }").await.is_success());
        sb.reset().await;

        let result = sb.run("print(x);").await;
        assert_eq!(result.error_kind, Some(ErrorKind::UndefinedVariable));

        let result = sb.run("print(f());").await;
        assert_eq!(result.error_kind, Some(ErrorKind::UndefinedFunction));
    }

    #[tokio::test]
    async fn concurrent_runs_never_interleave_stdout() {
        use std::sync::Arc;

        let sb = Arc::new(sandbox());
        let mut handles = Vec::new();
        for i in 0..4 {
            let sb = sb.clone();
            handles.push(tokio::spawn(async move {
                let code = format!(
                    "for _k in 0..50 {{ print(\"task-{i}\"); }}"
                );
                sb.run(&code).await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap();
            assert!(result.is_success());
            let expected = format!("task-{i}\n").repeat(50);
            assert_eq!(result.stdout, expected, "stdout interleaved for task {i}");
        }
    }

    #[tokio::test]
    async fn updated_variables_reports_new_and_changed() {
        let sb = sandbox();
        let first = sb.run("let a = 1; let b = 2;").await;
        assert_eq!(first.updated_variables.len(), 2);

        let second = sb.run("let b = 20; let c = 3;").await;
        assert!(second.updated_variables.contains_key("b"));
        assert!(second.updated_variables.contains_key("c"));
        assert!(!second.updated_variables.contains_key("a"));
    }

    #[tokio::test]
    async fn update_context_rejects_corrupt_blob() {
        let sb = sandbox();
        let err = sb
            .update_context(ContextUpdate::Blob("!!not-a-blob!!".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Context(_)));
    }
}
