//! Sandbox integration tests.
//!
//! Tests the full pipeline: Tool → CodeSandbox → Sandbox (InProcessSandbox).
//! The subprocess pipeline has its own suite that drives the real worker
//! binary.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codexec_core::traits::Tool;
use codexec_sandbox::tools::{ExecuteCodeTool, ResetSandboxTool, SandboxContextTool};
use codexec_sandbox::{
    CodeSandbox, ContextUpdate, ErrorKind, ExitCode, InProcessSandbox, Sandbox, SandboxOptions,
};

// =============================================================================
// Helpers
// =============================================================================

fn sandbox() -> Arc<InProcessSandbox> {
    Arc::new(InProcessSandbox::default())
}

fn adapter() -> Arc<CodeSandbox> {
    Arc::new(CodeSandbox::new(sandbox()))
}

// =============================================================================
// 1. Variable persistence across calls
// =============================================================================

#[tokio::test]
async fn test_variable_persistence() {
    let sb = sandbox();

    let result = sb.run("let total = 40; let extra = 2;").await;
    assert!(result.is_success());

    let result = sb.run("print(total + extra);").await;
    assert!(result.is_success());
    assert_eq!(result.stdout, "42\n");
}

// =============================================================================
// 2. Namespace isolation between instances
// =============================================================================

#[tokio::test]
async fn test_namespace_isolation() {
    let a = sandbox();
    let b = sandbox();

    assert!(a.run("let only_in_a = 1;").await.is_success());

    let result = b.run("print(only_in_a);").await;
    assert_eq!(result.exit_code, ExitCode::Error);
    assert_eq!(result.error_kind, Some(ErrorKind::UndefinedVariable));
}

// =============================================================================
// 3. Context round-trip law
// =============================================================================

#[tokio::test]
async fn test_context_round_trip() {
    let source = sandbox();
    assert!(source
        .run(
            r#"
            let count = 3;
            let label = "widgets";
            let nested = #{ sizes: [1, 2, 3] };
            let clock = timestamp();
            "#,
        )
        .await
        .is_success());

    let blob = source.get_context().await;

    let fresh = sandbox();
    fresh
        .update_context(ContextUpdate::from(blob.clone()))
        .await
        .unwrap();

    // Transportable values transferred; the live timestamp is simply absent.
    let result = fresh
        .run("print(count); print(label); print(nested.sizes[0]);")
        .await;
    assert!(result.is_success());
    assert_eq!(result.stdout, "3\nwidgets\n1\n");

    let result = fresh.run("print(clock);").await;
    assert_eq!(result.error_kind, Some(ErrorKind::UndefinedVariable));

    // Round-trip law: re-exporting reproduces the same blob contents.
    let re_exported = fresh.get_context().await;
    assert_eq!(blob, re_exported);
}

// =============================================================================
// 4. Timeout semantics
// =============================================================================

#[tokio::test]
async fn test_runaway_loop_times_out_within_budget() {
    let sb = InProcessSandbox::new(SandboxOptions::default().with_timeout(Duration::from_secs(1)));

    let started = Instant::now();
    let result = sb.run("while true {}").await;

    assert_eq!(result.exit_code, ExitCode::Timeout);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(
        started.elapsed() < Duration::from_secs(6),
        "timeout should land within roughly timeout + grace"
    );
    assert!(!result.recovery_hint.unwrap_or_default().is_empty());
}

// =============================================================================
// 5. Error classification
// =============================================================================

#[tokio::test]
async fn test_division_by_zero_classification() {
    let result = sandbox().run("let d = 0; 10 / d").await;
    assert_eq!(result.exit_code, ExitCode::Error);
    assert_eq!(result.error_kind, Some(ErrorKind::DivisionByZero));
    assert!(!result.recovery_hint.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_syntax_error_reports_line() {
    let result = sandbox().run("let x = 1;\nlet y = ;").await;
    assert_eq!(result.exit_code, ExitCode::Error);
    assert_eq!(result.error_kind, Some(ErrorKind::Syntax));
    assert_eq!(result.error_line, Some(2));
}

// =============================================================================
// 6. Adapter surface (never raises)
// =============================================================================

#[tokio::test]
async fn test_adapter_pipeline() {
    let adapter = adapter();
    let execute = ExecuteCodeTool::new(adapter.clone());
    let inspect = SandboxContextTool::new(adapter.clone());
    let reset = ResetSandboxTool::new(adapter);

    // Execute
    let output = execute
        .execute(json!({"code": "let greeting = \"hello world\"; print(greeting);"}))
        .await
        .unwrap();
    assert!(output.success);
    assert_eq!(output.content, "hello world\n");

    // Inspect
    let output = inspect.execute(json!({})).await.unwrap();
    assert!(output.content.contains("greeting (string): hello world"));

    // Reset
    let output = reset.execute(json!({})).await.unwrap();
    assert_eq!(output.content, "Sandbox namespace cleared.");

    // Referencing the cleared variable is an error string, never a crash.
    let output = execute
        .execute(json!({"code": "print(greeting);"}))
        .await
        .unwrap();
    assert!(output.content.starts_with("Error (UndefinedVariableError)"));
}

// =============================================================================
// 7. Instance stays usable after every failure mode
// =============================================================================

#[tokio::test]
async fn test_sandbox_survives_failures() {
    let sb = InProcessSandbox::new(
        SandboxOptions::default().with_timeout(Duration::from_millis(300)),
    );

    assert_eq!(sb.run("nonsense ]]]").await.exit_code, ExitCode::Error);
    assert_eq!(sb.run("while true {}").await.exit_code, ExitCode::Timeout);
    assert_eq!(
        sb.run("let d = 0; 1 / d").await.exit_code,
        ExitCode::Error
    );

    let result = sb.run(r#"print("still alive");"#).await;
    assert!(result.is_success());
    assert_eq!(result.stdout, "still alive\n");
}
