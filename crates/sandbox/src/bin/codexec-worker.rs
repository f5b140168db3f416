//! `codexec-worker`: disposable execution worker.
//!
//! Reads exactly one framed request from stdin, evaluates it, writes exactly
//! one framed response to stdout, and exits. Stdout belongs to the protocol;
//! all logging goes to stderr.

use std::io::{stdin, stdout, Write};
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use codexec_sandbox::contract::VarMap;
use codexec_sandbox::filter::{import_values, TransportFilter};
use codexec_sandbox::interpreter::{evaluate_snippet, to_execution_result, Namespace};
use codexec_sandbox::protocol::{
    read_frame, write_frame, WorkerRequest, WorkerResponse, PROTOCOL_VERSION,
};
use codexec_sandbox::taxonomy::ErrorKind;
use codexec_sandbox::ExecutionResult;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let response = handle_request();

    let payload = match serde_json::to_vec(&response) {
        Ok(payload) => payload,
        Err(err) => {
            // The response shape always serializes; if it somehow does not,
            // fall back to a minimal error frame so the parent still gets one.
            tracing::error!(error = %err, "response serialization failed");
            let fallback = WorkerResponse::from_result(&ExecutionResult::bare_failure(
                ErrorKind::Unexpected,
                format!("worker response serialization failed: {err}"),
            ));
            serde_json::to_vec(&fallback).unwrap_or_default()
        }
    };

    let mut out = stdout().lock();
    if let Err(err) = write_frame(&mut out, &payload) {
        tracing::error!(error = %err, "failed to write response frame");
        std::process::exit(1);
    }
    let _ = out.flush();
}

fn handle_request() -> WorkerResponse {
    let frame = match read_frame(&mut stdin().lock()) {
        Ok(frame) => frame,
        Err(err) => {
            return error_response(
                ErrorKind::Deserialization,
                format!("could not read request frame: {err}"),
            );
        }
    };

    let request: WorkerRequest = match serde_json::from_slice(&frame) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                ErrorKind::Deserialization,
                format!("request frame was not a valid message: {err}"),
            );
        }
    };

    if request.command != "execute" {
        return error_response(
            ErrorKind::Deserialization,
            format!("unsupported command '{}'", request.command),
        );
    }
    if request.protocol != PROTOCOL_VERSION {
        return error_response(
            ErrorKind::Deserialization,
            format!(
                "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
                request.protocol
            ),
        );
    }

    // Base namespace layered with the delta; the merged transportable view
    // is also the baseline for the updated-variables diff.
    let mut base_vars: VarMap = request.base_namespace.clone();
    if let Some(delta) = &request.context_delta {
        for (name, value) in delta {
            base_vars.insert(name.clone(), value.clone());
        }
    }
    let mut namespace: Namespace = import_values(&base_vars);
    let mut definitions = rhai::AST::empty();

    let deadline = Instant::now() + Duration::from_millis(request.timeout_ms);

    // Definitions are fire-and-forget: a failing snippet is skipped, never
    // fatal to the call.
    let definition_snippets = request
        .extra_definitions
        .imports
        .iter()
        .chain(request.extra_definitions.functions.iter());
    for snippet in definition_snippets {
        let eval = evaluate_snippet(snippet, namespace, definitions, deadline);
        if !eval.verdict.is_completed() {
            tracing::debug!(snippet = %snippet, verdict = ?eval.verdict, "definition skipped");
        }
        namespace = eval.namespace;
        definitions = eval.definitions;
    }

    let eval = evaluate_snippet(&request.code, namespace, definitions, deadline);

    let filter = TransportFilter::default();
    let result = to_execution_result(&eval, &base_vars, &filter, "tool_");
    WorkerResponse::from_result(&result)
}

fn error_response(kind: ErrorKind, message: String) -> WorkerResponse {
    WorkerResponse::from_result(&ExecutionResult::bare_failure(kind, message))
}
