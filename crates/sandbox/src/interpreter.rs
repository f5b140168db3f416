//! Embedded script evaluation.
//!
//! One snippet is evaluated per call against a caller-owned namespace. The
//! engine is rebuilt per evaluation so its capture buffers and deadline hook
//! belong to exactly one run; persistent state lives entirely in the
//! namespace (top-level `let` bindings) and the accumulated functions-only
//! AST (top-level `fn` definitions, which the engine keeps in the AST rather
//! than the scope).
//!
//! Evaluation is synchronous and may block for up to the deadline; callers
//! drive it from a blocking thread.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rhai::{Dynamic, Engine, Scope, AST};

/// The mutable set of named values a sandbox instance maintains across calls.
pub type Namespace = BTreeMap<String, Dynamic>;

/// How one evaluation ended.
#[derive(Debug)]
pub enum Verdict {
    /// The snippet ran to completion.
    Completed,
    /// The snippet did not parse; nothing was executed.
    Parse(rhai::ParseError),
    /// The snippet raised at runtime (including deadline termination).
    Eval(Box<rhai::EvalAltResult>),
}

impl Verdict {
    pub fn is_completed(&self) -> bool {
        matches!(self, Verdict::Completed)
    }
}

/// The full outcome of evaluating one snippet: the namespace and definition
/// set to carry forward, captured output, and the verdict.
pub struct Evaluation {
    pub namespace: Namespace,
    pub definitions: AST,
    pub stdout: String,
    pub stderr: String,
    pub verdict: Verdict,
}

fn build_engine(
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    deadline: Instant,
) -> Engine {
    let mut engine = Engine::new();

    // Missing map keys raise instead of yielding unit, so lookups fail loudly.
    engine.set_fail_on_invalid_map_property(true);

    engine.on_print(move |text| {
        if let Ok(mut buffer) = stdout.lock() {
            buffer.push_str(text);
            buffer.push('\n');
        }
    });
    engine.on_debug(move |text, _source, pos| {
        if let Ok(mut buffer) = stderr.lock() {
            if let Some(line) = pos.line() {
                buffer.push_str(&format!("[line {line}] {text}\n"));
            } else {
                buffer.push_str(text);
                buffer.push('\n');
            }
        }
    });
    engine.on_progress(move |_operations| {
        if Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    engine
}

/// Evaluate one snippet.
///
/// The returned namespace holds every top-level binding present after the
/// run; on failure, the bindings assigned before the failure point are
/// still there. The returned definitions AST accumulates the snippet's
/// function definitions on top of the ones passed in.
pub fn evaluate_snippet(
    code: &str,
    namespace: Namespace,
    definitions: AST,
    deadline: Instant,
) -> Evaluation {
    let stdout = Arc::new(Mutex::new(String::new()));
    let stderr = Arc::new(Mutex::new(String::new()));
    let engine = build_engine(stdout.clone(), stderr.clone(), deadline);

    let ast = match engine.compile(code) {
        Ok(ast) => ast,
        Err(parse_err) => {
            return Evaluation {
                namespace,
                definitions,
                stdout: String::new(),
                stderr: String::new(),
                verdict: Verdict::Parse(parse_err),
            };
        }
    };

    // Functions from earlier snippets stay callable; this snippet's
    // definitions are folded in for the runs that follow.
    let combined = definitions.merge(&ast);
    let retained_definitions = combined.clone_functions_only();

    let mut scope: Scope = Scope::new();
    for (name, value) in &namespace {
        scope.push_dynamic(name.clone(), value.clone());
    }

    let verdict = match engine.eval_ast_with_scope::<Dynamic>(&mut scope, &combined) {
        Ok(_) => Verdict::Completed,
        Err(eval_err) => Verdict::Eval(eval_err),
    };

    let namespace_after: Namespace = scope
        .iter()
        .map(|(name, _constant, value)| (name.to_string(), value))
        .collect();

    let captured_stdout = stdout.lock().map(|b| b.clone()).unwrap_or_default();
    let captured_stderr = stderr.lock().map(|b| b.clone()).unwrap_or_default();

    Evaluation {
        namespace: namespace_after,
        definitions: retained_definitions,
        stdout: captured_stdout,
        stderr: captured_stderr,
        verdict,
    }
}

/// Fold an evaluation into the uniform result shape. Shared by the
/// in-process backend and the worker so code behaves identically on both
/// sides of the process boundary.
pub fn to_execution_result(
    eval: &Evaluation,
    base: &crate::contract::VarMap,
    filter: &crate::filter::TransportFilter,
    tool_prefix: &str,
) -> crate::contract::ExecutionResult {
    use crate::contract::ExecutionResult;
    use crate::filter::updated_between;
    use crate::taxonomy::{classify_eval_error, classify_parse_error};

    match &eval.verdict {
        Verdict::Completed => {
            let after = filter.snapshot(&eval.namespace);
            ExecutionResult::success(
                eval.stdout.clone(),
                eval.stderr.clone(),
                updated_between(base, &after),
            )
        }
        Verdict::Parse(err) => ExecutionResult::failure(
            classify_parse_error(err),
            eval.stdout.clone(),
            eval.stderr.clone(),
        ),
        Verdict::Eval(err) => {
            let mut result = ExecutionResult::failure(
                classify_eval_error(err, tool_prefix),
                eval.stdout.clone(),
                eval.stderr.clone(),
            );
            // Bindings assigned before the failure point are real updates.
            let after = filter.snapshot(&eval.namespace);
            result.updated_variables = updated_between(base, &after);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn bindings_persist_through_the_namespace() {
        let eval = evaluate_snippet("let x = 41 + 1;", Namespace::new(), AST::empty(), far_deadline());
        assert!(eval.verdict.is_completed());

        let eval = evaluate_snippet("print(x);", eval.namespace, eval.definitions, far_deadline());
        assert!(eval.verdict.is_completed());
        assert_eq!(eval.stdout, "42\n");
    }

    #[test]
    fn functions_persist_through_the_definitions_ast() {
        let eval = evaluate_snippet(
            "fn double(n) { n * 2 }",
            Namespace::new(),
            AST::empty(),
            far_deadline(),
        );
        assert!(eval.verdict.is_completed());

        let eval = evaluate_snippet(
            "print(double(21));",
            eval.namespace,
            eval.definitions,
            far_deadline(),
        );
        assert!(eval.verdict.is_completed());
        assert_eq!(eval.stdout, "42\n");
    }

    #[test]
    fn print_is_captured_not_echoed() {
        let eval = evaluate_snippet(
            r#"print("hello world");"#,
            Namespace::new(),
            AST::empty(),
            far_deadline(),
        );
        assert!(eval.verdict.is_completed());
        assert_eq!(eval.stdout, "hello world\n");
    }

    #[test]
    fn deadline_terminates_runaway_loops() {
        let started = Instant::now();
        let eval = evaluate_snippet(
            "while true {}",
            Namespace::new(),
            AST::empty(),
            Instant::now() + Duration::from_millis(200),
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        match eval.verdict {
            Verdict::Eval(err) => {
                assert!(matches!(*err, rhai::EvalAltResult::ErrorTerminated(..)));
            }
            other => panic!("expected termination, got {other:?}"),
        }
    }

    #[test]
    fn failed_run_keeps_bindings_assigned_before_the_failure() {
        let eval = evaluate_snippet(
            "let a = 1; let b = a / 0; let c = 3;",
            Namespace::new(),
            AST::empty(),
            far_deadline(),
        );
        assert!(!eval.verdict.is_completed());
        assert!(eval.namespace.contains_key("a"));
        assert!(!eval.namespace.contains_key("c"));
    }

    #[test]
    fn parse_failure_leaves_namespace_untouched() {
        let mut namespace = Namespace::new();
        namespace.insert("kept".into(), Dynamic::from(7_i64));

        let eval = evaluate_snippet("let x = ;", namespace, AST::empty(), far_deadline());
        assert!(matches!(eval.verdict, Verdict::Parse(_)));
        assert!(eval.namespace.contains_key("kept"));
    }
}
