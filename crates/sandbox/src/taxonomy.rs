//! Error classification and recovery hints.
//!
//! Raw engine failures are mapped onto a fixed set of kinds, each carrying
//! multi-line, imperative guidance. The consumer of these hints is an agent
//! retrying the call, not a human reading a stack trace, so every hint tells
//! it what to do next.

use serde::{Deserialize, Serialize};

/// Failure kinds recognized across all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The snippet failed to parse.
    Syntax,
    /// An `import` referenced a module the engine cannot resolve.
    ModuleNotFound,
    /// A variable was referenced before being defined.
    UndefinedVariable,
    /// A function was called that does not exist for the given arguments.
    UndefinedFunction,
    /// Division (or modulo) by zero.
    DivisionByZero,
    /// An operation received a value of the wrong type.
    TypeMismatch,
    /// A runtime value was rejected (`throw`, invalid argument, bad range).
    ValueError,
    /// A map was indexed with a key it does not contain.
    KeyNotFound,
    /// An array or string index fell outside the valid range.
    IndexOutOfRange,
    /// A property was accessed that the target object does not have.
    PropertyNotFound,
    /// The execution budget expired.
    Timeout,
    /// The worker's reply could not be read or decoded (transport failure).
    Deserialization,
    /// The remote kernel call failed before the code could run.
    RemoteExecution,
    /// Anything the classifier does not recognize.
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::ModuleNotFound => "ModuleNotFoundError",
            ErrorKind::UndefinedVariable => "UndefinedVariableError",
            ErrorKind::UndefinedFunction => "UndefinedFunctionError",
            ErrorKind::DivisionByZero => "DivisionByZeroError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::KeyNotFound => "KeyNotFoundError",
            ErrorKind::IndexOutOfRange => "IndexOutOfRangeError",
            ErrorKind::PropertyNotFound => "PropertyNotFoundError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Deserialization => "DeserializationError",
            ErrorKind::RemoteExecution => "RemoteExecutionError",
            ErrorKind::Unexpected => "UnexpectedError",
        };
        write!(f, "{label}")
    }
}

/// Fixed, read-only hint table. Consulted by every backend before it
/// constructs a failure result.
pub fn recovery_hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Syntax => {
            "The code could not be parsed.\n\
             Check the reported line for unbalanced parentheses, brackets, or braces.\n\
             Make sure statements end with a semicolon and strings use double quotes.\n\
             Resubmit the corrected snippet in full; partial snippets are not merged."
        }
        ErrorKind::ModuleNotFound => {
            "The referenced module is not available in this sandbox.\n\
             Remove the import and use only built-in operations, or inline the\n\
             needed logic directly in the snippet.\n\
             If the module was supposed to be pre-loaded, re-create the sandbox\n\
             with the definition included."
        }
        ErrorKind::UndefinedVariable => {
            "The variable does not exist in the sandbox namespace.\n\
             Define it with `let` before using it, or re-run the earlier snippet\n\
             that was supposed to create it.\n\
             Variables do not carry over from other sandbox instances; transfer\n\
             them explicitly via the context if they live elsewhere."
        }
        ErrorKind::UndefinedFunction => {
            "No function with this name and argument types exists.\n\
             Check the spelling and the number and types of arguments.\n\
             If you defined the function in an earlier snippet, make sure that\n\
             snippet ran successfully on this same sandbox instance."
        }
        ErrorKind::DivisionByZero => {
            "The code divided by zero.\n\
             Guard the denominator with a conditional before dividing,\n\
             or validate inputs earlier in the snippet."
        }
        ErrorKind::TypeMismatch => {
            "An operation received a value of the wrong type.\n\
             Print the intermediate values to inspect their actual types,\n\
             then convert explicitly (e.g. `to_string`, `to_int`, `to_float`)\n\
             before combining them."
        }
        ErrorKind::ValueError => {
            "A runtime value was rejected.\n\
             Inspect the reported message for the offending value, validate\n\
             inputs before using them, and break the task into smaller steps\n\
             so the failing operation is easier to isolate."
        }
        ErrorKind::KeyNotFound => {
            "The map does not contain the requested key.\n\
             Print the map's keys to see what is actually present, and use\n\
             `in` to test membership before indexing."
        }
        ErrorKind::IndexOutOfRange => {
            "The index is outside the valid range.\n\
             Check the collection's length with `len` before indexing, and\n\
             remember indices start at zero."
        }
        ErrorKind::PropertyNotFound => {
            "The object has no property with this name.\n\
             Print the object to inspect its actual shape, and check the\n\
             property name for typos."
        }
        ErrorKind::Timeout => {
            "Execution exceeded the time budget and was stopped.\n\
             Break the task into smaller steps and run them as separate\n\
             snippets; intermediate variables persist between calls.\n\
             Remove or bound any long-running loops, and avoid waiting on\n\
             anything that cannot finish within the budget."
        }
        ErrorKind::Deserialization => {
            "The worker's reply could not be read; the worker process may\n\
             have crashed or produced corrupted output.\n\
             The sandbox namespace is unchanged; retry the snippet once.\n\
             If the failure repeats, simplify the snippet: very large values\n\
             or deeply nested structures can exceed transport limits."
        }
        ErrorKind::RemoteExecution => {
            "The remote kernel call failed before the code could run.\n\
             Verify the kernel service URL is reachable and the API credential\n\
             is valid and unexpired.\n\
             Check service status, then retry; if the session was lost,\n\
             create a new sandbox instance."
        }
        ErrorKind::Unexpected => {
            "Execution failed for an unrecognized reason.\n\
             Read the error message carefully, simplify the snippet to the\n\
             smallest failing piece, and retry step by step.\n\
             The sandbox itself remains usable."
        }
    }
}

/// A classified failure: the kind, a cleaned-up message, the source line when
/// the engine reports one, and an optional extra hint paragraph.
#[derive(Debug, Clone)]
pub struct Classified {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
    pub hint_suffix: Option<String>,
}

impl Classified {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            hint_suffix: None,
        }
    }

    pub fn with_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }
}

/// Classify a compile-time failure.
pub fn classify_parse_error(err: &rhai::ParseError) -> Classified {
    Classified::new(ErrorKind::Syntax, err.to_string()).with_line(err.1.line())
}

/// Classify a runtime failure.
///
/// Recurses through nested function-call frames so the innermost cause wins,
/// and strengthens the undefined-variable hint when the name looks like a
/// dynamically-loaded tool reference.
pub fn classify_eval_error(err: &rhai::EvalAltResult, tool_prefix: &str) -> Classified {
    use rhai::EvalAltResult as E;

    let line = err.position().line();

    let classified = match err {
        E::ErrorTerminated(_, _) => Classified::new(
            ErrorKind::Timeout,
            "execution exceeded the configured time budget",
        ),
        E::ErrorVariableNotFound(name, _) => {
            let mut c = Classified::new(
                ErrorKind::UndefinedVariable,
                format!("variable '{name}' is not defined"),
            );
            if !tool_prefix.is_empty() && name.starts_with(tool_prefix) {
                c.hint_suffix = Some(format!(
                    "'{name}' looks like a tool binding. Tool bindings are injected \
                     when the sandbox is created and are not part of transferred \
                     context; invoke the tool through the tool registry instead."
                ));
            }
            c
        }
        E::ErrorFunctionNotFound(signature, _) => Classified::new(
            ErrorKind::UndefinedFunction,
            format!("function not found: {signature}"),
        ),
        E::ErrorModuleNotFound(name, _) => Classified::new(
            ErrorKind::ModuleNotFound,
            format!("module '{name}' could not be resolved"),
        ),
        E::ErrorInFunctionCall(_, _, inner, _) => {
            return classify_eval_error(inner, tool_prefix).with_line(line)
        }
        E::ErrorInModule(_, inner, _) => {
            return classify_eval_error(inner, tool_prefix).with_line(line)
        }
        E::ErrorArithmetic(message, _) => {
            if message.to_ascii_lowercase().contains("zero") {
                Classified::new(ErrorKind::DivisionByZero, message.clone())
            } else {
                Classified::new(ErrorKind::ValueError, message.clone())
            }
        }
        E::ErrorMismatchDataType(expected, actual, _) => Classified::new(
            ErrorKind::TypeMismatch,
            format!("expected {expected}, got {actual}"),
        ),
        E::ErrorMismatchOutputType(expected, actual, _) => Classified::new(
            ErrorKind::TypeMismatch,
            format!("expected output of type {expected}, got {actual}"),
        ),
        E::ErrorIndexingType(type_name, _) => Classified::new(
            ErrorKind::TypeMismatch,
            format!("type {type_name} cannot be indexed"),
        ),
        E::ErrorArrayBounds(len, index, _) => Classified::new(
            ErrorKind::IndexOutOfRange,
            format!("index {index} is out of bounds for length {len}"),
        ),
        E::ErrorStringBounds(len, index, _) => Classified::new(
            ErrorKind::IndexOutOfRange,
            format!("string index {index} is out of bounds for length {len}"),
        ),
        E::ErrorIndexNotFound(key, _) => Classified::new(
            ErrorKind::KeyNotFound,
            format!("key not found: {key}"),
        ),
        E::ErrorPropertyNotFound(name, _) => Classified::new(
            ErrorKind::PropertyNotFound,
            format!("property '{name}' not found"),
        ),
        E::ErrorRuntime(value, _) => Classified::new(
            ErrorKind::ValueError,
            format!("runtime error: {value}"),
        ),
        other => Classified::new(ErrorKind::Unexpected, other.to_string()),
    };

    classified.with_line(line)
}
