#![deny(unused)]
//! Persistent code-execution sandbox for Codexec.
//!
//! This crate lets an agent execute iteratively written code snippets
//! against a persistent variable namespace, across several isolation
//! strengths, with the guarantee that the caller always receives a
//! structured result, never an unhandled crash.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Agent orchestration (external)              │
//! │    ↓ calls tool                              │
//! ├──────────────────────────────────────────────┤
//! │  Tool Adapter (CodeSandbox, *Tool)           │
//! │    ↓ delegates to the Sandbox contract       │
//! ├──────────────────────────────────────────────┤
//! │  Backend                                     │
//! │    InProcessSandbox:  same runtime           │
//! │    SubprocessSandbox: one worker per call    │
//! │    RemoteSandbox:     managed kernel         │
//! ├──────────────────────────────────────────────┤
//! │  Shared layers                               │
//! │    interpreter: embedded engine              │
//! │    protocol:    framed worker messages       │
//! │    filter:      transport rules              │
//! │    taxonomy:    error kinds + hints          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use codexec_sandbox::{CodeSandbox, InProcessSandbox, SandboxOptions};
//! use codexec_sandbox::tools::{ExecuteCodeTool, ResetSandboxTool, SandboxContextTool};
//!
//! let sandbox = Arc::new(InProcessSandbox::new(SandboxOptions::default()));
//! let adapter = Arc::new(CodeSandbox::new(sandbox));
//!
//! // Register tools
//! registry.register(Box::new(ExecuteCodeTool::new(adapter.clone()))).await?;
//! registry.register(Box::new(SandboxContextTool::new(adapter.clone()))).await?;
//! registry.register(Box::new(ResetSandboxTool::new(adapter))).await?;
//! ```

pub mod context;
pub mod contract;
pub mod filter;
pub mod inprocess;
pub mod interpreter;
pub mod protocol;
pub mod remote;
pub mod subprocess;
pub mod taxonomy;
pub mod tools;

pub use contract::{
    ContextSnapshot, ContextUpdate, ExecutionResult, ExitCode, ExtraDefinitions, Sandbox,
    SandboxOptions, VarMap,
};
pub use filter::TransportFilter;
pub use inprocess::InProcessSandbox;
pub use remote::{RemoteKernelConfig, RemoteSandbox};
pub use subprocess::SubprocessSandbox;
pub use taxonomy::ErrorKind;
pub use tools::{CodeSandbox, ExecuteCodeTool, ResetSandboxTool, SandboxContextTool};
