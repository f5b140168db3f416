#![deny(unused)]
//! Core types, traits, and error definitions for Codexec.
//!
//! This crate provides the foundational building blocks shared by the
//! sandbox execution subsystem and its consumers: the error type, the tool
//! boundary (`Tool`, `ToolRegistry`, `ToolOutput`), structured audit events,
//! and configuration loading.

pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use events::*;
pub use traits::*;
pub use types::*;
