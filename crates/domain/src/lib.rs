//! Shared domain types for the aria-server workspace.
//!
//! Everything that crosses a crate boundary lives here: the error type,
//! the YAML configuration model, chat messages, tool call types, and the
//! provider-agnostic LLM stream events.

pub mod chat;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
