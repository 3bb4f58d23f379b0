//! # Companion Core
//!
//! Domain types, traits, and error definitions for the Companion agent
//! runtime. This crate has **no runtime state and no transport**: it
//! defines the shared vocabulary every other crate builds on.
//!
//! ## Contents
//!
//! - [`message`]: chat messages and their content parts
//! - [`tool`]: tool descriptors, argument field schemas, tool sets
//! - [`provider`]: the remote model endpoint contract and wire types
//! - [`store`]: the key-value persistence contract
//! - [`options`]: per-call generation options
//! - [`error`]: the error taxonomy

pub mod error;
pub mod message;
pub mod options;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use message::{ChatMessage, MessagePart, PartsRenderer, TokenUsage, ToolPart};
pub use options::{ActOptions, ReasoningEffort};
pub use provider::{
    FinishReason, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage, WireMessage,
    WireToolCall,
};
pub use store::KeyValueStore;
pub use tool::{ParamKind, ParamSpec, Tool, ToolArgs, ToolResult, ToolSet};
