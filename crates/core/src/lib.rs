//! Core domain types for Codeforge.
//!
//! This crate defines the shared vocabulary every other crate speaks:
//! messages and conversations, the Provider and Tool traits, credential
//! pooling, and the error hierarchy. It carries no I/O of its own.

pub mod credential;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

pub use credential::CredentialPool;
pub use error::{ContextError, CredentialError, Error, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{
    control_definitions, decode_arguments, Dispatch, Tool, ToolCall, ToolRegistry, ToolResult,
    ASK_USER_TOOL, FINISH_TOOL,
};
