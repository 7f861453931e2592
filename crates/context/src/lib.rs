//! Workspace context retrieval for Codeforge.
//!
//! Three pieces: a keyword index over the workspace tree, token counting
//! strategies, and a budgeter that assembles file context into the prompt
//! without overflowing the model's window.

pub mod budget;
pub mod index;
pub mod token;

pub use budget::{ContextBudgeter, ContextReport};
pub use index::{ContextIndex, IndexEntry, IndexOptions, SearchHit};
pub use token::{HeuristicCounter, TokenCounter};

#[cfg(feature = "tiktoken")]
pub use token::TiktokenCounter;

pub use codeforge_core::error::ContextError;
