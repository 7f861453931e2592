//! The autonomous agent loop for Codeforge.

pub mod loop_runner;

pub use loop_runner::{compress_output, AgentLoop, DeltaObserver, LoopOutcome, WorkspaceContext};
