//! Provider adapters for Codeforge.
//!
//! One concrete adapter (any OpenAI-compatible endpoint) plus the retry
//! coordinator and streaming helpers the agent loop drives it with.

pub mod openai_compat;
pub mod retry;
pub mod stream;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryCoordinator;
pub use stream::collect_stream;
