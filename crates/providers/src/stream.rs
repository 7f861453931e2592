//! Stream draining helper.

use codeforge_core::error::ProviderError;
use codeforge_core::message::MessageToolCall;
use codeforge_core::provider::StreamChunk;
use tokio::sync::mpsc::Receiver;

/// Drain a chunk stream into the final assistant turn.
///
/// `on_delta` fires for every content fragment as it arrives (the CLI
/// prints these live). Returns the concatenated text plus the tool calls
/// carried on the final chunk.
///
/// A channel that closes before a `done` chunk means the response never
/// completed; that surfaces as a stream interruption so the retry layer
/// can re-drive the whole request.
pub async fn collect_stream(
    mut rx: Receiver<Result<StreamChunk, ProviderError>>,
    mut on_delta: impl FnMut(&str),
) -> Result<(String, Vec<MessageToolCall>), ProviderError> {
    let mut text = String::new();

    while let Some(item) = rx.recv().await {
        let chunk = item?;
        if let Some(delta) = &chunk.content {
            on_delta(delta);
            text.push_str(delta);
        }
        if chunk.done {
            return Ok((text, chunk.tool_calls));
        }
    }

    Err(ProviderError::StreamInterrupted(
        "Stream channel closed before final chunk".into(),
    ))
}
