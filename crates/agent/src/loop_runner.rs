//! The agent reasoning loop implementation.
//!
//! Drives the cycle of: assemble context, call the model (through the retry
//! layer), execute any requested tools, feed results back, repeat. The loop
//! ends when the model answers in plain text, signals `finish`, asks the
//! user something, or hits the step cap.

use std::path::PathBuf;
use std::sync::Arc;

use codeforge_config::{AppConfig, ContextConfig};
use codeforge_context::{ContextBudgeter, ContextIndex, HeuristicCounter, IndexOptions, TokenCounter};
use codeforge_core::message::{Conversation, Message, Role};
use codeforge_core::provider::{Provider, ProviderRequest};
use codeforge_core::tool::{Dispatch, ToolRegistry};
use codeforge_providers::{collect_stream, RetryCoordinator};
use tracing::{debug, info, warn};

/// Hard output size cap fed back to the model per tool call, in chars.
const OUTPUT_CHAR_LIMIT: usize = 9000;

/// Line-based compression kicks in above this many lines.
const LINE_SPLIT_THRESHOLD: usize = 300;
const HEAD_LINES: usize = 60;
const TAIL_LINES: usize = 200;

/// Messages kept (besides the system prompt) when the token guard trims.
const KEEP_RECENT: usize = 8;

/// Callback fired for each streamed content fragment.
pub type DeltaObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// How a processing pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model answered in plain text without requesting tools.
    Completed(String),

    /// The model signalled the task is done, with its summary.
    Finished { summary: String },

    /// The model is blocked on the user. Resume by pushing a tool result
    /// keyed by `call_id` with the user's answer and calling the loop again.
    AwaitingUser { call_id: String, question: String },

    /// The step cap was reached before any terminal signal.
    StepCapReached,
}

/// Workspace file context attached to a task.
pub struct WorkspaceContext {
    /// Root the index and file paths are relative to
    pub root: PathBuf,

    /// Keyword index over the workspace
    pub index: ContextIndex,

    /// Files always included whole
    pub mandatory: Vec<String>,

    /// Candidate files ranked against the task text
    pub optional: Vec<String>,
}

impl WorkspaceContext {
    /// Index the workspace and take the file lists from the retrieval
    /// configuration.
    pub fn from_config(root: PathBuf, config: &ContextConfig) -> Self {
        let index = ContextIndex::build(&root, &IndexOptions::from(config));
        Self {
            root,
            index,
            mandatory: config.mandatory_files.clone(),
            optional: config.optional_files.clone(),
        }
    }
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,

    /// Retry policy wrapping every provider attempt
    retry: RetryCoordinator,

    model: String,

    temperature: f32,

    /// Max tokens per LLM response
    max_tokens: Option<u32>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// System prompt, inserted as the first message when absent
    system_prompt: String,

    /// Hard cap on assistant turns per task
    step_cap: u32,

    /// Whether to stream responses
    streaming: bool,

    /// Fired per streamed content fragment
    on_delta: Option<DeltaObserver>,

    /// Budget calculator for workspace file context
    budgeter: ContextBudgeter,

    /// Workspace context, when a task has file context attached
    context: Option<WorkspaceContext>,

    /// Model context window, drives the history guard (0 disables it)
    max_context: usize,

    counter: HeuristicCounter,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        retry: RetryCoordinator,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            retry,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            system_prompt: "You are an autonomous coding assistant.".into(),
            step_cap: 50,
            streaming: false,
            on_delta: None,
            budgeter: ContextBudgeter::new(0, 0),
            context: None,
            max_context: 0,
            counter: HeuristicCounter,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the hard cap on assistant turns per task.
    pub fn with_step_cap(mut self, cap: u32) -> Self {
        self.step_cap = cap.max(1);
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Observe streamed content fragments (for live printing).
    pub fn with_delta_observer(mut self, observer: DeltaObserver) -> Self {
        self.on_delta = Some(observer);
        self
    }

    /// Attach workspace file context and its budget calculator.
    pub fn with_context(mut self, budgeter: ContextBudgeter, context: WorkspaceContext) -> Self {
        self.budgeter = budgeter;
        self.context = Some(context);
        self
    }

    /// Enable the history guard: when the conversation exceeds 90% of the
    /// window, older turns are dropped before the next request.
    pub fn with_max_context(mut self, max_context: usize) -> Self {
        self.max_context = max_context;
        self
    }

    /// Apply settings from the application configuration.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.temperature = config.temperature;
        self.max_tokens = Some(config.max_tokens);
        self.max_context = config.max_context;
        self.step_cap = config.agent.step_cap.max(1);
        self.streaming = config.agent.streaming;
        self.retry = self.retry.with_max_attempts(config.agent.max_attempts);
        self
    }

    /// Run the loop on a new user task.
    ///
    /// The bare task text is what history keeps; assembled file context is
    /// prefixed only onto the per-request copy of the task turn, so it is
    /// never replayed from history in later sessions.
    pub async fn process(
        &self,
        conversation: &mut Conversation,
        task: &str,
    ) -> Result<LoopOutcome, codeforge_core::Error> {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Processing task"
        );

        if conversation.messages.first().map(|m| m.role) != Some(Role::System) {
            conversation
                .messages
                .insert(0, Message::system(&self.system_prompt));
        }

        self.guard_history(conversation);

        let task_message = Message::user(task);
        let task_message_id = task_message.id.clone();
        conversation.push(task_message);

        let context_text = self.assemble_context(conversation, task);

        let tool_definitions = self.tools.definitions();

        for step in 1..=self.step_cap {
            debug!(conversation_id = %conversation.id, step, "Agent loop step");

            let mut messages = conversation.snapshot();
            if !context_text.is_empty() {
                if let Some(turn) = messages.iter_mut().find(|m| m.id == task_message_id) {
                    turn.content = format!("{}\n\n{}", context_text, turn.content);
                }
            }

            let request = ProviderRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_definitions.clone(),
                stream: self.streaming,
            };

            let assistant = self.request_turn(request).await?;
            let tool_calls = assistant.tool_calls.clone();
            let content = assistant.content.clone();
            conversation.push(assistant);

            if tool_calls.is_empty() {
                return Ok(LoopOutcome::Completed(content));
            }

            debug!(tool_count = tool_calls.len(), "Executing tool calls");

            for tc in &tool_calls {
                match Dispatch::classify(tc) {
                    Dispatch::Finish { summary, .. } => {
                        // Remaining sibling calls are intentionally not run.
                        info!(conversation_id = %conversation.id, "Task finished");
                        return Ok(LoopOutcome::Finished { summary });
                    }
                    Dispatch::AskUser { call_id, question } => {
                        info!(conversation_id = %conversation.id, "Awaiting user input");
                        return Ok(LoopOutcome::AwaitingUser { call_id, question });
                    }
                    Dispatch::Call(call) => {
                        let missing = self.missing_parameters(&call.name, &call.arguments);
                        if !missing.is_empty() {
                            warn!(tool = %call.name, ?missing, "Tool call missing parameters");
                            conversation.push(Message::tool_result(
                                &call.id,
                                format!(
                                    "Error: missing required parameter(s): {}",
                                    missing.join(", ")
                                ),
                            ));
                            continue;
                        }

                        match self.tools.execute(&call).await {
                            Ok(result) => {
                                conversation.push(Message::tool_result(
                                    &call.id,
                                    compress_output(&result.output),
                                ));
                            }
                            Err(e) => {
                                warn!(tool = %call.name, error = %e, "Tool execution failed");
                                conversation
                                    .push(Message::tool_result(&call.id, format!("Error: {e}")));
                            }
                        }
                    }
                }
            }
            // Loop back so the model sees the tool results.
        }

        warn!(
            conversation_id = %conversation.id,
            step_cap = self.step_cap,
            "Step cap reached without a terminal signal"
        );
        Ok(LoopOutcome::StepCapReached)
    }

    /// One model turn through the retry layer.
    ///
    /// For streaming, sending and draining happen inside the attempt so a
    /// truncated stream re-drives the whole request (after rotation or
    /// backoff as the error dictates).
    async fn request_turn(
        &self,
        request: ProviderRequest,
    ) -> Result<Message, codeforge_core::Error> {
        let message = if self.streaming {
            let provider = self.provider.clone();
            let observer = self.on_delta.clone();
            self.retry
                .call(|| {
                    let provider = provider.clone();
                    let observer = observer.clone();
                    let request = request.clone();
                    async move {
                        let rx = provider.stream(request).await?;
                        let (text, calls) = collect_stream(rx, |delta| {
                            if let Some(cb) = &observer {
                                cb(delta);
                            }
                        })
                        .await?;
                        Ok(Message::assistant_with_calls(text, calls))
                    }
                })
                .await?
        } else {
            let provider = self.provider.clone();
            self.retry
                .call(|| {
                    let provider = provider.clone();
                    let request = request.clone();
                    async move { Ok(provider.complete(request).await?.message) }
                })
                .await?
        };
        Ok(message)
    }

    /// Assemble the file-context block for this task, if context is attached.
    fn assemble_context(&self, conversation: &Conversation, task: &str) -> String {
        let Some(ctx) = &self.context else {
            return String::new();
        };

        // The advertised tool schemas ride along with every request, so
        // they consume window tokens just like the conversation does.
        let consumed = self.counter.count_messages(&conversation.messages)
            + self.counter.count_tools(&self.tools.definitions());
        let report = self.budgeter.build(
            &ctx.root,
            &ctx.index,
            &ctx.mandatory,
            &ctx.optional,
            task,
            consumed,
        );

        debug!(
            included = report.included.len(),
            skipped = report.skipped.len(),
            used_tokens = report.used_tokens,
            available = report.available,
            over_budget = report.over_budget,
            "Assembled file context"
        );
        report.text
    }

    /// Drop older turns when the conversation nears the context window.
    fn guard_history(&self, conversation: &mut Conversation) {
        if self.max_context == 0 {
            return;
        }
        let consumed = self.counter.count_messages(&conversation.messages);
        if consumed * 10 > self.max_context * 9 {
            warn!(
                consumed,
                max_context = self.max_context,
                "Conversation near context limit, trimming history"
            );
            conversation.clear_history(true, KEEP_RECENT);
        }
    }

    fn missing_parameters(&self, tool: &str, arguments: &serde_json::Value) -> Vec<String> {
        self.tools
            .required_parameters(tool)
            .into_iter()
            .filter(|p| arguments.get(p).is_none())
            .collect()
    }
}

/// Cap a tool's output before it is fed back to the model.
///
/// Output over the char limit keeps the head and tail when it is long in
/// lines (logs, test runs), otherwise it is cut at the limit.
pub fn compress_output(output: &str) -> String {
    if output.len() <= OUTPUT_CHAR_LIMIT {
        return output.to_string();
    }

    let lines: Vec<&str> = output.lines().collect();
    if lines.len() > LINE_SPLIT_THRESHOLD {
        let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
        let head = lines[..HEAD_LINES].join("\n");
        let tail = lines[lines.len() - TAIL_LINES..].join("\n");
        return format!("{head}\n... [{omitted} lines omitted] ...\n{tail}");
    }

    let mut cut = OUTPUT_CHAR_LIMIT;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated]", &output[..cut])
}
