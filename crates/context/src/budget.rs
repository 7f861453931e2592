//! Context budgeting and assembly.
//!
//! Given the model's context window, the output reserve, and the tokens the
//! conversation already consumes, the budgeter decides which workspace files
//! fit into the prompt. Mandatory files are always included whole; optional
//! candidates are ranked by relevance to a task hint and admitted while the
//! budget lasts. Assembly is deterministic for identical inputs.

use std::collections::BTreeSet;
use std::path::Path;

use crate::index::{tokenize, ContextIndex};
use crate::token::{HeuristicCounter, TokenCounter};

/// Tokens held back beyond the explicit output reserve, absorbing counter
/// error and wire framing.
const DEFAULT_SAFETY_MARGIN: usize = 1000;

/// Budget calculator and context assembler.
pub struct ContextBudgeter {
    counter: Box<dyn TokenCounter>,
    max_context: usize,
    reserved_output: usize,
    safety_margin: usize,
}

/// The outcome of one assembly pass.
#[derive(Debug, Clone)]
pub struct ContextReport {
    /// The rendered context block, empty when nothing was included
    pub text: String,

    /// Paths included, in render order
    pub included: Vec<String>,

    /// Optional paths that did not fit
    pub skipped: Vec<String>,

    /// Tokens the rendered block consumes
    pub used_tokens: usize,

    /// Tokens that were available for context files
    pub available: usize,

    /// True when mandatory files alone exceeded the budget
    pub over_budget: bool,
}

impl ContextBudgeter {
    pub fn new(max_context: usize, reserved_output: usize) -> Self {
        Self {
            counter: Box::new(HeuristicCounter),
            max_context,
            reserved_output,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn with_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_safety_margin(mut self, margin: usize) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Tokens available for context files once the output reserve, current
    /// conversation, and safety margin are set aside.
    pub fn available(&self, consumed_tokens: usize) -> usize {
        self.max_context
            .saturating_sub(self.reserved_output)
            .saturating_sub(consumed_tokens)
            .saturating_sub(self.safety_margin)
    }

    /// How many index search hits are merged into the optional candidates.
    const SEARCH_CANDIDATES: usize = 12;

    /// Assemble a context block from the workspace.
    ///
    /// `mandatory` paths are always included whole, even past the budget
    /// (the report flags that). `optional` paths, merged with the top index
    /// hits for `hint`, are ranked against the hint and admitted while they
    /// fit. Unreadable files are logged and skipped without failing the
    /// pass.
    pub fn build(
        &self,
        root: &Path,
        index: &ContextIndex,
        mandatory: &[String],
        optional: &[String],
        hint: &str,
        consumed_tokens: usize,
    ) -> ContextReport {
        let available = self.available(consumed_tokens);
        let mut used = 0usize;
        let mut blocks: Vec<String> = Vec::new();
        let mut included: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for path in mandatory {
            let Some(block) = self.render_file(root, path) else {
                continue;
            };
            used += self.counter.count(&block);
            blocks.push(block);
            included.push(path.clone());
        }
        let over_budget = used > available;
        if over_budget {
            tracing::warn!(
                used,
                available,
                "Mandatory context files exceed the available budget"
            );
        }

        let mut candidates: Vec<String> = optional.to_vec();
        for hit in index.search(hint, Self::SEARCH_CANDIDATES) {
            if !candidates.contains(&hit.path) && !included.contains(&hit.path) {
                candidates.push(hit.path);
            }
        }

        for path in self.rank_optional(index, &candidates, hint) {
            if included.contains(&path) {
                continue;
            }
            let Some(block) = self.render_file(root, &path) else {
                continue;
            };
            let block_tokens = self.counter.count(&block);
            if used + block_tokens <= available {
                used += block_tokens;
                blocks.push(block);
                included.push(path);
            } else {
                skipped.push(path);
            }
        }

        let mut text = String::new();
        if !blocks.is_empty() {
            text.push_str("## Context Files:\n");
            for block in &blocks {
                text.push_str(block);
            }
        }
        if !skipped.is_empty() {
            text.push_str("## Skipped Files (over budget):\n");
            for path in &skipped {
                text.push_str(&format!("- {path}\n"));
            }
        }

        ContextReport {
            text,
            included,
            skipped,
            used_tokens: used,
            available,
            over_budget,
        }
    }

    fn render_file(&self, root: &Path, path: &str) -> Option<String> {
        match std::fs::read_to_string(root.join(path)) {
            Ok(content) => Some(format!("### {path}\n```\n{content}\n```\n")),
            Err(e) => {
                tracing::warn!(path, error = %e, "Skipping unreadable context file");
                None
            }
        }
    }

    /// Order optional candidates by hint-keyword overlap, newest mtime,
    /// then path.
    fn rank_optional(&self, index: &ContextIndex, optional: &[String], hint: &str) -> Vec<String> {
        let hint_tokens: BTreeSet<String> = tokenize(hint).into_iter().collect();

        let mut ranked: Vec<(usize, u64, String)> = optional
            .iter()
            .map(|path| {
                let (score, mtime) = match index.entry(path) {
                    Some(entry) => {
                        let score = hint_tokens
                            .iter()
                            .filter(|t| entry.tokens.binary_search(t).is_ok())
                            .count();
                        (score, entry.mtime)
                    }
                    None => (0, 0),
                };
                (score, mtime, path.clone())
            })
            .collect();

        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        ranked.into_iter().map(|(_, _, path)| path).collect()
    }
}
