//! Transcript and token-budget management.
//!
//! One [`Transcript`] per task. It owns the ordered user/assistant
//! entries exchanged with the model, enforces the tool-use pairing
//! invariant on append, and produces budget-bounded views for model
//! calls via [`Transcript::prepare`].
//!
//! Token estimation is a deliberate approximation (bytes / 4). The
//! truncation policy assumes the estimate can be off by 10% or more;
//! real overflows reported by the provider are retried once through the
//! aggressive pass.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::{Block, Entry, Role};

/// Bytes-per-token divisor for the estimation heuristic.
const BYTES_PER_TOKEN: usize = 4;

/// Marker appended to blocks cut by the per-block cap.
const BLOCK_TRUNCATION_NOTE: &str = " [truncated]";

/// Estimate the token cost of a byte count.
#[must_use]
pub const fn estimate_tokens(bytes: usize) -> usize {
    bytes.div_ceil(BYTES_PER_TOKEN)
}

/// Tuning knobs for transcript truncation.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Per-block byte cap applied during a normal prepare pass.
    pub max_block_bytes: usize,
    /// Tighter per-block byte cap for the aggressive pass.
    pub aggressive_block_bytes: usize,
    /// Maximum tail entries kept by the aggressive pass.
    pub aggressive_tail_entries: usize,
    /// How many recent facts the synthetic summary lists.
    pub summary_facts: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_block_bytes: 16 * 1024,
            aggressive_block_bytes: 2 * 1024,
            aggressive_tail_entries: 8,
            summary_facts: 10,
        }
    }
}

/// The message transcript for one task.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    facts: Vec<String>,
    config: ContextConfig,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new(config: ContextConfig) -> Self {
        Self {
            entries: Vec::new(),
            facts: Vec::new(),
            config,
        }
    }

    /// The entries in append order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the transcript is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a discovered fact for later context summaries.
    pub fn record_fact(&mut self, fact: impl Into<String>) {
        self.facts.push(fact.into());
    }

    /// Facts recorded so far.
    #[must_use]
    pub fn facts(&self) -> &[String] {
        &self.facts
    }

    /// Append an entry, enforcing alternation and the pairing invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] when alternation breaks, when a user
    /// entry carries `tool_result` blocks that do not exactly answer the
    /// preceding assistant entry's `tool_use` blocks, or when the
    /// preceding assistant entry has unanswered `tool_use` blocks and
    /// this entry does not answer them.
    pub fn append(&mut self, entry: Entry) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if last.role == entry.role {
                return Err(Error::invariant(format!(
                    "consecutive {} entries are not allowed",
                    entry.role.as_str()
                )));
            }
            if last.role == Role::Assistant && last.has_tool_use() {
                let expected = last.tool_use_ids();
                let got = entry.tool_result_ids();
                if expected != got {
                    return Err(Error::invariant(format!(
                        "tool results {got:?} do not answer tool uses {expected:?}"
                    )));
                }
            } else if !entry.tool_result_ids().is_empty() {
                return Err(Error::invariant(
                    "tool_result blocks without a preceding tool_use",
                ));
            }
        } else {
            if entry.role != Role::User {
                return Err(Error::invariant("transcript must start with a user entry"));
            }
            if !entry.tool_result_ids().is_empty() {
                return Err(Error::invariant(
                    "tool_result blocks without a preceding tool_use",
                ));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Append an assistant tool-use turn together with its matching
    /// results, atomically. The runtime uses this for every tool turn,
    /// so an unanswered `tool_use` is never persisted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] when the results do not answer the
    /// assistant turn's tool uses, or when alternation breaks.
    pub fn append_exchange(&mut self, assistant: Entry, results: Entry) -> Result<()> {
        if assistant.tool_use_ids() != results.tool_result_ids() {
            return Err(Error::invariant(
                "tool results must answer the assistant turn's tool uses in order",
            ));
        }
        self.append(assistant)?;
        match self.append(results) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Roll back the half-applied exchange.
                self.entries.pop();
                Err(e)
            }
        }
    }

    /// Estimated token cost of the full transcript.
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(self.entries.iter().map(Entry::approx_bytes).sum())
    }

    /// Return a view whose estimated token cost fits `budget`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextOverflow`] when no safe truncation fits.
    pub fn prepare(&self, budget: usize) -> Result<Vec<Entry>> {
        self.prepare_with(budget, self.config.max_block_bytes, usize::MAX)
    }

    /// Aggressive pass: shorter tail window, tighter per-block caps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextOverflow`] when even the aggressive pass
    /// cannot fit the budget; the current iteration then fails.
    pub fn prepare_aggressive(&self, budget: usize) -> Result<Vec<Entry>> {
        self.prepare_with(
            budget,
            self.config.aggressive_block_bytes,
            self.config.aggressive_tail_entries,
        )
    }

    fn prepare_with(
        &self,
        budget: usize,
        block_cap: usize,
        max_tail: usize,
    ) -> Result<Vec<Entry>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        // Exactly at budget: untouched.
        if self.estimated_tokens() <= budget && self.entries.len() <= max_tail.saturating_add(1) {
            return Ok(self.entries.clone());
        }

        let capped: Vec<Entry> = self
            .entries
            .iter()
            .map(|e| cap_entry(e, block_cap))
            .collect();

        let cost = |entries: &[&Entry]| -> usize {
            estimate_tokens(entries.iter().map(|e| e.approx_bytes()).sum())
        };

        // A capped pass with no prefix removal may already fit.
        let full: Vec<&Entry> = capped.iter().collect();
        if cost(&full) <= budget && capped.len() <= max_tail.saturating_add(1) {
            return Ok(capped);
        }

        let summary_text = self.summary_text();
        let ack = Entry::assistant("Acknowledged; some earlier exchanges were summarized.");
        let user_summary = Entry::user(summary_text.clone());
        let assistant_recap = Entry::assistant(summary_text);

        // Candidate start indices, earliest first. A cut never splits a
        // tool exchange: any assistant entry is safe (its results follow
        // it inside the tail), and so is a user entry that carries no
        // tool results.
        for start in 1..capped.len() {
            let entry = &capped[start];
            let safe = match entry.role {
                Role::Assistant => true,
                Role::User => entry.tool_result_ids().is_empty(),
            };
            if !safe || capped.len() - start > max_tail {
                continue;
            }

            // The synthetic replacement keeps alternation for either
            // tail parity: an ack/summary pair ahead of an assistant
            // tail, or a single assistant recap ahead of a user tail.
            let mut view: Vec<&Entry> = Vec::with_capacity(capped.len() - start + 3);
            view.push(&capped[0]);
            match entry.role {
                Role::Assistant => {
                    view.push(&ack);
                    view.push(&user_summary);
                }
                Role::User => view.push(&assistant_recap),
            }
            view.extend(capped[start..].iter());
            if cost(&view) <= budget {
                return Ok(view.into_iter().cloned().collect());
            }
        }

        Err(Error::ContextOverflow { budget })
    }

    /// Text of the synthetic context summary, listing the most recent
    /// discovered facts.
    fn summary_text(&self) -> String {
        let mut summary =
            String::from("Earlier conversation was truncated to fit the context window.");
        let recent: Vec<&String> = self
            .facts
            .iter()
            .rev()
            .take(self.config.summary_facts)
            .collect();
        if recent.is_empty() {
            summary.push_str(" No findings recorded yet.");
        } else {
            summary.push_str(" Recent findings:");
            for fact in recent.iter().rev() {
                summary.push_str("\n- ");
                summary.push_str(fact);
            }
        }
        summary
    }
}

/// Apply a per-block byte cap to an entry, annotating truncation.
fn cap_entry(entry: &Entry, cap: usize) -> Entry {
    let blocks = entry
        .blocks
        .iter()
        .map(|block| match block {
            Block::Text { text } if text.len() > cap => Block::text(truncate_str(text, cap)),
            Block::ToolResult {
                tool_use_id,
                content,
                is_error,
            } if content.len() > cap => Block::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: truncate_str(content, cap),
                is_error: *is_error,
            },
            other => other.clone(),
        })
        .collect();
    Entry::with_blocks(entry.role, blocks)
}

fn truncate_str(text: &str, cap: usize) -> String {
    let mut cut = cap;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], BLOCK_TRUNCATION_NOTE)
}

/// Convenience: build the tool-use ids of an input value for logging.
#[must_use]
pub fn canonical_input_prefix(input: &Value, len: usize) -> String {
    let raw = input.to_string();
    let mut cut = raw.len().min(len);
    while !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    raw[..cut].to_owned()
}
