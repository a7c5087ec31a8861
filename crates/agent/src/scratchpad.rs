//! Scratchpad log — the append-only transcript of loop iterations.
//!
//! Each entry is one reasoning step: rationale, action name, structured
//! action input, and the resulting observation. Entries are immutable once
//! appended; the log itself is a growing text transcript that gets rendered
//! into the next prompt and periodically truncated to bound prompt size.
//!
//! Invariant: `parse(&format(&e))` reproduces `e` exactly for any
//! well-formed entry (all four fields non-empty, no blank lines inside a
//! field).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One completed reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    /// Free-text rationale.
    pub thought: String,
    /// The dispatched action name.
    pub action: String,
    /// Structured action input.
    pub action_input: Map<String, Value>,
    /// Free-text observation (tool output or diagnostic).
    pub observation: String,
}

impl ScratchpadEntry {
    /// All four fields non-empty. A partially-parsed step must never be
    /// appended as a complete entry — it is recorded inline as an error
    /// observation instead (see [`append_observation`]).
    pub fn is_well_formed(&self) -> bool {
        !self.thought.is_empty() && !self.action.is_empty() && !self.observation.is_empty()
    }
}

/// Render the four-field block for one entry.
pub fn format(entry: &ScratchpadEntry) -> String {
    let input = serde_json::to_string(&Value::Object(entry.action_input.clone()))
        .unwrap_or_else(|_| "{}".into());
    format!(
        "Thought: {}\nAction: {}\nAction Input: {}\nObservation: {}",
        entry.thought, entry.action, input, entry.observation
    )
}

/// Append a formatted entry to the log with a guaranteed blank-line
/// separator between entries.
pub fn append(log: &str, entry: &ScratchpadEntry) -> String {
    let block = format(entry);
    if log.is_empty() {
        block
    } else {
        let mut out = log.trim_end().to_string();
        out.push_str("\n\n");
        out.push_str(&block);
        out
    }
}

/// Append a bare diagnostic observation for a step that did not produce a
/// well-formed entry (parse failure, unknown tool). The block is
/// intentionally incomplete so [`parse`] drops it, while the model still
/// sees the diagnostic in the rendered prompt.
pub fn append_observation(log: &str, observation: &str) -> String {
    let block = format!("Observation: {observation}");
    if log.is_empty() {
        block
    } else {
        let mut out = log.trim_end().to_string();
        out.push_str("\n\n");
        out.push_str(&block);
        out
    }
}

/// Split the log on blank-line boundaries and re-extract the four fields
/// per block. Incomplete blocks are silently dropped.
pub fn parse(log: &str) -> Vec<ScratchpadEntry> {
    log.split("\n\n").filter_map(parse_block).collect()
}

/// Keep only the most recent `max_entries` parsed entries and re-serialize
/// them. A no-op if the log already has fewer entries.
pub fn truncate(log: &str, max_entries: usize) -> String {
    let entries = parse(log);
    if entries.len() <= max_entries {
        return log.to_string();
    }
    let keep = &entries[entries.len() - max_entries..];
    let mut out = String::new();
    for entry in keep {
        out = append(&out, entry);
    }
    out
}

fn parse_block(block: &str) -> Option<ScratchpadEntry> {
    let mut thought = None;
    let mut action = None;
    let mut action_input = None;
    let mut observation: Option<String> = None;

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("Thought: ") {
            thought = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("Action: ") {
            action = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("Action Input: ") {
            match serde_json::from_str::<Value>(rest) {
                Ok(Value::Object(map)) => action_input = Some(map),
                _ => return None,
            }
        } else if let Some(rest) = line.strip_prefix("Observation: ") {
            observation = Some(rest.to_string());
        } else if let Some(obs) = observation.as_mut() {
            // Continuation line of a multi-line observation.
            obs.push('\n');
            obs.push_str(line);
        } else if let Some(th) = thought.as_mut()
            && action.is_none()
        {
            // Continuation line of a multi-line thought.
            th.push('\n');
            th.push_str(line);
        }
    }

    let entry = ScratchpadEntry {
        thought: thought?,
        action: action?,
        action_input: action_input?,
        observation: observation?,
    };
    entry.is_well_formed().then_some(entry)
}
