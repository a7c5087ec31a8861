//! Structured output parser — turns raw model text into a typed decision.
//!
//! The model is asked to answer in `Thought:` / `Action:` / `Action Input:`
//! sections, but real output is unreliable: keys go unquoted, commas go
//! missing, braces stay open, payloads arrive fenced in markdown. The parser
//! recovers what it can and records what it could not — it never fails.
//!
//! Output contract: a [`ParsedDecision`] with optional rationale, optional
//! action name, optional parsed input, and a `parse_error` when recovery
//! failed. A decision is usable if it has a rationale or an action; an
//! action must come with either parsed input or a recorded parse error.

use regex_lite::Regex;
use serde_json::{Map, Value};

use vitalis_core::tool::FINISH_TOOL;

/// Section markers that bound each field's span.
const MARKERS: [&str; 4] = ["Thought:", "Action:", "Action Input:", "Observation:"];

/// A typed decision extracted from raw model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDecision {
    /// The model's rationale line(s).
    pub thought: Option<String>,

    /// The named action, if one was found.
    pub action: Option<String>,

    /// The structured action input, if it parsed (possibly after recovery).
    pub action_input: Option<Map<String, Value>>,

    /// Why input recovery/parsing failed, when it did.
    pub parse_error: Option<String>,
}

impl ParsedDecision {
    /// True iff the action names the designated terminal action.
    pub fn is_finished(&self) -> bool {
        self.action.as_deref() == Some(FINISH_TOOL)
    }

    /// A decision is usable if it has a rationale or an action. An action
    /// without parsed input *and* without a parse error is invalid and must
    /// not be dispatched.
    pub fn is_usable(&self) -> bool {
        if self.action.is_some() {
            return self.action_input.is_some() || self.parse_error.is_some();
        }
        self.thought.is_some()
    }
}

/// Parse raw model output into a decision. Never fails: unparseable input
/// yields a populated `parse_error` for the caller to treat as a
/// recoverable observation.
pub fn parse_decision(raw: &str) -> ParsedDecision {
    let mut decision = ParsedDecision::default();

    decision.thought = extract_section(raw, "Thought:");

    if let Some(name) = extract_action_name(raw) {
        decision.action = Some(name);

        match extract_input_payload(raw) {
            Some(payload) => match parse_payload(&payload) {
                Ok(map) => decision.action_input = Some(map),
                Err(e) => decision.parse_error = Some(e),
            },
            None => {
                decision.parse_error = Some("no action input payload found".into());
            }
        }
    } else if raw.contains("Action:") {
        // The marker is present but no token could be extracted.
        decision.parse_error = Some("action marker present but no action name found".into());
    }

    decision
}

/// Extract the text after `marker` up to the next section marker (bounded
/// lookahead) or end of text. Returns `None` for missing or empty sections.
fn extract_section(raw: &str, marker: &str) -> Option<String> {
    let start = raw.find(marker)? + marker.len();
    let rest = &raw[start..];

    let end = MARKERS
        .iter()
        .filter_map(|m| rest.find(m))
        .min()
        .unwrap_or(rest.len());

    let section = rest[..end].trim();
    if section.is_empty() {
        None
    } else {
        Some(section.to_string())
    }
}

/// Extract the action name: the first identifier-like token on the
/// `Action:` line.
fn extract_action_name(raw: &str) -> Option<String> {
    // "Action Input:" also starts with "Action", so anchor on line starts.
    let re = Regex::new(r"(?m)^[ \t]*Action:[ \t]*`?([A-Za-z0-9_.\-]+)").expect("valid regex");
    re.captures(raw).map(|c| c[1].to_string())
}

/// Locate the first opening brace after the `Action Input:` marker and take
/// the balanced-looking span up to the matching close, the next section
/// marker, or end of text.
fn extract_input_payload(raw: &str) -> Option<String> {
    let start = raw.find("Action Input:")? + "Action Input:".len();
    let rest = &raw[start..];

    let bound = MARKERS
        .iter()
        .filter_map(|m| rest.find(m))
        .min()
        .unwrap_or(rest.len());
    let span = &rest[..bound];

    let open = span.find('{')?;
    let candidate = &span[open..];

    // Walk the span tracking brace depth and string state; stop at balance.
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in candidate.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(candidate[..=i].to_string());
                }
            }
            _ => {}
        }
    }

    // Never balanced — hand the whole span to recovery.
    Some(candidate.trim_end().to_string())
}

/// Strict parse with a tolerant recovery pass in between.
fn parse_payload(payload: &str) -> Result<Map<String, Value>, String> {
    let attempt = |text: &str| -> Option<Map<String, Value>> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    };

    if let Some(map) = attempt(payload) {
        return Ok(map);
    }

    let repaired = repair_json(payload);
    attempt(&repaired).ok_or_else(|| {
        format!(
            "action input is not a JSON object even after recovery: {}",
            truncate(payload, 120)
        )
    })
}

/// Best-effort JSON recovery: strips markdown fences, rewrites single-quoted
/// strings, quotes bare keys and bare string values, drops trailing commas,
/// and closes unterminated strings/brackets.
pub fn repair_json(input: &str) -> String {
    let stripped = strip_fences(input);
    let mut out = String::with_capacity(stripped.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut chars = stripped.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            // Single-quoted string → double-quoted, escaping inner quotes.
            '\'' => {
                out.push('"');
                for sc in chars.by_ref() {
                    match sc {
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            '{' | '[' => {
                stack.push(c);
                out.push(c);
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
            }
            // Bare identifier: a key missing quotes, a keyword, or a bare
            // string value.
            _ if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                word.push(c);
                while let Some(&nc) = chars.peek() {
                    if nc.is_alphanumeric() || nc == '_' || nc == '.' || nc == '-' {
                        word.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if matches!(word.as_str(), "true" | "false" | "null") || parses_as_number(&word) {
                    out.push_str(&word);
                } else {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        out.push('"');
    }
    drop_trailing_comma(&mut out);
    while let Some(open) = stack.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

fn strip_fences(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line if present.
    let inner = match inner.find('\n') {
        Some(pos) => &inner[pos + 1..],
        None => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Remove a trailing comma (plus trailing whitespace) from the output so
/// far, if one is pending before a closing bracket or end of input.
fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

fn parses_as_number(word: &str) -> bool {
    word.parse::<f64>().is_ok()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
