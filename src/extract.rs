//! Pulls structured payloads out of free-form model output.
//!
//! Claude is asked to answer analysis prompts with a JSON array, but the reply
//! usually wraps that array in prose, a fenced code block, or both. Extraction
//! runs a fixed chain of strategies and keeps the first one that yields a
//! parseable array of the expected [`ResultShape`]. Nothing here returns an
//! error: when no strategy succeeds the whole reply comes back as
//! conversational text with no items.

use serde_json::Value;
use std::ops::Range;

use crate::prompts::ResultShape;

/// Outcome of running the extractor over one model reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ExtractedResult {
    /// Structured items found in the reply. Always objects for
    /// [`ResultShape::Objects`]; strings or objects for [`ResultShape::Strings`]
    pub items: Vec<Value>,
    /// The reply with the structured payload cut out, trimmed
    pub clean_text: String,
    /// Strategy that produced `items`; `None` for purely conversational replies
    pub strategy: Option<Strategy>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// The whole reply is a JSON array
    WholeDocument,
    /// A ```json fenced block holding an array
    FencedBlock,
    /// First `[ {...} ]` run found in the prose
    BareObjectArray,
    /// Bracket-balanced scan; string arrays only when strings are expected
    BalancedArray,
}

/// An array found by one strategy plus the byte span to cut from the prose.
#[derive(Debug)]
struct Candidate {
    items: Vec<Value>,
    span: Range<usize>,
}

type StrategyFn = fn(&str, ResultShape) -> Option<Candidate>;

const STRATEGIES: &[(Strategy, StrategyFn)] = &[
    (Strategy::WholeDocument, whole_document),
    (Strategy::FencedBlock, fenced_block),
    (Strategy::BareObjectArray, bare_object_array),
    (Strategy::BalancedArray, balanced_array),
];

lazy_static::lazy_static! {
    /// ```json [ ... ] ```: the tag is optional, the array must close right before the fence.
    static ref FENCED_ARRAY: regex::Regex =
        regex::Regex::new(r"(?s)```(?:json|JSON)?\s*(\[.*?\])\s*```").unwrap();
    /// Non-greedy `[` … object … `]` run.
    static ref BARE_OBJECT_ARRAY: regex::Regex =
        regex::Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").unwrap();
    static ref EXTRA_BLANK_LINES: regex::Regex =
        regex::Regex::new(r"\n{3,}").unwrap();
}

/// Run the strategy chain over `text`, accepting only arrays of `shape`.
pub(crate) fn extract(text: &str, shape: ResultShape) -> ExtractedResult {
    for (strategy, run) in STRATEGIES {
        if let Some(candidate) = run(text, shape) {
            tracing::debug!(
                strategy = ?strategy,
                items = candidate.items.len(),
                "structured payload extracted"
            );
            return ExtractedResult {
                items: candidate.items,
                clean_text: cut_span(text, candidate.span),
                strategy: Some(*strategy),
            };
        }
    }

    ExtractedResult {
        items: Vec::new(),
        clean_text: text.trim().to_string(),
        strategy: None,
    }
}

/// Stamp each object item with the analysis action that produced it.
/// String items (edge-case lists) carry no fields and are left alone.
pub(crate) fn tag_with_action(items: &mut [Value], action: &str) {
    for item in items.iter_mut() {
        if let Value::Object(map) = item {
            map.insert("action".to_string(), Value::String(action.to_string()));
        }
    }
}

/// Flatten items into plain strings for string-shaped results.
///
/// Models asked for a list of strings sometimes answer with objects anyway;
/// the first of `text`/`case`/`title`/`description` wins, anything else is
/// rendered as compact JSON.
pub(crate) fn string_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Null => None,
            Value::Object(map) => ["text", "case", "title", "description"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .or_else(|| Some(item.to_string())),
            other => Some(other.to_string()),
        })
        .collect()
}

/// Whether a parsed array fits the requested shape. Empty arrays fit both.
fn fits(items: &[Value], shape: ResultShape) -> bool {
    match shape {
        ResultShape::Objects => items.iter().all(Value::is_object),
        ResultShape::Strings => true,
    }
}

fn whole_document(text: &str, shape: ResultShape) -> Option<Candidate> {
    let trimmed = text.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) if fits(&items, shape) => Some(Candidate { items, span: 0..text.len() }),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("reply looks like a JSON array but does not parse: {e}");
            None
        }
    }
}

fn fenced_block(text: &str, shape: ResultShape) -> Option<Candidate> {
    for caps in FENCED_ARRAY.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        match serde_json::from_str::<Value>(inner.as_str()) {
            Ok(Value::Array(items)) if fits(&items, shape) => {
                return Some(Candidate { items, span: whole.range() });
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("fenced JSON block failed to parse: {e}"),
        }
    }
    None
}

fn bare_object_array(text: &str, shape: ResultShape) -> Option<Candidate> {
    for m in BARE_OBJECT_ARRAY.find_iter(text) {
        match serde_json::from_str::<Value>(m.as_str()) {
            Ok(Value::Array(items)) if fits(&items, shape) => return Some(Candidate { items, span: m.range() }),
            Ok(_) => {}
            Err(e) => tracing::debug!("bare array candidate failed to parse: {e}"),
        }
    }
    None
}

fn balanced_array(text: &str, shape: ResultShape) -> Option<Candidate> {
    for (start, ch) in text.char_indices() {
        if ch != '[' {
            continue;
        }
        let rest = text[start + 1..].trim_start();
        let opens_item = rest.starts_with('{') || (shape == ResultShape::Strings && rest.starts_with('"'));
        if !opens_item {
            continue;
        }
        let Some(end) = matching_bracket(text, start) else {
            continue;
        };
        match serde_json::from_str::<Value>(&text[start..end]) {
            Ok(Value::Array(items)) if fits(&items, shape) => return Some(Candidate { items, span: start..end }),
            Ok(_) => {}
            Err(e) => tracing::debug!("balanced array candidate failed to parse: {e}"),
        }
    }
    None
}

/// Byte offset one past the `]` that closes the `[` at `open`.
/// Brackets inside JSON strings are ignored; a mismatched closer ends the scan.
fn matching_bracket(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[open..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (ch == ']').then_some(open + i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn cut_span(text: &str, span: Range<usize>) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..span.start]);
    out.push_str(&text[span.end..]);
    EXTRA_BLANK_LINES.replace_all(out.trim(), "\n\n").into_owned()
}
