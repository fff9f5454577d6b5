//! Analysis prompt catalog.
//!
//! Each analysis action maps to one fixed template. Templates are plain text
//! with `{name}` placeholders filled by [`fill_placeholders`]; literal JSON in
//! the schema examples survives because unmatched placeholders are copied
//! through untouched.

use std::collections::HashMap;

/// Shape of the array the model is asked to return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResultShape {
    /// Array of fix objects with the template's `fields`
    Objects,
    /// Flat array of strings
    Strings,
}

#[derive(Debug)]
pub(crate) struct PromptTemplate {
    pub action: &'static str,
    pub instruction: &'static str,
    /// Field names every returned object must carry (empty for `Strings`)
    pub fields: &'static [&'static str],
    /// What the model must answer when it finds nothing
    pub empty_sentinel: &'static str,
    pub shape: ResultShape,
}

/// Action whose results go back as a string list under their own message type.
pub(crate) const EDGE_CASES_ACTION: &str = "edge-cases";

const FIX_FIELDS: &[&str] = &["issue", "description", "suggestion", "current", "expected", "nodeId"];

const ANALYSIS_FRAME: &str = "You are reviewing a design exported from Figma as JSON.

{instruction}

Design data:
{design_data}

Respond with a JSON array only, inside a ```json fenced block. {schema}
If you find nothing, respond with exactly {empty}.";

static CATALOG: &[PromptTemplate] = &[
    PromptTemplate {
        action: "spelling",
        instruction: "Check every text node for spelling mistakes, grammar errors, inconsistent capitalisation and placeholder copy (lorem ipsum, TODO, xxx). Quote the exact text in `current` and the corrected text in `expected`.",
        fields: FIX_FIELDS,
        empty_sentinel: "[]",
        shape: ResultShape::Objects,
    },
    PromptTemplate {
        action: "layout",
        instruction: "Check the layout for inconsistent spacing, padding and sizing between sibling elements, elements overflowing their parent frame, and auto-layout misuse. Report measured values in `current` and the value that matches the rest of the design in `expected`.",
        fields: FIX_FIELDS,
        empty_sentinel: "[]",
        shape: ResultShape::Objects,
    },
    PromptTemplate {
        action: "alignment",
        instruction: "Check positional alignment: elements that are off the shared left/right/center edges of their siblings by a few pixels, uneven distribution, and x/y values that break the grid. Use the x, y, width and height fields to measure.",
        fields: FIX_FIELDS,
        empty_sentinel: "[]",
        shape: ResultShape::Objects,
    },
    PromptTemplate {
        action: "contrast",
        instruction: "Check color contrast between text and its background against WCAG 2.1 AA (4.5:1 for body text, 3:1 for large text and UI components). Put the measured ratio and colors in `current` and a compliant color in `expected`.",
        fields: FIX_FIELDS,
        empty_sentinel: "[]",
        shape: ResultShape::Objects,
    },
    PromptTemplate {
        action: "consistency",
        instruction: "Check cross-element consistency: the same kind of element (buttons, headings, cards, labels) using different font sizes, weights, colors, corner radii or naming across the design.",
        fields: FIX_FIELDS,
        empty_sentinel: "[]",
        shape: ResultShape::Objects,
    },
    PromptTemplate {
        action: EDGE_CASES_ACTION,
        instruction: "List the edge cases this screen does not yet handle: empty, loading and error states, very long or missing text, unusual data, permissions, offline use and accessibility situations. Each entry is one short sentence.",
        fields: &[],
        empty_sentinel: "[]",
        shape: ResultShape::Strings,
    },
];

/// Look up the template for an analysis action.
pub(crate) fn lookup(action: &str) -> Option<&'static PromptTemplate> {
    CATALOG.iter().find(|t| t.action == action)
}

impl PromptTemplate {
    /// Schema sentence for the answer format.
    pub(crate) fn schema_hint(&self) -> String {
        match self.shape {
            ResultShape::Strings => "Each element must be a string.".to_string(),
            ResultShape::Objects => {
                let example: Vec<String> = self.fields.iter().map(|f| format!("\"{f}\": \"...\"")).collect();
                format!(
                    "Each element must be an object with exactly these fields: {{{}}}. `nodeId` is the id of the affected node from the design data.",
                    example.join(", ")
                )
            }
        }
    }

    /// Full user prompt for this action over a serialized design snapshot.
    pub(crate) fn render(&self, design_json: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("instruction".to_string(), self.instruction.to_string());
        vars.insert("design_data".to_string(), design_json.to_string());
        vars.insert("schema".to_string(), self.schema_hint());
        vars.insert("empty".to_string(), self.empty_sentinel.to_string());
        fill_placeholders(ANALYSIS_FRAME, &vars)
    }
}

/// System prompt for conversational turns. Active project context is appended
/// when the plugin has told us which project is open.
pub(crate) fn chat_system_prompt(project_name: Option<&str>, goals: &[String]) -> String {
    let mut prompt = String::from(
        "You are Sidebot, a product design copilot living inside Figma. \
Answer conversationally and concisely. When the user asks you to review or fix \
something in the design, include the concrete fixes as a JSON array in a ```json \
fenced block, each object with the fields issue, description, suggestion, current, \
expected and nodeId. Only reference node ids that appear in the provided design data.",
    );
    if let Some(name) = project_name {
        prompt.push_str(&format!("\n\nThe active project is \"{name}\"."));
        if !goals.is_empty() {
            prompt.push_str(" Its goals are:");
            for goal in goals {
                prompt.push_str("\n- ");
                prompt.push_str(goal);
            }
        }
    }
    prompt
}

/// Replace `{name}` placeholders with values from `vars`.
/// Unknown placeholders are copied through, braces included.
pub(crate) fn fill_placeholders(content: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}
