use regex::Regex;
use serde_json::{Map, Value};

/// Outcome of looking for a tool call's arguments in generated text.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(Map<String, Value>),
    /// No such occurrence, or its body was not a JSON object.
    Failed,
}

impl Extraction {
    pub fn is_failed(&self) -> bool {
        matches!(self, Extraction::Failed)
    }

    pub fn into_arguments(self) -> Option<Map<String, Value>> {
        match self {
            Extraction::Found(arguments) => Some(arguments),
            Extraction::Failed => None,
        }
    }
}

/// Parses the `match_num`-th block of the form
///
/// ````text
/// Call <name>:
/// ```json
/// { ... }
/// ```
/// ````
///
/// out of `text`. The closing brace must sit on its own line.
pub fn extract_json(text: &str, name: &str, match_num: usize) -> Extraction {
    let pattern = format!(
        r"Call {}:\s*```json\n(\{{[\s\S]*?\n\}})\n```",
        regex::escape(name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Extraction::Failed;
    };

    let Some(body) = re
        .captures_iter(text)
        .nth(match_num)
        .and_then(|caps| caps.get(1))
    else {
        return Extraction::Failed;
    };

    match serde_json::from_str::<Value>(body.as_str()) {
        Ok(Value::Object(arguments)) => Extraction::Found(arguments),
        _ => Extraction::Failed,
    }
}
