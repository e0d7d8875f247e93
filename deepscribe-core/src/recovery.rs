//! Recovery of structured values from free-form model output.
//!
//! A [`RecoveryChain`] holds an ordered list of named parsing strategies. The
//! chain is tried front to back and the first strategy that yields a value wins.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use tracing::debug;

type Strategy<T> = Box<dyn Fn(&str) -> Option<T> + Send + Sync>;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("fenced block pattern is valid")
});

static LIST_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•+]|\d+[.)]|\(\d+\))\s*").expect("list prefix pattern is valid")
});

/// Ordered, named parsing strategies for one target shape.
pub struct RecoveryChain<T> {
    name: &'static str,
    strategies: Vec<(&'static str, Strategy<T>)>,
}

impl<T> RecoveryChain<T> {
    /// An empty chain. `name` identifies the target shape in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            strategies: Vec::new(),
        }
    }

    /// Append a strategy to the end of the chain.
    pub fn then<F>(mut self, strategy_name: &'static str, strategy: F) -> Self
    where
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        self.strategies.push((strategy_name, Box::new(strategy)));
        self
    }

    /// Strategy names in the order they are tried.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|(name, _)| *name).collect()
    }

    /// Run the chain, returning the value and the strategy that produced it.
    pub fn recover_with_name(&self, raw: &str) -> Option<(T, &'static str)> {
        for (strategy_name, strategy) in &self.strategies {
            if let Some(value) = strategy(raw) {
                debug!(target_shape = self.name, strategy = strategy_name, "Recovered structured output");
                return Some((value, strategy_name));
            }
        }
        debug!(target_shape = self.name, "No recovery strategy matched");
        None
    }

    pub fn recover(&self, raw: &str) -> Option<T> {
        self.recover_with_name(raw).map(|(value, _)| value)
    }
}

impl<T: DeserializeOwned + 'static> RecoveryChain<T> {
    /// A chain pre-loaded with the three JSON strategies: the whole text,
    /// a fenced code block, and the outermost embedded object or array.
    pub fn json(name: &'static str) -> Self {
        Self::new(name)
            .then("json", |raw| serde_json::from_str(raw.trim()).ok())
            .then("fenced_json", |raw| {
                FENCED_BLOCK
                    .captures_iter(raw)
                    .find_map(|caps| serde_json::from_str(caps[1].trim()).ok())
            })
            .then("embedded_json", |raw| {
                embedded_json_span(raw).and_then(|span| serde_json::from_str(span).ok())
            })
    }
}

/// The widest `{...}` or `[...]` span in `raw`, if any.
fn embedded_json_span(raw: &str) -> Option<&str> {
    let object = raw.find('{').zip(raw.rfind('}'));
    let array = raw.find('[').zip(raw.rfind(']'));
    let (start, end) = match (object, array) {
        (Some(o), Some(a)) => {
            if o.0 < a.0 {
                o
            } else {
                a
            }
        }
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    (start < end).then(|| &raw[start..=end])
}

/// Strip a leading bullet or number marker from a list line.
pub fn strip_list_marker(line: &str) -> &str {
    match LIST_PREFIX.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
    .trim()
}

/// Parse a plain list: one item per non-empty line, with list markers removed.
pub fn parse_line_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(strip_list_marker)
        .map(|line| line.trim_matches(|c| c == '"' || c == '*' || c == '`').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse Markdown headings (`#`..`####`) with the text that follows each one.
pub fn parse_markdown_headings(raw: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let heading = trimmed.trim_start_matches('#').trim();
            let heading = heading.trim_matches('*').trim();
            if !heading.is_empty() {
                sections.push((heading.to_string(), String::new()));
            }
            continue;
        }
        if let Some((_, body)) = sections.last_mut()
            && !trimmed.is_empty()
        {
            if !body.is_empty() {
                body.push(' ');
            }
            body.push_str(trimmed.trim());
        }
    }
    sections
}
