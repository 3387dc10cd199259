//! Input normalisation and turn limits

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core_types::{History, HistoryItem};

pub const DEFAULT_MAX_TURNS: usize = 12;
pub const MAX_TURNS_CEILING: usize = 72;

/// What the caller hands to `operate`/`stream`.
#[derive(Debug, Clone, PartialEq)]
pub enum OperateInput {
    Text(String),
    Item(HistoryItem),
    History(History),
}

impl From<&str> for OperateInput {
    fn from(text: &str) -> Self {
        OperateInput::Text(text.to_string())
    }
}

impl From<String> for OperateInput {
    fn from(text: String) -> Self {
        OperateInput::Text(text)
    }
}

impl From<HistoryItem> for OperateInput {
    fn from(item: HistoryItem) -> Self {
        OperateInput::Item(item)
    }
}

impl From<History> for OperateInput {
    fn from(history: History) -> Self {
        OperateInput::History(history)
    }
}

impl OperateInput {
    /// Converts the input into the initial history of a session, filling
    /// `{{key}}` placeholders in message text from `data`.
    pub fn into_history(self, data: Option<&HashMap<String, String>>) -> History {
        let history = match self {
            OperateInput::Text(text) => vec![HistoryItem::user(text)],
            OperateInput::Item(item) => vec![item],
            OperateInput::History(history) => history,
        };

        match data {
            Some(data) if !data.is_empty() => history
                .into_iter()
                .map(|item| match item {
                    HistoryItem::Message { role, content } => HistoryItem::Message {
                        role,
                        content: substitute(&content, data),
                    },
                    other => other,
                })
                .collect(),
            _ => history,
        }
    }
}

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").ok())
        .as_ref()
}

/// Replaces `{{key}}` with `data[key]`. Placeholders without a value are left
/// as they are.
pub fn substitute(text: &str, data: &HashMap<String, String>) -> String {
    let Some(re) = placeholder() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &regex::Captures| {
        data.get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// The `turns` option. Deserializes from a bool or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Turns {
    #[default]
    #[serde(skip)]
    Default,
    Enabled(bool),
    Limit(i64),
}

impl Turns {
    pub fn max_turns(&self) -> usize {
        match *self {
            Turns::Default | Turns::Enabled(true) => DEFAULT_MAX_TURNS,
            Turns::Enabled(false) => 1,
            Turns::Limit(n) if n <= 0 => 1,
            Turns::Limit(n) => (n as usize).min(MAX_TURNS_CEILING),
        }
    }
}

impl From<usize> for Turns {
    fn from(n: usize) -> Self {
        Turns::Limit(n as i64)
    }
}

impl From<bool> for Turns {
    fn from(enabled: bool) -> Self {
        Turns::Enabled(enabled)
    }
}
