//! `%NAME%` placeholder substitution for text-bearing steps.

use crate::error::{Result, StepError};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(\w+)%").expect("placeholder pattern is valid"));

/// Named values available to scripts, snapshotted from the process environment.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    pub fn from_env() -> Self {
        Self {
            values: std::env::vars().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Substitute every `%NAME%` in `text`. An unknown or empty name is an error.
    pub fn interpolate(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(text) {
            let whole = caps.get(0).expect("group 0 always matches");
            let name = &caps[1];
            let value = self
                .get(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StepError::MissingVariable(name.to_string()))?;

            out.push_str(&text[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }

        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Names of the placeholders `text` refers to that have a value, in order of appearance.
    pub fn referenced_names(&self, text: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(text) {
            let name = &caps[1];
            if self.get(name).is_some_and(|v| !v.is_empty()) && !names.iter().any(|n| n == name)
            {
                names.push(name.to_string());
            }
        }
        names
    }
}

impl FromIterator<(String, String)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
