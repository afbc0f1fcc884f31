//! Shared variable store and `$VAR` interpolation
//!
//! The store is an explicit object owned by the runner and passed into each
//! step, not ambient process state. Values captured by one step are visible
//! to every later step in the same run; writes are last-write-wins per name.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use tracing::{debug, warn};

static VAR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable reference pattern is valid")
});

/// Name-keyed string store for values captured across test steps.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: BTreeMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Publish a value, trimming surrounding whitespace and overwriting any
    /// prior value of the same name.
    pub fn set(&mut self, name: &str, value: &str) {
        let trimmed = value.trim().to_string();
        debug!(name, value = %trimmed, "captured variable");
        self.values.insert(name.to_string(), trimmed);
    }

    /// Case-insensitive lookup: an exact match wins over a case-folded one.
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.values.get(name) {
            return Some(value);
        }
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    /// Resolve `$NAME` and `${NAME}` references. Unresolved references pass
    /// through verbatim, with a warning.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REF
            .replace_all(input, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.get(name) {
                    Some(value) => value.to_string(),
                    None => {
                        warn!(name, "unresolved variable reference left verbatim");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}
