//! JSONPath subset evaluation
//!
//! Supports the forms the test language needs: root `$`, dotted keys,
//! bracketed keys (`['key']`, `["key"]`), numeric indices (`[0]`), and
//! wildcards (`[*]`, `.*`). Recursive descent and filter expressions are
//! rejected at parse time.

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// A parsed path query, reusable across documents.
#[derive(Debug, Clone)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(invalid(path, "empty path"));
        }
        if trimmed.contains("..") {
            return Err(invalid(path, "recursive descent is not supported"));
        }

        let mut segments = Vec::new();
        let mut chars = trimmed.strip_prefix('$').unwrap_or(trimmed).chars().peekable();

        // A bare leading key, as in "status.phase".
        let mut current = String::new();
        while let Some(&c) = chars.peek() {
            match c {
                '.' | '[' => break,
                _ => {
                    current.push(c);
                    chars.next();
                }
            }
        }
        if !current.is_empty() {
            segments.push(key_or_wildcard(&current));
        }

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() {
                        // A dot directly before a bracket, as in "$.items.[0]".
                        if chars.peek() != Some(&'[') {
                            return Err(invalid(path, "empty key segment"));
                        }
                    } else {
                        segments.push(key_or_wildcard(&key));
                    }
                }
                '[' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for next in chars.by_ref() {
                        if next == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(next);
                    }
                    if !closed {
                        return Err(invalid(path, "unterminated bracket"));
                    }
                    let inner = inner.trim();
                    if inner == "*" {
                        segments.push(Segment::Wildcard);
                    } else if let Some(quoted) = strip_quotes(inner) {
                        segments.push(Segment::Key(quoted.to_string()));
                    } else if let Ok(index) = inner.parse::<usize>() {
                        segments.push(Segment::Index(index));
                    } else {
                        return Err(invalid(
                            path,
                            "bracket segment must be an index, a quoted key, or *",
                        ));
                    }
                }
                other => {
                    return Err(invalid(path, &format!("unexpected character '{other}'")));
                }
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// All values addressed by the path; empty when nothing matches.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(key) => {
                        if let Some(child) = value.get(key) {
                            next.push(child);
                        }
                    }
                    Segment::Index(index) => {
                        if let Some(child) = value.get(index) {
                            next.push(child);
                        }
                    }
                    Segment::Wildcard => match value {
                        Value::Object(map) => next.extend(map.values()),
                        Value::Array(items) => next.extend(items.iter()),
                        _ => {}
                    },
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// Remove every node the path addresses; missing paths are a no-op.
    pub fn remove(&self, root: &mut Value) {
        remove_segments(root, &self.segments);
    }
}

fn remove_segments(value: &mut Value, segments: &[Segment]) {
    match segments {
        [] => {}
        [last] => match (value, last) {
            (Value::Object(map), Segment::Key(key)) => {
                map.remove(key);
            }
            (Value::Array(items), Segment::Index(index)) => {
                if *index < items.len() {
                    items.remove(*index);
                }
            }
            (Value::Object(map), Segment::Wildcard) => map.clear(),
            (Value::Array(items), Segment::Wildcard) => items.clear(),
            _ => {}
        },
        [head, rest @ ..] => match (value, head) {
            (Value::Object(map), Segment::Key(key)) => {
                if let Some(child) = map.get_mut(key) {
                    remove_segments(child, rest);
                }
            }
            (Value::Array(items), Segment::Index(index)) => {
                if let Some(child) = items.get_mut(*index) {
                    remove_segments(child, rest);
                }
            }
            (Value::Object(map), Segment::Wildcard) => {
                for child in map.values_mut() {
                    remove_segments(child, rest);
                }
            }
            (Value::Array(items), Segment::Wildcard) => {
                for child in items.iter_mut() {
                    remove_segments(child, rest);
                }
            }
            _ => {}
        },
    }
}

fn key_or_wildcard(token: &str) -> Segment {
    if token == "*" {
        Segment::Wildcard
    } else {
        Segment::Key(token.to_string())
    }
}

fn strip_quotes(token: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if let Some(inner) = token
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Some(inner);
        }
    }
    None
}

fn invalid(path: &str, reason: &str) -> Error {
    Error::InvalidJsonPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_nested_keys_and_indices() {
        let doc = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        let path = JsonPath::parse("$.status.conditions[0].status").unwrap();
        let matches = path.select(&doc);
        assert_eq!(matches, vec![&json!("True")]);
    }

    #[test]
    fn accepts_paths_without_root_marker() {
        let doc = json!({"metadata": {"name": "web-0"}});
        let path = JsonPath::parse("metadata.name").unwrap();
        assert_eq!(path.select(&doc), vec![&json!("web-0")]);
    }

    #[test]
    fn bracketed_keys_reach_awkward_names() {
        let doc = json!({"metadata": {"labels": {"app.kubernetes.io/name": "web"}}});
        let path = JsonPath::parse(r#"$.metadata.labels['app.kubernetes.io/name']"#).unwrap();
        assert_eq!(path.select(&doc), vec![&json!("web")]);
    }

    #[test]
    fn wildcard_fans_out() {
        let doc = json!({"items": [{"name": "a"}, {"name": "b"}]});
        let path = JsonPath::parse("$.items[*].name").unwrap();
        assert_eq!(path.select(&doc), vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn missing_paths_select_nothing() {
        let doc = json!({"a": 1});
        let path = JsonPath::parse("$.b.c").unwrap();
        assert!(path.select(&doc).is_empty());
    }

    #[test]
    fn rejects_recursive_descent_and_garbage() {
        assert!(JsonPath::parse("$..name").is_err());
        assert!(JsonPath::parse("").is_err());
        assert!(JsonPath::parse("$.items[abc]").is_err());
        assert!(JsonPath::parse("$.items[0").is_err());
        let err = JsonPath::parse("$..x").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn remove_deletes_keys_and_elements() {
        let mut doc = json!({"timestamp": "t", "items": [{"id": 1, "at": "x"}, {"id": 2, "at": "y"}]});
        JsonPath::parse("$.timestamp").unwrap().remove(&mut doc);
        JsonPath::parse("$.items[*].at").unwrap().remove(&mut doc);
        assert_eq!(doc, json!({"items": [{"id": 1}, {"id": 2}]}));
    }

    #[test]
    fn remove_of_missing_path_is_a_noop() {
        let mut doc = json!({"a": 1});
        JsonPath::parse("$.b[3].c").unwrap().remove(&mut doc);
        assert_eq!(doc, json!({"a": 1}));
    }
}
