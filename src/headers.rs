use std::collections::HashMap;
use std::fmt;

/// A header value: digit-only text is stored as an integer, everything
/// else as a string, per the dump grammar (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Text(String),
}

impl HeaderValue {
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse() {
                return HeaderValue::Int(n);
            }
        }
        HeaderValue::Text(raw.to_string())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(n) => Some(*n),
            HeaderValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            HeaderValue::Int(_) => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Int(n) => write!(f, "{n}"),
            HeaderValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(n: i64) -> Self {
        HeaderValue::Int(n)
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Text(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Text(s)
    }
}

/// Insertion-ordered header list with an O(1) lookup map over the same
/// sequence — two views over one set of entries, not two copies (spec.md §9).
#[derive(Debug, Clone, Default)]
pub struct Headers {
    order: Vec<(String, HeaderValue)>,
    index: HashMap<String, usize>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, replacing an existing one of the same name in place.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(&i) = self.index.get(&name) {
            self.order[i].1 = value;
        } else {
            self.index.insert(name.clone(), self.order.len());
            self.order.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.index.get(name).map(|&i| &self.order[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Replaces a header in place if present, otherwise inserts it at the
    /// front of the list. Observable in golden fixtures — preserve it.
    pub fn update_head(&mut self, name: &str, value: impl Into<HeaderValue>) {
        let value = value.into();
        if let Some(&i) = self.index.get(name) {
            self.order[i].1 = value;
        } else {
            self.order.insert(0, (name.to_string(), value));
            self.reindex();
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let i = self.index.remove(name)?;
        let (_, value) = self.order.remove(i);
        self.reindex();
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, HeaderValue)> {
        self.order.iter()
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (k, _)) in self.order.iter().enumerate() {
            self.index.insert(k.clone(), i);
        }
    }
}
