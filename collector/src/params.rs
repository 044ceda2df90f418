//! Request parameters from the query string, optionally overlaid by a JSON body.
use crate::upstream::Cursor;
use serde_json::{Map, Value as JsonValue};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: Map<String, JsonValue>,
}

impl Params {
    /// Parses a raw query string. The first occurrence of a repeated key wins.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut values = Map::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                values
                    .entry(key.into_owned())
                    .or_insert_with(|| JsonValue::String(value.into_owned()));
            }
        }
        Params { values }
    }

    /// Body fields take precedence over query parameters.
    pub fn merge(&mut self, body: Map<String, JsonValue>) {
        self.values.extend(body);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn raw(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// A trimmed, non-empty string. Numbers are accepted in their JSON form.
    pub fn str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// A list from a comma-separated string or a JSON array of strings, taken
    /// from the first of `keys` that yields any entries.
    pub fn list(&self, keys: &[&str]) -> Vec<String> {
        keys.iter()
            .map(|key| self.list_for(key))
            .find(|list| !list.is_empty())
            .unwrap_or_default()
    }

    fn list_for(&self, key: &str) -> Vec<String> {
        let entries: Vec<String> = match self.values.get(key) {
            Some(JsonValue::String(s)) => s.split(',').map(String::from).collect(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        entries
            .into_iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    }

    /// A strictly positive integer, else `None`.
    pub fn positive_int(&self, key: &str) -> Option<u32> {
        let value = match self.values.get(key)? {
            JsonValue::String(s) => s.trim().parse::<u32>().ok(),
            JsonValue::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        };
        value.filter(|n| *n > 0)
    }

    pub fn cursor(&self) -> Option<Cursor> {
        match self.values.get("cursor")? {
            JsonValue::String(s) if !s.is_empty() => Some(Cursor::Text(s.clone())),
            JsonValue::Number(n) => Some(Cursor::Number(n.clone())),
            _ => None,
        }
    }
}
