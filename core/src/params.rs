//! Request parameters and their form-urlencoded encoding.
//!
//! A parameter whose value is `null` is "not provided" and is never put on
//! the wire, while an empty string is sent as `key=`.

use indexmap::IndexMap;
use serde_json::Value;
use url::form_urlencoded;

/// Insertion-ordered parameter mapping for one API call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(IndexMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Add a parameter only when a value is present.
    pub fn insert_opt<V: Into<Value>>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    /// Builder-style `insert`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Wire pairs after dropping absent values, in insertion order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = scalar_text(item) {
                            pairs.push((key.clone(), text));
                        }
                    }
                }
                other => {
                    if let Some(text) = scalar_text(other) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
        }
        pairs
    }

    /// `application/x-www-form-urlencoded` rendering of `pairs()`.
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.pairs() {
            serializer.append_pair(&key, &value);
        }
        serializer.finish()
    }

    /// Copy suitable for logs: password values are masked.
    pub(crate) fn redacted(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|(key, value)| {
                let value = if key.eq_ignore_ascii_case("password") && !value.is_null() {
                    Value::String("***".to_string())
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Params {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_values_are_dropped_but_empty_strings_are_kept() {
        let params = Params::from([
            ("description", json!("")),
            ("name", Value::Null),
            ("vmid", json!(100)),
        ]);
        assert_eq!(params.encode(), "description=&vmid=100");
    }

    #[test]
    fn booleans_encode_as_digits() {
        let params = Params::new().with("onboot", true).with("template", false);
        assert_eq!(params.encode(), "onboot=1&template=0");
    }

    #[test]
    fn arrays_repeat_the_key() {
        let params = Params::new().with("delete", json!(["net0", null, "ide2"]));
        assert_eq!(params.encode(), "delete=net0&delete=ide2");
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let params = Params::new().with("net0", "virtio,bridge=vmbr0");
        assert_eq!(params.encode(), "net0=virtio%2Cbridge%3Dvmbr0");
    }

    #[test]
    fn insert_opt_skips_none() {
        let mut params = Params::new();
        params
            .insert_opt("pool", None::<String>)
            .insert_opt("cores", Some(4));
        assert_eq!(params.len(), 1);
        assert_eq!(params.encode(), "cores=4");
    }

    #[test]
    fn insertion_order_is_preserved() {
        let params = Params::new().with("z", 1).with("a", 2).with("m", 3);
        assert_eq!(params.encode(), "z=1&a=2&m=3");
    }

    #[test]
    fn redacted_masks_password() {
        let params = Params::new().with("username", "root").with("password", "hunter2");
        let shown = params.redacted();
        assert_eq!(shown["username"], "root");
        assert_eq!(shown["password"], "***");
    }
}
