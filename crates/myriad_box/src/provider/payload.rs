use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// A provider-defined fetch result.
///
/// The coordinator stores and hands these around without looking inside; only
/// the provider that produced a payload knows its concrete type.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Payload(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(..)")
    }
}

/// Display-ready output of [`Provider::render`](super::Provider::render).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rendered {
    pub values: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Rendered {
    /// Every key in `keys` set to the same placeholder text.
    pub fn placeholder<'a>(keys: impl IntoIterator<Item = &'a str>, text: &str) -> Self {
        Rendered {
            values: keys
                .into_iter()
                .map(|k| (k.to_string(), text.to_string()))
                .collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn value(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Add an attribute, skipping it when the value is `None`.
    pub fn attribute(mut self, key: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::Null) | Err(_) => {}
            Ok(v) => {
                self.attributes.insert(key.to_string(), v);
            }
        }
        self
    }
}
