use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The shape of value a configuration field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FieldKind {
    Text,
    /// Text that is never echoed back through the API or logs.
    Secret,
    Integer {
        min: i64,
        max: i64,
    },
    Select(&'static [&'static str]),
}

/// One named configuration field in a provider's schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    /// Default applied when the field is absent, written in its TOML form.
    pub default: Option<&'static str>,
    pub required: bool,
}

impl FieldDescriptor {
    pub const fn text(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            kind: FieldKind::Text,
            default: None,
            required: false,
        }
    }

    pub const fn secret(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            kind: FieldKind::Secret,
            default: None,
            required: false,
        }
    }

    pub const fn select(
        key: &'static str,
        label: &'static str,
        options: &'static [&'static str],
    ) -> Self {
        Self {
            key,
            label,
            kind: FieldKind::Select(options),
            default: None,
            required: false,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn default_value(&self) -> Option<FieldValue> {
        let raw = self.default?;
        match self.kind {
            FieldKind::Integer { .. } => raw.parse().ok().map(FieldValue::Integer),
            _ => Some(FieldValue::Text(raw.to_string())),
        }
    }

    fn check(&self, value: &FieldValue) -> Result<(), String> {
        match (self.kind, value) {
            (FieldKind::Text | FieldKind::Secret, FieldValue::Text(_)) => Ok(()),
            (FieldKind::Integer { min, max }, FieldValue::Integer(n)) => {
                if (min..=max).contains(n) {
                    Ok(())
                } else {
                    Err(format!("must be between {} and {}, got {}", min, max, n))
                }
            }
            (FieldKind::Select(options), FieldValue::Text(s)) => {
                if options.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{}' is not one of: {}",
                        s,
                        options.join(", ")
                    ))
                }
            }
            (kind, value) => Err(format!("expected {}, got {}", kind, value.type_name())),
        }
    }
}

/// A configured field value, as written in TOML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "integer",
            FieldValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

/// A field that failed validation against its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{key}' {message}")]
pub struct FieldError {
    pub key: String,
    pub message: String,
}

/// Field values for one provider, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, FieldValue>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Text value of a field, if it is set and non-empty.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(FieldValue::Text(s)) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate these values against `schema`, filling in defaults.
    ///
    /// Every problem is reported, not just the first one. Keys the schema does
    /// not know about are rejected so that typos surface at load time.
    pub fn resolve(&self, schema: &[FieldDescriptor]) -> Result<FieldValues, Vec<FieldError>> {
        let mut resolved = BTreeMap::new();
        let mut errors = Vec::new();

        for key in self.0.keys() {
            if !schema.iter().any(|d| d.key == key.as_str()) {
                errors.push(FieldError {
                    key: key.clone(),
                    message: "is not a known field".to_string(),
                });
            }
        }

        for descriptor in schema {
            let value = match self.0.get(descriptor.key) {
                Some(FieldValue::Text(s)) if s.trim().is_empty() => None,
                Some(value) => Some(value.clone()),
                None => None,
            };

            match value.or_else(|| descriptor.default_value()) {
                Some(value) => match descriptor.check(&value) {
                    Ok(()) => {
                        resolved.insert(descriptor.key.to_string(), value);
                    }
                    Err(message) => errors.push(FieldError {
                        key: descriptor.key.to_string(),
                        message,
                    }),
                },
                None if descriptor.required => errors.push(FieldError {
                    key: descriptor.key.to_string(),
                    message: "is required".to_string(),
                }),
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(FieldValues(resolved))
        } else {
            Err(errors)
        }
    }
}

impl FromIterator<(String, FieldValue)> for FieldValues {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        FieldValues(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[FieldDescriptor] = &[
        FieldDescriptor::text("url", "API URL").with_default("https://example.invalid/"),
        FieldDescriptor::secret("api_key", "API key").required(),
        FieldDescriptor::select("category", "Category", &["anime", "poetry"]).with_default("poetry"),
        FieldDescriptor {
            key: "days",
            label: "Days",
            kind: FieldKind::Integer { min: 1, max: 3 },
            default: Some("3"),
            required: false,
        },
    ];

    #[test]
    fn test_resolve_applies_defaults() {
        let values = FieldValues::new().with("api_key", "secret");
        let resolved = values.resolve(SCHEMA).unwrap();

        assert_eq!(resolved.text("url"), Some("https://example.invalid/"));
        assert_eq!(resolved.text("category"), Some("poetry"));
        assert_eq!(resolved.integer("days"), Some(3));
        assert_eq!(resolved.text("api_key"), Some("secret"));
    }

    #[test]
    fn test_resolve_reports_every_problem() {
        let values = FieldValues::new()
            .with("category", "sports")
            .with("days", 7i64)
            .with("colour", "blue");

        let errors = values.resolve(SCHEMA).unwrap_err();
        let keys: Vec<_> = errors.iter().map(|e| e.key.as_str()).collect();

        assert_eq!(keys, vec!["colour", "api_key", "category", "days"]);
        assert_eq!(errors[1].to_string(), "field 'api_key' is required");
        assert_eq!(errors[3].message, "must be between 1 and 3, got 7");
    }

    #[test]
    fn test_blank_required_text_is_missing() {
        let values = FieldValues::new().with("api_key", "   ");
        let errors = values.resolve(SCHEMA).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key, "api_key");
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let values = FieldValues::new().with("api_key", 42i64);
        let errors = values.resolve(SCHEMA).unwrap_err();

        assert_eq!(errors[0].message, "expected secret, got integer");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let values = FieldValues::new().with("api_key", "secret");
        let once = values.resolve(SCHEMA).unwrap();
        let twice = once.resolve(SCHEMA).unwrap();

        assert_eq!(once, twice);
    }
}
