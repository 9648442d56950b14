#![forbid(unsafe_code)]

//! Validation: error maps and the pluggable [`Validator`] hook.
//!
//! A validator is a pure function from a values container to an
//! [`ErrorMap`]. Nodes call it whenever a setter is not handed an explicit
//! error payload, so per-keystroke validation and externally supplied errors
//! end up in the same map with the same shape.
//!
//! # Invariants
//!
//! 1. Maps returned by [`Validator::validate`] and stored on nodes are
//!    normalized: no key maps to an empty message or an empty nested map.
//! 2. The default validator reports no errors.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::value::{Container, FieldKey, Value};

/// Per-field errors, keyed like the container they describe.
pub type ErrorMap = BTreeMap<FieldKey, FieldError>;

/// Error attached to one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldError {
    /// Human-readable message for a scalar field.
    Message(String),
    /// Errors of the fields inside a list- or map-valued field.
    Nested(ErrorMap),
}

impl FieldError {
    /// Whether this error carries anything worth displaying.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Message(msg) => !msg.is_empty(),
            Self::Nested(map) => map.values().any(FieldError::is_truthy),
        }
    }

    /// Drop falsy entries; `None` when nothing truthy remains.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        match self {
            Self::Message(msg) if msg.is_empty() => None,
            Self::Message(msg) => Some(Self::Message(msg)),
            Self::Nested(map) => {
                let map = normalize(map);
                (!map.is_empty()).then_some(Self::Nested(map))
            }
        }
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&str> {
        match self {
            Self::Message(msg) => Some(msg),
            Self::Nested(_) => None,
        }
    }

    #[must_use]
    pub fn as_nested(&self) -> Option<&ErrorMap> {
        match self {
            Self::Message(_) => None,
            Self::Nested(map) => Some(map),
        }
    }

    /// The nested map of a field error, or an empty map for a message or
    /// for no error at all.
    #[must_use]
    pub fn into_nested(error: Option<Self>) -> ErrorMap {
        match error {
            Some(Self::Nested(map)) => map,
            _ => ErrorMap::new(),
        }
    }
}

impl From<&str> for FieldError {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_owned())
    }
}

impl From<String> for FieldError {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

impl From<ErrorMap> for FieldError {
    fn from(map: ErrorMap) -> Self {
        Self::Nested(map)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(msg) => f.write_str(msg),
            Self::Nested(map) => write!(f, "{} nested error(s)", map.len()),
        }
    }
}

/// Remove every falsy entry from `map`, recursively.
#[must_use]
pub fn normalize(map: ErrorMap) -> ErrorMap {
    map.into_iter()
        .filter_map(|(key, err)| err.normalized().map(|err| (key, err)))
        .collect()
}

/// Pluggable validation hook: `values -> errors`.
///
/// Cloning shares the underlying function.
#[derive(Clone)]
pub struct Validator {
    check: Rc<dyn Fn(&Container) -> ErrorMap>,
}

impl Validator {
    /// Wrap a validation function.
    pub fn new(check: impl Fn(&Container) -> ErrorMap + 'static) -> Self {
        Self {
            check: Rc::new(check),
        }
    }

    /// A validator that never reports errors.
    #[must_use]
    pub fn none() -> Self {
        Self::new(|_| ErrorMap::new())
    }

    /// Run the check and normalize its output.
    #[must_use]
    pub fn validate(&self, values: &Container) -> ErrorMap {
        normalize((self.check)(values))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").finish_non_exhaustive()
    }
}

type Rule = Rc<dyn Fn(Option<&Value>) -> Option<String>>;

/// Builder for a [`Validator`] made of per-field rules.
///
/// Rules for the same field run in insertion order; the first failing rule
/// supplies the field's message.
///
/// ```
/// use formtree::{map, FieldKey, FieldRules};
///
/// let validator = FieldRules::new()
///     .required("email", "email is required")
///     .rule("age", |v| match v.and_then(|v| v.as_int()) {
///         Some(age) if age < 18 => Some("must be an adult".into()),
///         _ => None,
///     })
///     .build();
///
/// let errors = validator.validate(&map! { "email" => "", "age" => 12 });
/// assert_eq!(errors.len(), 2);
/// assert_eq!(errors[&FieldKey::from("age")].as_message(), Some("must be an adult"));
/// ```
#[derive(Clone, Default)]
pub struct FieldRules {
    rules: Vec<(FieldKey, Rule)>,
}

impl FieldRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for `key`. The rule sees `None` when the field is absent.
    #[must_use]
    pub fn rule(
        mut self,
        key: impl Into<FieldKey>,
        check: impl Fn(Option<&Value>) -> Option<String> + 'static,
    ) -> Self {
        self.rules.push((key.into(), Rc::new(check)));
        self
    }

    /// The field must be present, non-null and, for text, non-empty.
    #[must_use]
    pub fn required(self, key: impl Into<FieldKey>, message: impl Into<String>) -> Self {
        let message = message.into();
        self.rule(key, move |value| match value {
            None | Some(Value::Null) => Some(message.clone()),
            Some(Value::Text(text)) if text.trim().is_empty() => Some(message.clone()),
            Some(_) => None,
        })
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Freeze the rules into a [`Validator`].
    #[must_use]
    pub fn build(self) -> Validator {
        let rules = self.rules;
        Validator::new(move |values| {
            let mut errors = ErrorMap::new();
            for (key, check) in &rules {
                if errors.contains_key(key) {
                    continue;
                }
                if let Some(msg) = check(values.get(key)) {
                    errors.insert(key.clone(), FieldError::Message(msg));
                }
            }
            errors
        })
    }
}

impl fmt::Debug for FieldRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRules")
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list, map};

    fn key(name: &str) -> FieldKey {
        FieldKey::from(name)
    }

    #[test]
    fn default_validator_reports_nothing() {
        let v = Validator::default();
        assert!(v.validate(&map! { "a" => 1 }).is_empty());
    }

    #[test]
    fn validate_normalizes_output() {
        let v = Validator::new(|_| {
            let mut nested = ErrorMap::new();
            nested.insert(FieldKey::Index(0), FieldError::from(""));
            let mut errors = ErrorMap::new();
            errors.insert(key("empty"), FieldError::from(""));
            errors.insert(key("nested"), FieldError::Nested(nested));
            errors.insert(key("real"), FieldError::from("bad"));
            errors
        });
        let errors = v.validate(&map! {});
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[&key("real")].as_message(), Some("bad"));
    }

    #[test]
    fn truthiness() {
        assert!(!FieldError::from("").is_truthy());
        assert!(FieldError::from("x").is_truthy());
        assert!(!FieldError::Nested(ErrorMap::new()).is_truthy());

        let mut inner = ErrorMap::new();
        inner.insert(FieldKey::Index(1), FieldError::from("x"));
        assert!(FieldError::Nested(inner).is_truthy());
    }

    #[test]
    fn message_and_nested_views() {
        let msg = FieldError::from("bad");
        assert_eq!(msg.as_message(), Some("bad"));
        assert!(msg.as_nested().is_none());

        let mut inner = ErrorMap::new();
        inner.insert(FieldKey::Index(0), FieldError::from("x"));
        let nested = FieldError::Nested(inner.clone());
        assert_eq!(nested.as_nested(), Some(&inner));
        assert!(nested.as_message().is_none());
    }

    #[test]
    fn into_nested_falls_back_to_empty() {
        assert!(FieldError::into_nested(None).is_empty());
        assert!(FieldError::into_nested(Some(FieldError::from("msg"))).is_empty());

        let mut inner = ErrorMap::new();
        inner.insert(FieldKey::Index(0), FieldError::from("x"));
        assert_eq!(
            FieldError::into_nested(Some(FieldError::Nested(inner.clone()))),
            inner
        );
    }

    #[test]
    fn required_rule() {
        let v = FieldRules::new().required("name", "required").build();
        assert_eq!(v.validate(&map! {}).len(), 1);
        assert_eq!(v.validate(&map! { "name" => Value::Null }).len(), 1);
        assert_eq!(v.validate(&map! { "name" => "  " }).len(), 1);
        assert!(v.validate(&map! { "name" => "Ada" }).is_empty());
    }

    #[test]
    fn first_failing_rule_wins() {
        let v = FieldRules::new()
            .rule("n", |_| Some("first".into()))
            .rule("n", |_| Some("second".into()))
            .build();
        let errors = v.validate(&map! { "n" => 1 });
        assert_eq!(errors[&key("n")].as_message(), Some("first"));
    }

    #[test]
    fn rules_address_list_indices() {
        let v = FieldRules::new()
            .rule(1usize, |v| v.is_none().then(|| "missing".to_string()))
            .build();
        assert!(v.validate(&list![1, 2]).is_empty());
        assert_eq!(v.validate(&list![1]).len(), 1);
    }
}
