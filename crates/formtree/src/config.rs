#![forbid(unsafe_code)]

//! Per-node validation policy.

/// When a node runs its [`Validator`](crate::Validator) on its own.
///
/// Explicit error payloads passed to setters are always applied, whatever the
/// policy says. Derived child nodes copy their parent's config.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FormConfig {
    /// Recompute errors after every value change that carries no explicit
    /// error payload. When off, such changes keep the current error map.
    pub validate_on_change: bool,
    /// Compute errors once when the node is built.
    pub validate_on_mount: bool,
    /// Run the validator before calling a submit handler.
    pub validate_on_submit: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            validate_on_change: true,
            validate_on_mount: false,
            validate_on_submit: true,
        }
    }
}

impl FormConfig {
    #[must_use]
    pub fn with_validate_on_change(mut self, enabled: bool) -> Self {
        self.validate_on_change = enabled;
        self
    }

    #[must_use]
    pub fn with_validate_on_mount(mut self, enabled: bool) -> Self {
        self.validate_on_mount = enabled;
        self
    }

    #[must_use]
    pub fn with_validate_on_submit(mut self, enabled: bool) -> Self {
        self.validate_on_submit = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FormConfig::default();
        assert!(config.validate_on_change);
        assert!(!config.validate_on_mount);
        assert!(config.validate_on_submit);
    }

    #[test]
    fn builder_methods() {
        let config = FormConfig::default()
            .with_validate_on_change(false)
            .with_validate_on_mount(true)
            .with_validate_on_submit(false);
        assert!(!config.validate_on_change);
        assert!(config.validate_on_mount);
        assert!(!config.validate_on_submit);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_config_fills_defaults() {
        let config: FormConfig = serde_json::from_str(r#"{"validate_on_mount":true}"#).unwrap();
        assert!(config.validate_on_change);
        assert!(config.validate_on_mount);
    }
}
