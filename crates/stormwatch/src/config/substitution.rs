//! `${VAR}` environment substitution for config values

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex for matching `${NAME}` references
static ENV_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Variables available for substitution
#[derive(Debug, Clone)]
pub struct SubstitutionContext {
    /// Overrides consulted before the process environment
    pub env: HashMap<String, String>,
    /// Whether to fall back to the process environment
    pub use_process_env: bool,
}

impl Default for SubstitutionContext {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            use_process_env: true,
        }
    }
}

impl SubstitutionContext {
    /// Context backed by the process environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that only sees explicitly added variables
    pub fn isolated() -> Self {
        Self {
            env: HashMap::new(),
            use_process_env: false,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Substitute every `${NAME}` in a string.
    ///
    /// Single pass: a value that itself contains `${...}` is not expanded again.
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = ENV_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }
            let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            match self.resolve_env(name) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Substitute in every string scalar of a parsed YAML document.
    ///
    /// Mapping keys are left untouched.
    pub fn substitute_value(&self, value: &mut serde_yaml::Value) -> Result<(), SubstitutionError> {
        match value {
            serde_yaml::Value::String(s) => {
                if s.contains("${") {
                    *s = self.substitute(s)?;
                }
            }
            serde_yaml::Value::Sequence(items) => {
                for item in items {
                    self.substitute_value(item)?;
                }
            }
            serde_yaml::Value::Mapping(map) => {
                for (_, item) in map.iter_mut() {
                    self.substitute_value(item)?;
                }
            }
            serde_yaml::Value::Tagged(tagged) => self.substitute_value(&mut tagged.value)?,
            _ => {}
        }
        Ok(())
    }

    fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }
        if self.use_process_env {
            if let Ok(value) = std::env::var(name) {
                return Ok(value);
            }
        }
        Err(SubstitutionError::UndefinedEnv(name.to_string()))
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("environment variable '{0}' is not set")]
    UndefinedEnv(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_substitution() {
        let ctx = SubstitutionContext::isolated().with_env("MY_VAR", "my_value");
        assert_eq!(ctx.substitute("${MY_VAR}").unwrap(), "my_value");
    }

    #[test]
    fn test_multiple_substitutions() {
        let ctx = SubstitutionContext::isolated()
            .with_env("HOST", "example.org")
            .with_env("PORT", "8443");
        assert_eq!(
            ctx.substitute("https://${HOST}:${PORT}/hook").unwrap(),
            "https://example.org:8443/hook"
        );
    }

    #[test]
    fn test_undefined_env_error() {
        let ctx = SubstitutionContext::isolated();
        match ctx.substitute("token-${MISSING_TOKEN}") {
            Err(SubstitutionError::UndefinedEnv(name)) => assert_eq!(name, "MISSING_TOKEN"),
            other => panic!("expected UndefinedEnv, got {:?}", other),
        }
    }

    #[test]
    fn test_values_are_not_expanded_twice() {
        let ctx = SubstitutionContext::isolated()
            .with_env("OUTER", "${INNER}")
            .with_env("INNER", "resolved");
        assert_eq!(ctx.substitute("${OUTER}").unwrap(), "${INNER}");
    }

    #[test]
    fn test_no_substitution_needed() {
        let ctx = SubstitutionContext::isolated();
        assert_eq!(ctx.substitute("plain $string").unwrap(), "plain $string");
    }

    #[test]
    fn test_yaml_tree_substitution() {
        let ctx = SubstitutionContext::isolated().with_env("TOKEN", "abc:123");
        let mut value: serde_yaml::Value =
            serde_yaml::from_str("telegram:\n  bot_token: \"${TOKEN}\"\n  chat_ids: [1, \"${TOKEN}\"]\n")
                .unwrap();
        ctx.substitute_value(&mut value).unwrap();
        assert_eq!(value["telegram"]["bot_token"].as_str(), Some("abc:123"));
        assert_eq!(value["telegram"]["chat_ids"][0].as_i64(), Some(1));
        assert_eq!(value["telegram"]["chat_ids"][1].as_str(), Some("abc:123"));
    }
}
