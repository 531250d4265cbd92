//! Helpers for reading configuration from environment-style lookups.
//!
//! Config structs take a lookup function instead of reading the process
//! environment directly so tests can supply values without touching global
//! state. `from_env` constructors pass [`process_env`].

use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Lookup backed by the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Read `var`, falling back to `default` when unset or blank.
pub fn string_or<L>(lookup: &L, var: &'static str, default: &str) -> String
where
    L: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read a required, non-blank `var`.
pub fn required<L>(lookup: &L, var: &'static str) -> Result<String, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

/// Parse `var` into `T`, falling back to `default` when unset or blank.
pub fn parse_or<L, T>(lookup: &L, var: &'static str, default: T) -> Result<T, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parse_or_uses_default_when_unset() {
        let env = lookup(&[]);
        assert_eq!(parse_or(&env, "PORT", 8000u16).unwrap(), 8000);
    }

    #[test]
    fn parse_or_reports_bad_value() {
        let env = lookup(&[("PORT", "eighty")]);
        assert_matches!(
            parse_or(&env, "PORT", 8000u16),
            Err(ConfigError::Invalid { var: "PORT", .. })
        );
    }

    #[test]
    fn blank_counts_as_unset() {
        let env = lookup(&[("HOST", "  ")]);
        assert_eq!(string_or(&env, "HOST", "0.0.0.0"), "0.0.0.0");
        assert_matches!(required(&env, "HOST"), Err(ConfigError::Missing("HOST")));
    }
}
