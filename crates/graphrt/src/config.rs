//! Parsing of backend configuration strings.
//!
//! A configuration string is a list of `key=value` entries separated by `,` or
//! `;`. A bare `key` means `key=true`. The empty string selects defaults.

use std::collections::BTreeMap;
use std::env;

use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    entries: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn parse(configuration: &str) -> BackendResult<Self> {
        let mut entries = BTreeMap::new();
        for entry in configuration.split([',', ';']) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (entry, "true"),
            };
            if key.is_empty() {
                return Err(BackendError::Config(format!("entry {entry:?} has no key")));
            }
            entries.insert(key.to_ascii_lowercase(), value.to_string());
        }
        Ok(BackendConfig { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Configured value, else the environment variable `var` when set and non-empty.
    pub fn get_or_env(&self, key: &str, var: &str) -> Option<String> {
        self.get(key).map(str::to_string).or_else(|| match env::var(var) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            _ => None,
        })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(parse_bool)
    }

    pub fn get_usize(&self, key: &str) -> BackendResult<Option<usize>> {
        self.get(key)
            .map(|value| {
                value.parse::<usize>().map_err(|_| {
                    BackendError::Config(format!("{key} expects an unsigned integer, got {value:?}"))
                })
            })
            .transpose()
    }

    /// Rejects keys the backend does not understand.
    pub fn ensure_known(&self, backend: &str, known: &[&str]) -> BackendResult<()> {
        match self.entries.keys().find(|key| !known.contains(&key.as_str())) {
            Some(key) => Err(BackendError::Config(format!(
                "{backend} backend does not recognise option {key:?}"
            ))),
            None => Ok(()),
        }
    }
}

pub fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Reads a boolean flag from the environment; unset or empty means `false`.
pub fn env_flag(var: &str) -> bool {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_default() {
        let config = BackendConfig::parse("").expect("parse");
        assert!(config.is_empty());
        config.ensure_known("CPU", &[]).expect("no keys");
    }

    #[test]
    fn parses_mixed_separators_and_bare_flags() {
        let config = BackendConfig::parse("cc=clang; opt=2 ,timing").expect("parse");
        assert_eq!(config.get("cc"), Some("clang"));
        assert_eq!(config.get_usize("opt").expect("opt"), Some(2));
        assert_eq!(config.get_bool("timing"), Some(true));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_numbers() {
        let config = BackendConfig::parse("alignment=abc").expect("parse");
        assert!(config.get_usize("alignment").is_err());
        assert!(config.ensure_known("GPU", &["device"]).is_err());
        assert!(BackendConfig::parse("=1").is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value));
        }
        assert!(!parse_bool("off"));
    }
}
