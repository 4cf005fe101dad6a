//! # Settings Module
//!
//! Realm configuration as a flat map of dotted keys (`token-info.url`,
//! `idp.proxy.host`, ...). A YAML file may spell the keys flat or nested, both
//! forms flatten to the same map:
//!
//! ```yaml
//! token-info:
//!   url: https://idp.example/oauth2/tokeninfo
//!   field:
//!     user: user_id
//!     expires-in: expires_in
//!     scope: scope
//! idp.read-timeout-in-millis: 2000
//! ```
//!
//! Each component owns a typed view built from these settings (see
//! `CacheSettings`, `HttpClientSettings`, `MapperSettings`,
//! `RoleMappingSettings`), so required keys are checked once at construction
//! and never on the request path.
//!
//! ## Recognized keys
//!
//! | key | default |
//! |-----|---------|
//! | `name` | `oauth` |
//! | `path.conf` | `config` |
//! | `token-info.url` | required |
//! | `token-info.field.user` / `.expires-in` / `.scope` | required |
//! | `token-info.field.expires-in.unit` | `seconds` |
//! | `token-info.cache.max-size` | `20000` |
//! | `token-info.cache.expire-in-seconds` | `300` |
//! | `idp.connection-timeout-in-millis` / `read-` / `write-` | `10000` |
//! | `idp.max-idle-connections` | `200` |
//! | `idp.proxy.host` / `port` / `username` / `password` | unset |
//! | `files.role_mapping` | `<path.conf>/oauth_role_mapping.yml` |
//! | `files.role_mapping.poll-interval-in-millis` | unset (native watcher) |

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Default realm name.
pub const DEFAULT_REALM_NAME: &str = "oauth";
/// Default security configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Configuration errors. These fail realm construction, never a request.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required setting [{key}]")]
    Missing { key: String },
    #[error("invalid value '{value}' for setting [{key}]: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl SettingsError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        SettingsError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Flat realm settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmSettings {
    values: BTreeMap<String, String>,
}

impl RealmSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML text. Nested maps flatten to dotted keys; sequences are
    /// joined with commas; nulls are dropped.
    pub fn from_yaml_str(content: &str) -> Result<Self, SettingsError> {
        let mut settings = Self::new();
        if content.trim().is_empty() {
            return Ok(settings);
        }
        let root: Value = serde_yaml::from_str(content)?;
        match root {
            Value::Mapping(_) => flatten_into(&mut settings.values, None, &root),
            Value::Null => {}
            other => {
                return Err(SettingsError::invalid(
                    "<root>",
                    &scalar_to_string(&other).unwrap_or_default(),
                    "settings must be a mapping",
                ))
            }
        }
        Ok(settings)
    }

    /// Read and parse a YAML settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Raw value; blank strings count as unset.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn get_required(&self, key: &str) -> Result<&str, SettingsError> {
        self.get(key).ok_or_else(|| SettingsError::Missing {
            key: key.to_string(),
        })
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parsed value, `None` when unset.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, SettingsError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| SettingsError::invalid(key, raw, e.to_string())),
        }
    }

    /// Parsed value, `default` when unset.
    pub fn get_parsed_or<T>(&self, key: &str, default: T) -> Result<T, SettingsError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// Realm name (`name`).
    #[must_use]
    pub fn realm_name(&self) -> &str {
        self.get_or("name", DEFAULT_REALM_NAME)
    }

    /// Security configuration directory (`path.conf`).
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(self.get_or("path.conf", DEFAULT_CONFIG_DIR))
    }

    /// All keys, mostly for diagnostics.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for RealmSettings
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Self::new();
        for (k, v) in iter {
            settings.set(k, v);
        }
        settings
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: Option<&str>, value: &Value) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = scalar_to_string(k) else {
                    continue;
                };
                let full = match prefix {
                    Some(p) => format!("{p}.{key}"),
                    None => key,
                };
                flatten_into(out, Some(&full), v);
            }
        }
        Value::Sequence(items) => {
            if let Some(p) = prefix {
                let joined = items
                    .iter()
                    .filter_map(scalar_to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                out.insert(p.to_string(), joined);
            }
        }
        Value::Tagged(tagged) => flatten_into(out, prefix, &tagged.value),
        Value::Null => {}
        scalar => {
            if let (Some(p), Some(s)) = (prefix, scalar_to_string(scalar)) {
                out.insert(p.to_string(), s);
            }
        }
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_flat_keys_are_equivalent() {
        let nested = RealmSettings::from_yaml_str(
            "token-info:\n  url: http://idp/tokeninfo\n  cache:\n    max-size: 5\n",
        )
        .unwrap();
        let flat = RealmSettings::from_yaml_str(
            "token-info.url: http://idp/tokeninfo\ntoken-info.cache.max-size: 5\n",
        )
        .unwrap();
        assert_eq!(nested, flat);
        assert_eq!(nested.get("token-info.cache.max-size"), Some("5"));
    }

    #[test]
    fn typed_getters_apply_defaults_and_reject_garbage() {
        let settings = RealmSettings::new().with("idp.max-idle-connections", "lots");
        assert_eq!(
            settings
                .get_parsed_or("token-info.cache.max-size", 20_000usize)
                .unwrap(),
            20_000
        );
        let err = settings
            .get_parsed_or("idp.max-idle-connections", 200usize)
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
    }

    #[test]
    fn missing_required_key_is_named() {
        let err = RealmSettings::new().get_required("token-info.url").unwrap_err();
        assert_eq!(err.to_string(), "missing required setting [token-info.url]");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let settings = RealmSettings::new().with("idp.proxy.host", "  ");
        assert_eq!(settings.get("idp.proxy.host"), None);
        assert_eq!(settings.realm_name(), DEFAULT_REALM_NAME);
    }
}
