//! Immutable flat key/value configuration store.
//!
//! Built once at launch from `-D key=value` defines and passed by reference
//! into every stage constructor. Values that are empty or whitespace-only are
//! treated as unset.

use std::collections::BTreeMap;
use std::str::FromStr;

use lineflow_types::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    entries: BTreeMap<String, String>,
}

impl ConfigStore {
    /// Build a store from explicit key/value pairs. Later pairs win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { entries }
    }

    /// Build a store from raw `key=value` defines.
    ///
    /// Only the first `=` separates key from value, so values may contain
    /// `=`. Defines without `=` or with an empty key are logged and skipped.
    pub fn from_defines<S: AsRef<str>>(defines: &[S]) -> Self {
        let mut entries = BTreeMap::new();
        for define in defines {
            let define = define.as_ref();
            let Some((key, value)) = define.split_once('=') else {
                tracing::warn!(define, "Malformed option, expected key=value");
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                tracing::warn!(define, "Invalid property, empty key");
                continue;
            }
            entries.insert(key.to_string(), value.to_string());
        }
        Self { entries }
    }

    /// Raw value for `key`, or `None` when unset or blank.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse `key` as `T`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the key when the value is present but
    /// does not parse. `expected` describes the accepted form in that error.
    pub fn parse<T: FromStr>(&self, key: &str, expected: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::invalid(key, raw, expected)),
        }
    }

    /// Parse `key` as `T`, falling back to `default` when unset.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigStore::parse`].
    pub fn parse_or<T: FromStr>(
        &self,
        key: &str,
        default: T,
        expected: &str,
    ) -> Result<T, ConfigError> {
        Ok(self.parse(key, expected)?.unwrap_or(default))
    }

    /// All non-blank entries under `prefix`, with the prefix stripped.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, v)| {
                let name = &k[prefix.len()..];
                (!name.is_empty() && !v.trim().is_empty()).then(|| (name.to_string(), v.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
