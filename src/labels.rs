//! Label set normalization: query parameters to a canonical label key.

use thiserror::Error;

use std::collections::BTreeMap;
use std::fmt;

/// Query parameters that steer ingestion and never become labels.
pub const RESERVED_PARAMS: &[&str] = &[
    "grouped",
    "from",
    "until",
    "name",
    "format",
    "sampleRate",
    "spyName",
    "units",
    "aggregationType",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("missing `name` parameter")]
    MissingName,
    #[error("invalid application name {0:?}")]
    InvalidName(String),
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid value {value:?} for label {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("label {key:?} given conflicting values {first:?} and {second:?}")]
    Conflict {
        key: String,
        first: String,
        second: String,
    },
}

/// An application name plus its labels, keys kept sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    name: String,
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    /// Builds the set from decoded query pairs. `name` may carry inline
    /// labels (`app.cpu{env=prod}`); every non-reserved parameter is a label.
    pub fn from_query<K, V>(pairs: &[(K, V)]) -> Result<Self, LabelError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let raw_name = pairs
            .iter()
            .find(|(k, _)| k.as_ref() == "name")
            .map(|(_, v)| v.as_ref().trim())
            .filter(|v| !v.is_empty())
            .ok_or(LabelError::MissingName)?;
        let mut set = Self::parse_name(raw_name)?;
        for (key, value) in pairs {
            let key = key.as_ref();
            if RESERVED_PARAMS.contains(&key) {
                continue;
            }
            set.insert(key.trim(), value.as_ref().trim())?;
        }
        Ok(set)
    }

    /// Parses `name` or `name{k=v,...}`.
    pub fn parse_name(raw: &str) -> Result<Self, LabelError> {
        let invalid = || LabelError::InvalidName(raw.to_string());
        let (name, inline) = match raw.find('{') {
            Some(open) => {
                let inner = raw[open + 1..].strip_suffix('}').ok_or_else(invalid)?;
                (raw[..open].trim(), Some(inner))
            }
            None => (raw.trim(), None),
        };
        if name.is_empty() || !is_plain(name) {
            return Err(invalid());
        }
        let mut set = Self {
            name: name.to_string(),
            labels: BTreeMap::new(),
        };
        for pair in inline.into_iter().flat_map(|s| s.split(',')) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(invalid)?;
            set.insert(key.trim(), value.trim())?;
        }
        Ok(set)
    }

    fn insert(&mut self, key: &str, value: &str) -> Result<(), LabelError> {
        if key.is_empty() || !is_plain(key) {
            return Err(LabelError::InvalidKey(key.to_string()));
        }
        if value.is_empty() || !is_plain(value) {
            return Err(LabelError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        match self.labels.get(key) {
            Some(existing) if existing != value => Err(LabelError::Conflict {
                key: key.to_string(),
                first: existing.clone(),
                second: value.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.labels.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Canonical key: `name` or `name{k1=v1,k2=v2}` with keys sorted.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (idx, (key, value)) in self.labels.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

fn is_plain(s: &str) -> bool {
    !s.contains(['{', '}', ',', '='])
}

/// Canonical label key for a decoded query.
pub fn normalize_labels<K, V>(pairs: &[(K, V)]) -> Result<String, LabelError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    LabelSet::from_query(pairs).map(|set| set.key())
}
