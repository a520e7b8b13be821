//! Key paths
//!
//! A key path is an ordered list of segments flattened into a single
//! storage key, e.g. `["_SETTINGS_", "example.com", "gpc"]` becomes
//! `_SETTINGS_:example.com:gpc`.

use crate::error::StorageError;
use crate::Result;

pub const KEY_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if segments.is_empty() {
            return Err(StorageError::InvalidKey("key path is empty".to_string()));
        }

        for segment in &segments {
            if segment.is_empty() {
                return Err(StorageError::InvalidKey(format!(
                    "empty segment in {:?}",
                    segments
                )));
            }
            if segment.contains(KEY_SEPARATOR) {
                return Err(StorageError::InvalidKey(format!(
                    "segment {:?} contains '{}'",
                    segment, KEY_SEPARATOR
                )));
            }
        }

        Ok(Self(segments))
    }

    /// Split a flat storage key back into its segments
    pub fn parse(key: &str) -> Result<Self> {
        Self::new(key.split(KEY_SEPARATOR))
    }

    pub fn to_key(&self) -> String {
        self.0.join(&KEY_SEPARATOR.to_string())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn first(&self) -> &str {
        &self.0[0]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}
