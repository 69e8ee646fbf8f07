use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::wire::{Metadata, Strings};

/// Header or trailer metadata: names map to ordered value lists.
///
/// Names are normalized to lowercase on every insert and lookup, the same
/// way an HTTP header container treats them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace all values for `name` with `value`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(normalize(name), vec![value.into()]);
    }

    /// Add `value` after any existing values for `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(normalize(name))
            .or_default()
            .push(value.into());
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&normalize(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&normalize(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&normalize(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Overlay `other`: each name present there replaces the local values.
    pub fn merge(&mut self, other: &MetadataMap) {
        for (name, values) in &other.entries {
            self.entries.insert(name.clone(), values.clone());
        }
    }

    /// Wire form. Empty maps are omitted entirely.
    pub fn to_proto(&self) -> Option<Metadata> {
        if self.entries.is_empty() {
            return None;
        }
        let md = self
            .entries
            .iter()
            .map(|(name, values)| {
                (
                    name.clone(),
                    Strings {
                        values: values.clone(),
                    },
                )
            })
            .collect();
        Some(Metadata { md })
    }

    pub fn from_proto(metadata: Option<&Metadata>) -> Self {
        let mut map = Self::new();
        if let Some(metadata) = metadata {
            for (name, strings) in &metadata.md {
                for value in &strings.values {
                    map.append(name, value.clone());
                }
            }
        }
        map
    }

    /// Encode as an HTTP/1-style header block (`name: v1, v2\r\n` per name).
    ///
    /// Only printable ASCII plus TAB, LF and CR may appear.
    pub fn to_header_block(&self) -> Result<Bytes> {
        let mut block = String::new();
        for (name, values) in &self.entries {
            block.push_str(name);
            block.push_str(": ");
            block.push_str(&values.join(", "));
            block.push_str("\r\n");
        }

        if let Some(&bad) = block.as_bytes().iter().find(|b| !is_valid_header_byte(**b)) {
            return Err(FrameError::InvalidMetadata(bad));
        }
        Ok(Bytes::from(block))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}

/// Printable ASCII (0x20-0x7E) plus TAB, LF and CR.
pub fn is_valid_header_byte(byte: u8) -> bool {
    matches!(byte, 0x09 | 0x0A | 0x0D | 0x20..=0x7E)
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}
