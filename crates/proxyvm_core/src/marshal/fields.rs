//! Ordered key/value collections and their host wire layout.
//!
//! Layout (all integers little-endian `u32`):
//!
//! ```text
//! count | (key_len, value_len) * count | (key 0x00 value 0x00) * count
//! ```

use crate::error::{HostError, HostResult};

const WORD: usize = 4;

/// Ordered sequence of `(key, value)` string pairs, e.g. HTTP headers.
///
/// Mutations only touch guest memory. They reach the host when the collection
/// is written back with `Host::set_fields`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldCollection {
    pairs: Vec<(String, String)>,
}

impl FieldCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    /// Appends one pair, keeping earlier pairs with the same key.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Sets `key` to exactly one value.
    ///
    /// The first existing pair keeps its position; later duplicates are
    /// dropped. A missing key is appended.
    pub fn replace(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter().position(|(candidate, _)| candidate == key) {
            Some(index) => {
                self.pairs[index].1 = value;
                let mut seen = 0usize;
                self.pairs.retain(|(candidate, _)| {
                    if candidate != key {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    /// Removes every pair stored under `key`; returns how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|(candidate, _)| candidate != key);
        before - self.pairs.len()
    }

    /// Keeps only pairs for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.pairs.retain(|(key, value)| keep(key, value));
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.pairs
    }

    /// Serializes into the host map layout.
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self
            .pairs
            .iter()
            .map(|(key, value)| key.len() + value.len() + 2)
            .sum();
        let mut out = Vec::with_capacity(WORD + self.pairs.len() * 2 * WORD + payload);
        out.extend_from_slice(&(self.pairs.len() as u32).to_le_bytes());
        for (key, value) in &self.pairs {
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        }
        for (key, value) in &self.pairs {
            out.extend_from_slice(key.as_bytes());
            out.push(0);
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
        out
    }

    /// Parses the host map layout.
    ///
    /// An empty input decodes to an empty collection (the host returns no
    /// bytes for an empty map).
    pub fn decode(bytes: &[u8]) -> HostResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let count = read_word(bytes, 0)? as usize;
        let header_end = WORD
            .checked_add(count.checked_mul(2 * WORD).ok_or(HostError::SerializationError)?)
            .ok_or(HostError::SerializationError)?;
        if header_end > bytes.len() {
            return Err(HostError::SerializationError);
        }

        let mut pairs = Vec::with_capacity(count);
        let mut cursor = header_end;
        for index in 0..count {
            let key_len = read_word(bytes, WORD + index * 2 * WORD)? as usize;
            let value_len = read_word(bytes, WORD + index * 2 * WORD + WORD)? as usize;
            let key = read_terminated(bytes, &mut cursor, key_len)?;
            let value = read_terminated(bytes, &mut cursor, value_len)?;
            pairs.push((key, value));
        }
        Ok(Self { pairs })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldCollection {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl IntoIterator for FieldCollection {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

fn read_word(bytes: &[u8], offset: usize) -> HostResult<u32> {
    let end = offset.checked_add(WORD).ok_or(HostError::SerializationError)?;
    let raw = bytes
        .get(offset..end)
        .ok_or(HostError::SerializationError)?;
    let mut word = [0u8; WORD];
    word.copy_from_slice(raw);
    Ok(u32::from_le_bytes(word))
}

fn read_terminated(bytes: &[u8], cursor: &mut usize, len: usize) -> HostResult<String> {
    let end = cursor.checked_add(len).ok_or(HostError::SerializationError)?;
    let text = bytes
        .get(*cursor..end)
        .ok_or(HostError::SerializationError)?;
    if bytes.get(end) != Some(&0) {
        return Err(HostError::SerializationError);
    }
    *cursor = end + 1;
    String::from_utf8(text.to_vec()).map_err(|_| HostError::SerializationError)
}
