// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Keys, spans and timestamps shared by every lock table component

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An owned, totally ordered key
///
/// Serialized as a string when the bytes are valid UTF-8, otherwise as a byte
/// array. Both forms are accepted when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(Vec<u8>);

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyRepr {
    Text(String),
    Bytes(Vec<u8>),
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => self.0.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match KeyRepr::deserialize(deserializer)? {
            KeyRepr::Text(s) => Key(s.into_bytes()),
            KeyRepr::Bytes(b) => Key(b),
        })
    }
}

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The immediate successor of this key in byte order
    pub fn next(&self) -> Key {
        let mut next = Vec::with_capacity(self.0.len() + 1);
        next.extend_from_slice(&self.0);
        next.push(0);
        Key(next)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{}", s),
            _ => {
                for b in &self.0 {
                    if b.is_ascii_graphic() {
                        write!(f, "{}", *b as char)?;
                    } else {
                        write!(f, "\\x{:02x}", b)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

/// A point key or a half-open key range `[key, end_key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_key: Option<Key>,
}

impl Span {
    pub fn point(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: None,
        }
    }

    pub fn range(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: Some(end_key.into()),
        }
    }

    pub fn is_point(&self) -> bool {
        self.end_key.is_none()
    }

    /// Exclusive upper bound of the span
    pub fn upper_bound(&self) -> Key {
        match &self.end_key {
            Some(end) => end.clone(),
            None => self.key.next(),
        }
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        match &self.end_key {
            None => &self.key == key,
            Some(end) => &self.key <= key && key < end,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end_key {
            None => write!(f, "{}", self.key),
            Some(end) => write!(f, "[{}, {})", self.key, end),
        }
    }
}

/// Hybrid-logical timestamp
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub wall_time: i64,
    #[serde(default)]
    pub logical: i32,
}

impl Timestamp {
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    pub fn is_empty(&self) -> bool {
        self.wall_time == 0 && self.logical == 0
    }

    /// Ratchet this timestamp up to `other`. Returns true if it moved.
    pub fn forward(&mut self, other: Timestamp) -> bool {
        if *self < other {
            *self = other;
            true
        } else {
            false
        }
    }

    /// Lower this timestamp to `other` if `other` is smaller
    pub fn backward(&mut self, other: Timestamp) {
        if other < *self {
            *self = other;
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.wall_time, self.logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_next_sorts_immediately_after() {
        let a = Key::from("a");
        let next = a.next();
        assert!(a < next);
        assert!(next < Key::from("a\u{1}"));
        assert!(next < Key::from("b"));
    }

    #[test]
    fn test_key_display_escapes_binary() {
        assert_eq!(Key::from("abc").to_string(), "abc");
        assert_eq!(Key::new(vec![b'a', 0, 0xff]).to_string(), "a\\x00\\xff");
    }

    #[test]
    fn test_span_contains() {
        let point = Span::point("b");
        assert!(point.contains_key(&Key::from("b")));
        assert!(!point.contains_key(&Key::from("b\0")));

        let range = Span::range("b", "d");
        assert!(range.contains_key(&Key::from("b")));
        assert!(range.contains_key(&Key::from("c")));
        assert!(!range.contains_key(&Key::from("d")));
        assert_eq!(point.upper_bound(), Key::from("b").next());
    }

    #[test]
    fn test_key_serde_forms() {
        let text = serde_json::to_string(&Key::from("abc")).unwrap();
        assert_eq!(text, "\"abc\"");
        let binary = serde_json::to_string(&Key::new(vec![0xff, 1])).unwrap();
        assert_eq!(binary, "[255,1]");

        let from_text: Key = serde_json::from_str("\"abc\"").unwrap();
        let from_bytes: Key = serde_json::from_str("[97,98,99]").unwrap();
        assert_eq!(from_text, from_bytes);
    }

    #[test]
    fn test_timestamp_forward_backward() {
        let mut ts = Timestamp::new(10, 0);
        assert!(!ts.forward(Timestamp::new(9, 5)));
        assert!(ts.forward(Timestamp::new(10, 1)));
        assert_eq!(ts, Timestamp::new(10, 1));

        ts.backward(Timestamp::new(12, 0));
        assert_eq!(ts, Timestamp::new(10, 1));
        ts.backward(Timestamp::new(3, 0));
        assert_eq!(ts, Timestamp::new(3, 0));
        assert!(Timestamp::default().is_empty());
    }
}
