//! PDF dictionary implementation

use std::io::{self, Write};

use indexmap::IndexMap;

use crate::error::{PDFError, PDFResult};
use super::{Object, ObjectId};

/// PDF dictionary object
///
/// Keys keep their insertion order for round-trip fidelity. Two dictionaries
/// are equal when they hold the same key/value pairs in any order.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: IndexMap<Vec<u8>, Object>,
}

impl Dictionary {
    /// Create new dictionary
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Get value by key
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&Object> {
        self.entries.get(key.as_ref())
    }

    pub fn get_mut(&mut self, key: impl AsRef<[u8]>) -> Option<&mut Object> {
        self.entries.get_mut(key.as_ref())
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> bool {
        self.entries.contains_key(key.as_ref())
    }

    /// Insert or replace a value, keeping the position of an existing key
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl Into<Object>) {
        self.entries.insert(key.as_ref().to_vec(), value.into());
    }

    /// Remove a key, keeping the order of the remaining entries
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Option<Object> {
        self.entries.shift_remove(key.as_ref())
    }

    /// Get integer value
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64().ok())
    }

    /// Get name value
    pub fn get_name(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(|v| v.as_name().ok())
    }

    /// Get string value
    pub fn get_string(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(|v| v.as_str().ok())
    }

    /// Get boolean value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool().ok())
    }

    /// Get indirect reference value
    pub fn get_reference(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(|v| v.as_reference().ok())
    }

    /// Whether `key` holds the name `name`
    pub fn is_name(&self, key: &str, name: &str) -> bool {
        self.get_name(key) == Some(name.as_bytes())
    }

    /// Whether the dictionary's `/Type` is `type_name`
    pub fn has_type(&self, type_name: &str) -> bool {
        self.is_name("Type", type_name)
    }

    /// Get a required value, failing with a type error when absent
    pub fn require(&self, key: &'static str) -> PDFResult<&Object> {
        self.get(key).ok_or(PDFError::InvalidObjectType {
            expected: key,
            found: "missing key",
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Object)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Vec<u8>, &mut Object)> {
        self.entries.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Object> {
        self.entries.values()
    }

    /// Serialize as `<<...>>`
    pub fn write_to<W: Write>(&self, output: &mut W) -> io::Result<()> {
        output.write_all(b"<<")?;
        for (key, value) in &self.entries {
            super::object::write_name(output, key)?;
            if !matches!(
                value,
                Object::Name(_) | Object::String(_) | Object::Array(_) | Object::Dictionary(_)
            ) {
                output.write_all(b" ")?;
            }
            value.write_to(output)?;
        }
        output.write_all(b">>")
    }
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.entries.get(k).map_or(false, |o| o == v))
    }
}

impl FromIterator<(Vec<u8>, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Object)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Build a dictionary from `key => value` pairs
#[macro_export]
macro_rules! dictionary {
    () => { $crate::Dictionary::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut dict = $crate::Dictionary::new();
        $(dict.set($key, $value);)+
        dict
    }};
}
