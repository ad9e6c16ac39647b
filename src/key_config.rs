//! Per-key display metadata (multiplier, unit, offset, hint) and its resolution.
//!
//! Every section maps a key name or wildcard pattern to a value. Lookup tries the
//! exact key first, then every entry in document order as an unanchored regular
//! expression with `*` expanded to `.*`. Document order is kept by
//! [`OrderedSection`], so the first matching pattern is stable across reloads.

use regex::Regex;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

pub const DEFAULT_MULTIPLIER: f64 = 1.0;
pub const DEFAULT_OFFSET: f64 = 0.0;

/// Insertion-ordered pattern table.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedSection<T> {
    entries: Vec<(String, T)>,
    /// Key to position in `entries`.
    index: HashMap<String, usize>,
}

impl<T> Default for OrderedSection<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> OrderedSection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value of an existing key in place, otherwise appends.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&position) => self.entries[position].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index
            .get(key)
            .map(|&position| &self.entries[position].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for OrderedSection<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut section = Self::new();
        for (key, value) in iter {
            section.insert(key, value);
        }
        section
    }
}

impl<T: Serialize> Serialize for OrderedSection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(key, value)| (key, value)))
    }
}

struct SectionVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for SectionVisitor<T> {
    type Value = OrderedSection<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object mapping key patterns to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut section = OrderedSection::new();
        while let Some((key, value)) = access.next_entry::<String, T>()? {
            section.insert(key, value);
        }
        Ok(section)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedSection<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SectionVisitor(PhantomData))
    }
}

/// Key configuration stored per upstream API URL.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct KeyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub multipliers: Option<OrderedSection<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub units: Option<OrderedSection<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub offsets: Option<OrderedSection<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub hints: Option<OrderedSection<String>>,
}

impl KeyConfig {
    pub fn resolver(&self) -> KeyResolver<'_> {
        KeyResolver {
            multipliers: self.multipliers.as_ref().map(CompiledSection::new),
            units: self.units.as_ref().map(CompiledSection::new),
            offsets: self.offsets.as_ref().map(CompiledSection::new),
            hints: self.hints.as_ref().map(CompiledSection::new),
        }
    }
}

/// Builds the matcher for one pattern. Malformed expressions never match.
pub fn wildcard_regex(pattern: &str) -> Option<Regex> {
    match Regex::new(&pattern.replace('*', ".*")) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::debug!(pattern, error = %err, "skipping unparseable key pattern");
            None
        }
    }
}

/// A section with its patterns compiled once, for repeated lookups.
pub struct CompiledSection<'a, T> {
    section: &'a OrderedSection<T>,
    patterns: Vec<Option<Regex>>,
}

impl<'a, T> CompiledSection<'a, T> {
    pub fn new(section: &'a OrderedSection<T>) -> Self {
        let patterns = section.iter().map(|(key, _)| wildcard_regex(key)).collect();
        Self { section, patterns }
    }

    pub fn lookup(&self, key: &str) -> Option<&'a T> {
        let section: &'a OrderedSection<T> = self.section;
        if let Some(value) = section.get(key) {
            return Some(value);
        }
        section
            .iter()
            .zip(&self.patterns)
            .find_map(|((_, value), pattern)| {
                pattern
                    .as_ref()
                    .filter(|regex| regex.is_match(key))
                    .map(|_| value)
            })
    }
}

/// Exact match, then first matching pattern, then `default`.
pub fn resolve<T: Clone>(section: &OrderedSection<T>, key: &str, default: T) -> T {
    CompiledSection::new(section)
        .lookup(key)
        .cloned()
        .unwrap_or(default)
}

pub struct KeyResolver<'a> {
    multipliers: Option<CompiledSection<'a, f64>>,
    units: Option<CompiledSection<'a, String>>,
    offsets: Option<CompiledSection<'a, f64>>,
    hints: Option<CompiledSection<'a, String>>,
}

impl KeyResolver<'_> {
    pub fn multiplier(&self, key: &str) -> f64 {
        self.multipliers
            .as_ref()
            .and_then(|section| section.lookup(key))
            .copied()
            .unwrap_or(DEFAULT_MULTIPLIER)
    }

    pub fn unit(&self, key: &str) -> String {
        self.units
            .as_ref()
            .and_then(|section| section.lookup(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn offset(&self, key: &str) -> f64 {
        self.offsets
            .as_ref()
            .and_then(|section| section.lookup(key))
            .copied()
            .unwrap_or(DEFAULT_OFFSET)
    }

    pub fn hint(&self, key: &str) -> String {
        self.hints
            .as_ref()
            .and_then(|section| section.lookup(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn metadata(&self, key: &str) -> KeyMetadata {
        KeyMetadata {
            key: key.to_string(),
            multiplier: self.multiplier(key),
            unit: self.unit(key),
            offset: self.offset(key),
            hint: self.hint(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
pub struct KeyMetadata {
    pub key: String,
    pub multiplier: f64,
    pub unit: String,
    pub offset: f64,
    pub hint: String,
}

impl KeyMetadata {
    /// Raw reading to display units: scaled first, then shifted.
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.multiplier + self.offset
    }
}
