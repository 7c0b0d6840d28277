//! Static per-source quota fractions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StashError;

/// Mapping of source name to a fraction of the retained queue size.
///
/// Loaded once at startup and never mutated afterwards. A source without an
/// entry is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaSpec {
    fractions: BTreeMap<String, f64>,
}

impl QuotaSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            fractions: pairs.into_iter().map(|(s, f)| (s.into(), f)).collect(),
        }
    }

    /// Parse `reddit=0.5,twitter=0.3`. Both `=` and `:` separate name and
    /// fraction; blank entries are ignored.
    pub fn parse(raw: &str) -> Result<Self, StashError> {
        let mut fractions = BTreeMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once('=')
                .or_else(|| entry.split_once(':'))
                .ok_or_else(|| StashError::Config(format!("quota entry '{entry}' is not name=fraction")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(StashError::Config(format!("quota entry '{entry}' has no source name")));
            }
            let fraction: f64 = value
                .trim()
                .parse()
                .map_err(|_| StashError::Config(format!("quota for '{name}' is not a number: '{}'", value.trim())))?;
            fractions.insert(name.to_string(), fraction);
        }
        Ok(Self { fractions })
    }

    pub fn insert(&mut self, source: impl Into<String>, fraction: f64) {
        self.fractions.insert(source.into(), fraction);
    }

    pub fn fraction(&self, source: &str) -> Option<f64> {
        self.fractions.get(source).copied()
    }

    /// `floor(max_keep * fraction)`, or `None` when the source is unlimited.
    pub fn limit(&self, source: &str, max_keep: u64) -> Option<u64> {
        self.fraction(source)
            .map(|f| (max_keep as f64 * f.max(0.0)).floor() as u64)
    }

    /// Sum of all configured fractions.
    pub fn total(&self) -> f64 {
        self.fractions.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fractions.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.fractions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fractions.is_empty()
    }
}
