//! Change classification and the generic labeled-record contract.

use serde::{Deserialize, Serialize};

/// Outcome of comparing a fetched record with its stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Created,
    Updated,
    Cancelled,
    Unchanged,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Created => "created",
            Classification::Updated => "updated",
            Classification::Cancelled => "cancelled",
            Classification::Unchanged => "unchanged",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Classification::Unchanged)
    }
}

/// Human-readable transition label. Derived on the fly, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Opened,
    Created,
    Highlighted,
    Closed,
    Merged,
    Reopened,
    Cancelled,
    Updated,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Opened => "opened",
            Verb::Created => "created",
            Verb::Highlighted => "highlighted",
            Verb::Closed => "closed",
            Verb::Merged => "merged",
            Verb::Reopened => "reopened",
            Verb::Cancelled => "cancelled",
            Verb::Updated => "updated",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-agnostic view of a changed record.
///
/// Adapters populate this identically; nothing downstream branches on the source.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    pub id: String,
    pub collection: String,
    pub verb: Verb,
    pub title: String,
    pub body: String,
    /// Ordered structured fields; empty values are dropped on insert.
    pub fields: Vec<(String, String)>,
}

impl LabeledRecord {
    pub fn new(id: impl Into<String>, collection: impl Into<String>, verb: Verb) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            verb,
            title: String::new(),
            body: String::new(),
            fields: Vec::new(),
        }
    }

    pub fn push_field(&mut self, key: &str, value: impl AsRef<str>) {
        let value = value.as_ref().trim();
        if !value.is_empty() {
            self.fields.push((key.to_string(), value.to_string()));
        }
    }

    #[cfg(test)]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
