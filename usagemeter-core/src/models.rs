//! Data models flowing through the export pipeline.
//!
//! `ColumnMap` and `Row` are transient values scoped to one export run.
//! `UsageRecord` is the anonymized, serializable form written to disk.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Specialization table name to the column judged to hold an email address.
///
/// At most one column per table. Iteration order (and therefore join alias
/// numbering) is the lexicographic order of table names.
pub type ColumnMap = BTreeMap<String, String>;

/// One data line of client output, paired positionally with header names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    /// Creates a row from ordered `(field, value)` pairs.
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Value of the first field with the given name.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Last login as exported: epoch seconds, or an empty string for users
/// who never logged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastLogin {
    /// Seconds since the Unix epoch
    Epoch(i64),
    /// No login recorded
    Never,
}

impl Serialize for LastLogin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Epoch(seconds) => serializer.serialize_i64(*seconds),
            Self::Never => serializer.serialize_str(""),
        }
    }
}

impl<'de> Deserialize<'de> for LastLogin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Epoch(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Epoch(seconds) => Ok(Self::Epoch(seconds)),
            Raw::Text(text) if text.is_empty() => Ok(Self::Never),
            Raw::Text(text) => Err(serde::de::Error::custom(format!(
                "expected epoch seconds or empty string, found '{}'",
                text
            ))),
        }
    }
}

/// One anonymized end-user record.
///
/// Boolean columns keep the exported `"true"`/`"false"` string form.
/// Fields are declared in key order; serialization through
/// `serde_json::Value` sorts the pass-through keys in with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// `"true"` when the account is active
    pub active: String,
    /// `"true"` when the account is blocked
    pub blocked: String,
    /// Local time the record was exported
    pub created_at: String,
    /// Salted hash of the email domain, or empty when none was found
    pub email_domain: String,
    /// `"true"`, `"false"`, or empty when the source value was empty
    pub is_anonymous: String,
    /// Last login in epoch seconds, or empty if the user never logged in
    pub lastlogin: LastLogin,
    /// Salted hash of the literal string `"name"`
    pub name: String,
    /// Layout version of the exported record
    pub schema_version: String,
    /// License id reported by the admin API
    pub server_id: String,
    /// User type as stored by the application
    pub usertype: String,
    /// `"true"` for web service accounts
    pub webserviceuser: String,
    /// Columns without a dedicated rule, passed through unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}
