//! Field-level anonymization of parsed user rows.
//!
//! Identifying values are replaced by salted SHA-256 digests, boolean
//! columns are spelled out, and the last-login timestamp becomes epoch
//! seconds. The raw `email` column never reaches a [`UsageRecord`].
//!
//! # Example
//! ```rust
//! use usagemeter_core::anonymize::Anonymizer;
//! use usagemeter_core::config::AnonymizationSettings;
//!
//! let anonymizer = Anonymizer::new(AnonymizationSettings::default());
//! assert_eq!(anonymizer.extract_domain("not-an-email"), "");
//! assert_eq!(
//!     anonymizer.extract_domain("user@example.com"),
//!     anonymizer.hash("example.com")
//! );
//! ```

use chrono::{Local, NaiveDateTime, Offset, TimeDelta, TimeZone};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::AnonymizationSettings;
use crate::error::MeteringError;
use crate::models::{LastLogin, Row, UsageRecord};

/// Format of `lastlogin` values in client output. The fractional part is
/// optional because the client omits it when it is zero.
pub const LASTLOGIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The value hashed into every record's `name` field.
pub const NAME_PLACEHOLDER: &str = "name";

/// Shortest domain that is still considered usable.
const MIN_DOMAIN_CHARS: usize = 2;

/// Salted SHA-256 of `value`, as lower-case hex.
pub fn salted_hash(salt: &[u8], value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// `"t"` becomes `"true"`, anything else `"false"`.
pub fn normalize_flag(value: &str) -> String {
    let flag = if value == "t" { "true" } else { "false" };
    flag.to_string()
}

/// Like [`normalize_flag`], but an empty value stays empty.
pub fn normalize_optional_flag(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        normalize_flag(value)
    }
}

/// Epoch seconds for a local time that falls into a forward (DST) gap.
///
/// The time is read with the offset in effect before the gap, which moves
/// it forward by the gap length: 02:30 in a 02:00-03:00 gap becomes the
/// instant of 03:30.
fn resolve_gap<Tz: TimeZone>(naive: &NaiveDateTime, tz: &Tz) -> Option<i64> {
    let before = naive.checked_sub_signed(TimeDelta::days(1))?;
    let offset = tz.offset_from_utc_datetime(&before).fix().local_minus_utc();
    naive
        .and_utc()
        .timestamp()
        .checked_sub(i64::from(offset))
}

/// Converts a `lastlogin` value to epoch seconds in the given time zone.
///
/// An ambiguous local time (clocks going back) resolves to the earlier
/// instant; a local time skipped by clocks going forward is shifted
/// forward by the gap.
///
/// # Errors
/// Returns `TimestampFormat` if the value does not match
/// [`LASTLOGIN_FORMAT`].
pub fn lastlogin_to_epoch_in<Tz: TimeZone>(value: &str, tz: &Tz) -> crate::Result<LastLogin> {
    if value.is_empty() {
        return Ok(LastLogin::Never);
    }

    let naive = NaiveDateTime::parse_from_str(value, LASTLOGIN_FORMAT).map_err(|e| {
        MeteringError::TimestampFormat {
            field: "lastlogin".to_string(),
            value: value.to_string(),
            source: Some(e),
        }
    })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|instant| instant.timestamp())
        .or_else(|| resolve_gap(&naive, tz))
        .map(LastLogin::Epoch)
        .ok_or_else(|| MeteringError::TimestampFormat {
            field: "lastlogin".to_string(),
            value: value.to_string(),
            source: None,
        })
}

/// Converts a `lastlogin` value to epoch seconds using local time.
///
/// # Errors
/// See [`lastlogin_to_epoch_in`].
pub fn lastlogin_to_epoch(value: &str) -> crate::Result<LastLogin> {
    lastlogin_to_epoch_in(value, &Local)
}

/// Export-time values attached to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Export timestamp as text
    pub created_at: String,
    /// License id of the server the data came from
    pub server_id: String,
}

/// Applies the anonymization rules with injected salt and schema version.
#[derive(Debug, Clone, Default)]
pub struct Anonymizer {
    settings: AnonymizationSettings,
}

impl Anonymizer {
    /// Creates an anonymizer.
    pub fn new(settings: AnonymizationSettings) -> Self {
        Self { settings }
    }

    /// The settings in use.
    pub fn settings(&self) -> &AnonymizationSettings {
        &self.settings
    }

    /// Salted hash with this anonymizer's salt.
    pub fn hash(&self, value: &str) -> String {
        salted_hash(&self.settings.salt, value)
    }

    /// Hash of the domain after the first `@`, or empty if there is no
    /// usable domain.
    pub fn extract_domain(&self, value: &str) -> String {
        value
            .split('@')
            .nth(1)
            .filter(|domain| domain.chars().count() >= MIN_DOMAIN_CHARS)
            .map(|domain| self.hash(domain))
            .unwrap_or_default()
    }

    /// Domain hash preferring the `name` field over the `email` field.
    fn email_domain(&self, name: &str, email: &str) -> String {
        let from_name = self.extract_domain(name);
        if from_name.is_empty() {
            self.extract_domain(email)
        } else {
            from_name
        }
    }

    /// Anonymizes one parsed row in the given time zone.
    ///
    /// # Errors
    /// Returns `TimestampFormat` for an unparsable `lastlogin`.
    pub fn anonymize_in<Tz: TimeZone>(
        &self,
        row: &Row,
        metadata: &RecordMetadata,
        tz: &Tz,
    ) -> crate::Result<UsageRecord> {
        let field = |name: &str| row.get(name).unwrap_or_default();

        // TODO: hash the real user name once the metering backend is ready
        // for the `name` digest to change.
        let name = self.hash(NAME_PLACEHOLDER);
        let email_domain = self.email_domain(field("name"), field("email"));

        let extra: BTreeMap<String, String> = row
            .iter()
            .filter(|(name, _)| !HANDLED_FIELDS.contains(name))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Ok(UsageRecord {
            active: normalize_flag(field("active")),
            blocked: normalize_flag(field("blocked")),
            created_at: metadata.created_at.clone(),
            email_domain,
            is_anonymous: normalize_optional_flag(field("is_anonymous")),
            lastlogin: lastlogin_to_epoch_in(field("lastlogin"), tz)?,
            name,
            schema_version: self.settings.schema_version.clone(),
            server_id: metadata.server_id.clone(),
            usertype: field("usertype").to_string(),
            webserviceuser: normalize_flag(field("webserviceuser")),
            extra,
        })
    }

    /// Anonymizes one parsed row using local time.
    ///
    /// # Errors
    /// Returns `TimestampFormat` for an unparsable `lastlogin`.
    pub fn anonymize(&self, row: &Row, metadata: &RecordMetadata) -> crate::Result<UsageRecord> {
        self.anonymize_in(row, metadata, &Local)
    }
}

/// Columns with a dedicated rule; everything else passes through.
const HANDLED_FIELDS: [&str; 8] = [
    "active",
    "blocked",
    "email",
    "is_anonymous",
    "lastlogin",
    "name",
    "usertype",
    "webserviceuser",
];
