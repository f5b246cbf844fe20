//! Writing the export artifact.
//!
//! Records are written as one pretty-printed JSON array with every object's
//! keys sorted. The file is first written next to its destination with a
//! `.tmp` suffix and then renamed, so the artifact is either complete or
//! absent.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::MeteringError;
use crate::models::UsageRecord;

const INDENT: &[u8] = b"    ";

/// Path of the temporary file used while writing `path`.
pub fn temporary_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Renders records as a 4-space indented JSON array with sorted keys.
///
/// # Errors
/// Returns `Serialization` if a record cannot be represented as JSON.
pub fn render_records(records: &[UsageRecord]) -> crate::Result<Vec<u8>> {
    // Going through `Value` sorts object keys, flattened extras included.
    let value = serde_json::to_value(records).map_err(|e| MeteringError::Serialization {
        context: "converting records to JSON".to_string(),
        source: e,
    })?;

    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(INDENT));
    value
        .serialize(&mut serializer)
        .map_err(|e| MeteringError::Serialization {
            context: "rendering records".to_string(),
            source: e,
        })?;
    Ok(buffer)
}

/// Atomically writes records to `path`.
///
/// # Errors
/// Returns `Serialization` or `Io` errors. On failure no file is left at
/// `path` and the temporary file is removed.
pub async fn write_records(records: &[UsageRecord], path: &Path) -> crate::Result<()> {
    let data = render_records(records)?;
    let temporary = temporary_path(path);

    if let Err(e) = tokio::fs::write(&temporary, &data).await {
        let _ = tokio::fs::remove_file(&temporary).await;
        return Err(MeteringError::io(
            format!("Failed to write to {}", temporary.display()),
            e,
        ));
    }

    if let Err(e) = tokio::fs::rename(&temporary, path).await {
        let _ = tokio::fs::remove_file(&temporary).await;
        return Err(MeteringError::io(
            format!("Failed to move output into {}", path.display()),
            e,
        ));
    }

    tracing::debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
