//! Parser for the `psql` aligned tabular text format.
//!
//! The client prints a header line, a decorative separator, one line per
//! row with `|` between fields, and a trailing `(N rows)` footer:
//!
//! ```text
//!  name  | lastlogin | active
//! -------+-----------+--------
//!  alice |           | t
//! (1 row)
//! ```
//!
//! Row extraction is deliberately lossy: any line that does not split into
//! exactly the expected number of fields is dropped without error. That
//! covers blank lines and the footer, but also values that themselves
//! contain a `|`.

use std::sync::OnceLock;

use crate::error::MeteringError;
use crate::models::Row;

/// Separator between fields on a line.
pub const FIELD_DELIMITER: char = '|';

/// Lines before the first data line (header and separator).
const PREAMBLE_LINES: usize = 2;

#[allow(clippy::expect_used)]
fn footer_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^\(\d+ rows?\)$").expect("Invalid row-count footer pattern")
    })
}

/// Whether a line is the client's `(N rows)` / `(1 row)` footer.
pub fn is_row_count_footer(line: &str) -> bool {
    footer_pattern().is_match(line.trim())
}

/// Trimmed data lines: preamble, footer and blank lines removed.
pub fn data_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .skip(PREAMBLE_LINES)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_row_count_footer(line))
}

/// Parses client output into rows of exactly `expected_fields` fields.
///
/// Line 0 supplies the field names, line 1 is ignored, and every later
/// line is split on [`FIELD_DELIMITER`]. Lines with any other field count
/// are discarded. If the header itself does not have `expected_fields`
/// names, no row can be paired with it and the result is empty.
pub fn parse_rows(output: &str, expected_fields: usize) -> Vec<Row> {
    let mut lines = output.lines();

    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let header: Vec<String> = header_line
        .split(FIELD_DELIMITER)
        .map(|name| name.trim().to_string())
        .collect();

    if header.len() != expected_fields {
        tracing::debug!(
            "Header has {} fields, expected {}; skipping all rows",
            header.len(),
            expected_fields
        );
        return Vec::new();
    }

    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for line in lines.skip(1) {
        let values: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if values.len() != expected_fields {
            skipped = skipped.saturating_add(1);
            continue;
        }
        rows.push(
            header
                .iter()
                .zip(values)
                .map(|(name, value)| (name.clone(), value.trim().to_string()))
                .collect(),
        );
    }

    tracing::trace!("Parsed {} rows, skipped {} lines", rows.len(), skipped);
    rows
}

/// Returns the single value of a one-column, one-row result.
///
/// # Errors
/// Returns `UnexpectedOutput` when there is no first data line.
pub fn parse_scalar(output: &str) -> crate::Result<&str> {
    output
        .lines()
        .nth(PREAMBLE_LINES)
        .map(str::trim)
        .filter(|value| !value.is_empty() && !is_row_count_footer(value))
        .ok_or_else(|| MeteringError::unexpected_output("result has no data line"))
}
